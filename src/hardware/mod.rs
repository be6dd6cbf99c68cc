//! Acquisition hardware.
//!
//! - `driver` - the `ScopeDriver` trait and the types it exchanges
//! - `mock` - simulated device for running without the vendor SDK
//! - `bring_up` - startup sequence

pub mod bring_up;
pub mod driver;
pub mod mock;

pub use driver::{ScopeDriver, ScopeError, ScopeStatus};
pub use mock::MockScope;
