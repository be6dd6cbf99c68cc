//! # picoscpi
//!
//! Network controller for a single oscilloscope. A text command protocol on
//! one TCP port configures the device; every capture's samples are streamed
//! as raw little-endian `i16` to a second port.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the `ScopeDriver` trait the server drives, a simulated
//!   implementation, and the device bring-up sequence.
//! - **`channels`**: the four channel records, pushed whole to the driver on
//!   every change.
//! - **`capture`**: the capture coordinator. Owns the sample buffer and hands
//!   it across the driver's completion thread through a single-slot channel.
//! - **`network`**: control protocol parsing, command dispatch, client slots
//!   and the `ScopeServer` reactor.
//! - **`config`**: Figment-based configuration (defaults, TOML, environment).
//! - **`error`**: the `ServerError` enum; every variant is fatal.
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.

pub mod capture;
pub mod channels;
pub mod config;
pub mod error;
pub mod hardware;
pub mod network;
pub mod tracing_setup;

pub use error::{ServerError, ServerResult};
