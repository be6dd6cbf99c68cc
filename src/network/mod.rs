//! Network front end: command protocol, dispatch, client slots and the reactor.

pub mod dispatcher;
pub mod protocol;
pub mod server_actor;
pub mod session;

pub use dispatcher::CommandDispatcher;
pub use protocol::{parse_command, ScpiCommand};
pub use server_actor::{serve, ScopeServer};
pub use session::Session;
