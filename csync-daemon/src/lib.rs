//! csync daemon: owns the engine and serves it over a Unix socket.
//!
//! - [`runtime`] wires the engine to the socket server, the config watcher,
//!   log rotation and signal handling
//! - [`protocol`] is the JSON-lines client side used by the CLI
//! - [`log_rotation`] keeps the journal and daemon logs bounded

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, DaemonState, SHUTDOWN_GRACE};
