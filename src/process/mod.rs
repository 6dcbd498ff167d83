//! Child process launch and ownership.

mod command;
mod handle;

pub use command::{CommandSpec, PORT_PLACEHOLDER};
pub use handle::{OutputLine, ProcessHandle, StreamKind, TerminationStatus};
