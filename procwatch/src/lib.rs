//! Procwatch - launch a child process and make assertions about its output.
//!
//! Built for integration tests that need to "wait until the program prints X"
//! while the program is still running:
//!
//! - Output of both streams is captured line by line as it arrives
//! - Buffered output can be read, or drained so each line is seen once
//! - Live streams yield lines until the process exits
//! - Waits combine a predicate with process, idle and caller-driven timeouts
//! - Dropping the wrapper terminates the process, or its whole process tree

pub mod cancel;
mod error;
pub mod models;
pub mod process;

pub use error::{ProcessError, Result};
pub use models::{OutputFragment, OutputType};
pub use process::{ProcessOptions, ProcessWrapper, Terminate, WaitOptions, DISPOSED_EXIT_CODE};
pub use tokio_util::sync::CancellationToken;
