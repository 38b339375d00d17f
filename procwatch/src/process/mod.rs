//! Launching a child process, capturing its output, and waiting on it.
//!
//! A [`ProcessWrapper`] reads both output streams of the child line by line
//! as soon as it starts. Lines can be read back from a buffer, streamed live,
//! or waited for with a predicate and a timeout.

mod options;
mod terminate;
mod wait;
mod wrapper;

pub use options::{ProcessOptions, WaitOptions};
pub use terminate::Terminate;
pub use wrapper::{ProcessWrapper, DISPOSED_EXIT_CODE};
