//! Cancellation primitives used by the wait operations.

mod idle;
mod linked;

pub use idle::IdleTimeoutCanceller;
pub use linked::LinkedCancellation;
