//! Waiting for a process to print something.

use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::options::WaitOptions;
use super::wrapper::ProcessWrapper;
use crate::cancel::{IdleTimeoutCanceller, LinkedCancellation};

impl ProcessWrapper {
    /// Wait up to `timeout` for output matching `predicate`.
    ///
    /// A zero `timeout` waits without a time limit. See
    /// [`wait_for_output_with`](Self::wait_for_output_with).
    pub async fn wait_for_output<P>(&self, predicate: P, timeout: Duration) -> bool
    where
        P: FnMut(&str) -> bool,
    {
        self.wait_for_output_with(predicate, WaitOptions::new().process_timeout(timeout))
            .await
    }

    /// Wait for output matching `predicate` until `cancellation` fires.
    pub async fn wait_for_output_until<P>(&self, predicate: P, cancellation: CancellationToken) -> bool
    where
        P: FnMut(&str) -> bool,
    {
        self.wait_for_output_with(predicate, WaitOptions::new().cancellation(cancellation))
            .await
    }

    /// Wait for output matching `predicate`, with options built by `configure`.
    pub async fn wait_for_output_configured<P, F>(&self, predicate: P, configure: F) -> bool
    where
        P: FnMut(&str) -> bool,
        F: FnOnce(&mut WaitOptions),
    {
        let mut options = WaitOptions::new();
        configure(&mut options);
        self.wait_for_output_with(predicate, options).await
    }

    /// Wait for output matching `predicate`.
    ///
    /// The buffered output is drained first and tested as one newline-joined
    /// string; a match returns `true` without waiting. The drained output is
    /// not put back, even when it does not match.
    ///
    /// Otherwise every new line is tested on its own until one matches. The
    /// wait gives up and returns `false` when the process timeout elapses,
    /// when no line arrives within the idle timeout, when the caller's token
    /// fires, or when the process exits without a match.
    pub async fn wait_for_output_with<P>(&self, mut predicate: P, options: WaitOptions) -> bool
    where
        P: FnMut(&str) -> bool,
    {
        let buffered = self.drain_output();
        if predicate(&buffered) {
            trace!(pid = self.pid(), "buffered output matched");
            return true;
        }

        let idle = IdleTimeoutCanceller::new(options.idle_timeout);
        let linked = LinkedCancellation::new()
            .with_deadline(options.process_timeout)
            .with_optional_token(idle.is_enabled().then(|| idle.token().clone()))
            .with_optional_token(options.cancellation);

        let mut lines = std::pin::pin!(self.stream_all_with(linked.token().clone()));
        while let Some(line) = lines.next().await {
            idle.ping();
            if predicate(&line) {
                return true;
            }
        }

        trace!(
            pid = self.pid(),
            idle_timed_out = idle.is_fired(),
            cancelled = linked.is_cancelled(),
            "no matching output"
        );
        false
    }
}
