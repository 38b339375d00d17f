//! A single cancellation token fed by several independent sources.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancellation that fires as soon as any linked source fires.
///
/// Sources are a relative deadline and any number of other tokens. Firing is
/// one-shot. Dropping the value detaches the sources without cancelling the
/// combined token.
#[derive(Debug, Default)]
pub struct LinkedCancellation {
    token: CancellationToken,
    watchers: Vec<JoinHandle<()>>,
}

impl LinkedCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire after `timeout`. A zero timeout adds nothing.
    #[must_use]
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.link(tokio::time::sleep(timeout));
        }
        self
    }

    /// Fire when `source` is cancelled.
    #[must_use]
    pub fn with_token(mut self, source: CancellationToken) -> Self {
        if source.is_cancelled() {
            self.token.cancel();
        } else {
            self.link(source.cancelled_owned());
        }
        self
    }

    /// Fire when `source` is cancelled, if there is one.
    #[must_use]
    pub fn with_optional_token(self, source: Option<CancellationToken>) -> Self {
        match source {
            Some(source) => self.with_token(source),
            None => self,
        }
    }

    /// The combined token.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn link<F>(&mut self, source: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return;
        }
        let token = self.token.clone();
        self.watchers.push(tokio::spawn(async move {
            tokio::select! {
                () = source => token.cancel(),
                () = token.cancelled() => {}
            }
        }));
    }
}

impl Drop for LinkedCancellation {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}
