//! Cancellation that fires when no activity is reported for a while.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A resettable countdown that cancels its token unless pinged in time.
///
/// The countdown starts when the canceller is created. Each [`ping`](Self::ping)
/// restarts it from the full interval. Once the token fires it stays fired.
/// A zero interval disables the countdown and the token never fires.
///
/// Dropping the canceller stops the countdown without firing the token.
#[derive(Debug)]
pub struct IdleTimeoutCanceller {
    token: CancellationToken,
    countdown: Option<Countdown>,
}

#[derive(Debug)]
struct Countdown {
    ping: Arc<Notify>,
    task: JoinHandle<()>,
}

impl IdleTimeoutCanceller {
    /// Start a countdown of `idle_timeout`.
    ///
    /// Must be called from within a tokio runtime unless `idle_timeout` is zero.
    pub fn new(idle_timeout: Duration) -> Self {
        let token = CancellationToken::new();
        if idle_timeout.is_zero() {
            return Self {
                token,
                countdown: None,
            };
        }

        let ping = Arc::new(Notify::new());
        let task = tokio::spawn(run_countdown(
            idle_timeout,
            Arc::clone(&ping),
            token.clone(),
        ));

        Self {
            token,
            countdown: Some(Countdown { ping, task }),
        }
    }

    /// The token cancelled when the countdown expires.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub const fn is_enabled(&self) -> bool {
        self.countdown.is_some()
    }

    /// Restart the countdown. Does nothing once the token has fired.
    pub fn ping(&self) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(countdown) = &self.countdown {
            // A stored permit covers a ping that lands while the countdown
            // task is between iterations.
            countdown.ping.notify_one();
        }
    }
}

impl Drop for IdleTimeoutCanceller {
    fn drop(&mut self) {
        if let Some(countdown) = &self.countdown {
            countdown.task.abort();
        }
    }
}

async fn run_countdown(interval: Duration, ping: Arc<Notify>, token: CancellationToken) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {
                token.cancel();
                return;
            }
            () = ping.notified() => {}
        }
    }
}
