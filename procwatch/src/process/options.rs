//! Configuration for launching a process and for waiting on its output.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::terminate::Terminate;

/// Configuration applied when a [`ProcessWrapper`](super::ProcessWrapper) starts
/// and when it is disposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// What to terminate when the wrapper is disposed (default: the process).
    pub when_disposing: Terminate,

    /// Environment variables to set (merged with the current env).
    pub environment_variables: HashMap<String, String>,
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the termination policy applied on disposal.
    #[must_use]
    pub fn when_disposing(mut self, policy: Terminate) -> Self {
        self.when_disposing = policy;
        self
    }

    /// Boolean form of [`when_disposing`](Self::when_disposing).
    ///
    /// `false` disables termination. `true` terminates the process, keeping
    /// `EntireProcessTree` if that was already selected.
    #[must_use]
    pub fn terminate_when_disposing(mut self, terminate: bool) -> Self {
        self.when_disposing = match (terminate, self.when_disposing) {
            (false, _) => Terminate::No,
            (true, Terminate::No) => Terminate::Yes,
            (true, policy) => policy,
        };
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.environment_variables.insert(k.into(), v.into());
        }
        self
    }
}

/// Limits for a single wait on process output.
///
/// Zero durations disable the respective timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Give up this long after the wait started, regardless of activity.
    #[serde(with = "millis")]
    pub process_timeout: Duration,

    /// Give up when no new output arrives for this long.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,

    /// Caller-owned cancellation.
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
