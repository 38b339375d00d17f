//! What happens to the child when its wrapper is disposed.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// How to terminate the process, or not, when the wrapper is disposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminate {
    /// Leave the process running.
    No,
    /// Kill the process. Its descendants keep running.
    #[default]
    Yes,
    /// Kill the process and all of its descendants.
    ///
    /// On Unix the process is started as the leader of a new process group and
    /// the whole group is killed; descendants that move to a group of their own
    /// escape. On Windows `taskkill /T` is used. Elsewhere only the process
    /// itself is killed.
    EntireProcessTree,
}

impl Terminate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Yes => "yes",
            Self::EntireProcessTree => "entire_process_tree",
        }
    }

    /// Adjust `command` so this policy can be applied later.
    pub(crate) fn prepare(self, command: &mut Command) {
        #[cfg(unix)]
        {
            if self == Self::EntireProcessTree {
                command.process_group(0);
            }
        }
        #[cfg(not(unix))]
        let _ = command;
    }
}

impl std::fmt::Display for Terminate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kill every process in the tree rooted at `pid`.
#[cfg(unix)]
pub(crate) fn kill_process_tree(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL).map_err(io::Error::from)
}

#[cfg(windows)]
pub(crate) fn kill_process_tree(pid: u32) -> io::Result<()> {
    use std::process::{Command, Stdio};

    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn kill_process_tree(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process tree termination is not supported on this platform",
    ))
}

/// Whether a termination error only means the target had already exited.
pub(crate) fn is_already_gone(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32) {
            return true;
        }
    }
    err.kind() == io::ErrorKind::NotFound
}
