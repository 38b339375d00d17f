//! A child process whose output is captured as it arrives.
//!
//! Provides:
//! - Line capture of stdout and stderr into a drainable buffer
//! - Live streams over the same lines, optionally filtered by stream
//! - Exit code tracking that never blocks
//! - Termination of the process (or its whole tree) when the wrapper is disposed

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_stream::stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::options::ProcessOptions;
use super::terminate::{self, Terminate};
use crate::error::{ProcessError, Result};
use crate::models::{join_fragments, OutputFragment, OutputType};

/// Exit code recorded when the wrapper is disposed before the process exit was observed.
///
/// This is a placeholder, not a report of success.
pub const DISPOSED_EXIT_CODE: i32 = 0;

/// How long the readers may keep draining the pipes after the process exited.
const OUTPUT_FLUSH_GRACE: Duration = Duration::from_millis(500);

/// How long a killed process is given to be reaped before its handle is dropped.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// How often the watcher checks whether the process has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// State shared between the wrapper, its reader tasks and its exit watcher.
#[derive(Debug)]
struct Shared {
    log: Mutex<OutputLog>,
    exit_code: OnceLock<i32>,
    exited: CancellationToken,
    /// Present until disposal takes it; the watcher polls it in the meantime.
    child: Mutex<Option<Child>>,
}

/// The buffer and the sending half of the queue, updated in one critical section.
#[derive(Debug)]
struct OutputLog {
    fragments: Vec<OutputFragment>,
    queue: mpsc::UnboundedSender<OutputFragment>,
}

impl Shared {
    fn new(queue: mpsc::UnboundedSender<OutputFragment>, child: Child) -> Self {
        Self {
            log: Mutex::new(OutputLog {
                fragments: Vec::new(),
                queue,
            }),
            exit_code: OnceLock::new(),
            exited: CancellationToken::new(),
            child: Mutex::new(Some(child)),
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking exit check. `None` while running or once disposal took the handle.
    fn poll_exit(&self) -> std::io::Result<Option<ExitStatus>> {
        match self.lock_child().as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    fn lock_log(&self) -> MutexGuard<'_, OutputLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, output_type: OutputType, data: String) {
        let fragment = OutputFragment::new(output_type, data);
        let mut log = self.lock_log();
        log.fragments.push(fragment.clone());
        // The receiver lives as long as the wrapper, so this only fails during teardown.
        let _ = log.queue.send(fragment);
    }

    /// Returns `true` if this call set the exit code.
    fn resolve_exit_code(&self, code: i32) -> bool {
        self.exit_code.set(code).is_ok()
    }
}

/// A running (or finished) child process with captured output.
///
/// Both output streams are read line by line from the moment the process
/// starts. Every line is appended to an internal buffer, which the
/// snapshot accessors ([`output`](Self::output), [`std_output`](Self::std_output),
/// [`std_error`](Self::std_error)) read and the drain accessors empty, and is
/// also queued for the live streams ([`stream_all`](Self::stream_all) and
/// friends).
///
/// The queue has a single set of entries shared by every live stream: when
/// two streams are consumed at the same time, each line goes to only one of
/// them. Drain the buffer instead when several independent views are needed.
///
/// Dropping the wrapper disposes it; see [`dispose`](Self::dispose).
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use procwatch::{ProcessOptions, ProcessWrapper};
///
/// #[tokio::main]
/// async fn main() -> procwatch::Result<()> {
///     let process = ProcessWrapper::start("ping", ["localhost"], None, ProcessOptions::new())?;
///
///     let replied = process
///         .wait_for_output(|line| line.contains("bytes from"), Duration::from_secs(5))
///         .await;
///     assert!(replied);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ProcessWrapper {
    program: String,
    pid: Option<u32>,
    options: ProcessOptions,
    shared: Arc<Shared>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutputFragment>>,
    readers: Vec<AbortHandle>,
    disposed: AtomicBool,
}

impl ProcessWrapper {
    /// Start `program` with `args`, optionally in `working_dir`.
    ///
    /// Returns as soon as the process is created; output is captured in the
    /// background. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Launch`] if the executable cannot be found or the OS
    /// refuses to create the process.
    pub fn start<P, I, S>(
        program: P,
        args: I,
        working_dir: Option<&Path>,
        options: ProcessOptions,
    ) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);

        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        Self::start_command(command, options)
    }

    /// Start a caller-prepared command.
    ///
    /// stdout and stderr are always piped and stdin is always null, whatever
    /// the command had configured.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Launch`] if the process cannot be created.
    pub fn start_command(mut command: Command, options: ProcessOptions) -> Result<Self> {
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();

        command.envs(&options.environment_variables);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        options.when_disposing.prepare(&mut command);

        let mut child = command.spawn().map_err(|source| ProcessError::Launch {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(program = %program, pid, policy = %options.when_disposing, "process started");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (queue, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(queue, child));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            readers.push(spawn_reader(stdout, OutputType::StdOut, Arc::clone(&shared)));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_reader(stderr, OutputType::StdErr, Arc::clone(&shared)));
        }
        let reader_aborts = readers.iter().map(JoinHandle::abort_handle).collect();

        tokio::spawn(watch_exit(pid, readers, Arc::clone(&shared)));

        Ok(Self {
            program,
            pid,
            options,
            shared,
            receiver: tokio::sync::Mutex::new(receiver),
            readers: reader_aborts,
            disposed: AtomicBool::new(false),
        })
    }

    /// The program this wrapper started.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Options the process was started with.
    pub const fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// The exit code, once the process exited or the wrapper was disposed.
    ///
    /// A process killed by a signal on Unix reports `128 + signal`. A wrapper
    /// disposed before its process exit was observed reports
    /// [`DISPOSED_EXIT_CODE`].
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.exit_code.get().copied()
    }

    /// Whether the process exited (and its output was collected) or the wrapper was disposed.
    pub fn has_exited(&self) -> bool {
        self.shared.exited.is_cancelled()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Wait until the process exits or the wrapper is disposed, and return the exit code.
    ///
    /// On a natural exit the output the process wrote before exiting is in the
    /// buffer by the time this returns.
    pub async fn wait_for_exit(&self) -> Option<i32> {
        self.shared.exited.cancelled().await;
        self.exit_code()
    }

    /// All buffered output, newline-joined.
    pub fn output(&self) -> String {
        self.snapshot(|_| true)
    }

    /// Buffered stdout lines, newline-joined.
    pub fn std_output(&self) -> String {
        self.snapshot(OutputFragment::is_std_out)
    }

    /// Buffered stderr lines, newline-joined.
    pub fn std_error(&self) -> String {
        self.snapshot(OutputFragment::is_std_err)
    }

    /// Newline-join of the buffered fragments matching `predicate`. Nothing is removed.
    pub fn snapshot<P>(&self, predicate: P) -> String
    where
        P: Fn(&OutputFragment) -> bool,
    {
        let fragments = self.shared.lock_log().fragments.clone();
        join_fragments(fragments.iter().filter(|&fragment| predicate(fragment)))
    }

    /// Remove and return the buffered fragments matching `predicate`.
    ///
    /// Fragments that do not match stay buffered. The predicate runs while the
    /// buffer is locked and must not call back into the wrapper.
    pub fn drain_fragments<P>(&self, predicate: P) -> Vec<OutputFragment>
    where
        P: FnMut(&OutputFragment) -> bool,
    {
        let mut predicate = predicate;
        let mut log = self.shared.lock_log();
        let (drained, kept) = std::mem::take(&mut log.fragments)
            .into_iter()
            .partition(|fragment| predicate(fragment));
        log.fragments = kept;
        drained
    }

    /// Remove every buffered fragment and return their text, newline-joined.
    pub fn drain_output(&self) -> String {
        join_fragments(&self.drain_fragments(|_| true))
    }

    /// Remove the buffered stdout fragments and return their text, newline-joined.
    pub fn drain_std_output(&self) -> String {
        join_fragments(&self.drain_fragments(OutputFragment::is_std_out))
    }

    /// Remove the buffered stderr fragments and return their text, newline-joined.
    pub fn drain_std_error(&self) -> String {
        join_fragments(&self.drain_fragments(OutputFragment::is_std_err))
    }

    /// Live fragments from both streams.
    ///
    /// The stream ends once the process has exited and everything it wrote
    /// has been yielded, or when the wrapper is disposed. It competes with
    /// other live streams for fragments; see the type-level docs.
    pub fn stream_fragments(&self) -> impl Stream<Item = OutputFragment> + '_ {
        self.stream_fragments_with(CancellationToken::new())
    }

    /// [`stream_fragments`](Self::stream_fragments) that also ends when `cancellation` fires.
    pub fn stream_fragments_with(
        &self,
        cancellation: CancellationToken,
    ) -> impl Stream<Item = OutputFragment> + '_ {
        stream! {
            while let Some(fragment) = self.next_fragment(&cancellation).await {
                yield fragment;
            }
        }
    }

    /// Live lines from both streams.
    pub fn stream_all(&self) -> impl Stream<Item = String> + '_ {
        self.stream_all_with(CancellationToken::new())
    }

    /// [`stream_all`](Self::stream_all) that also ends when `cancellation` fires.
    pub fn stream_all_with(
        &self,
        cancellation: CancellationToken,
    ) -> impl Stream<Item = String> + '_ {
        self.stream_fragments_with(cancellation)
            .map(|fragment| fragment.data)
    }

    /// Live stdout lines.
    pub fn stream_std_out(&self) -> impl Stream<Item = String> + '_ {
        self.stream_std_out_with(CancellationToken::new())
    }

    /// [`stream_std_out`](Self::stream_std_out) that also ends when `cancellation` fires.
    pub fn stream_std_out_with(
        &self,
        cancellation: CancellationToken,
    ) -> impl Stream<Item = String> + '_ {
        self.stream_fragments_with(cancellation)
            .filter(OutputFragment::is_std_out)
            .map(|fragment| fragment.data)
    }

    /// Live stderr lines.
    pub fn stream_std_err(&self) -> impl Stream<Item = String> + '_ {
        self.stream_std_err_with(CancellationToken::new())
    }

    /// [`stream_std_err`](Self::stream_std_err) that also ends when `cancellation` fires.
    pub fn stream_std_err_with(
        &self,
        cancellation: CancellationToken,
    ) -> impl Stream<Item = String> + '_ {
        self.stream_fragments_with(cancellation)
            .filter(OutputFragment::is_std_err)
            .map(|fragment| fragment.data)
    }

    async fn next_fragment(&self, cancellation: &CancellationToken) -> Option<OutputFragment> {
        let mut receiver = tokio::select! {
            biased;
            () = cancellation.cancelled() => return None,
            receiver = self.receiver.lock() => receiver,
        };

        tokio::select! {
            biased;
            () = cancellation.cancelled() => None,
            fragment = receiver.recv() => fragment,
            () = self.shared.exited.cancelled() => receiver.try_recv().ok(),
        }
    }

    /// Stop capturing and apply the termination policy.
    ///
    /// Only the first call has an effect; later or concurrent calls return
    /// immediately. The kill is issued before this returns, so it happens even
    /// if the runtime shuts down right after. Disposal never fails:
    /// termination errors are logged and ignored. Live streams and waits end.
    /// The exit code is the real one if the process had already exited, and
    /// [`DISPOSED_EXIT_CODE`] otherwise.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        for reader in &self.readers {
            reader.abort();
        }

        let policy = self.options.when_disposing;
        let child = self.shared.lock_child().take();
        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.shared.resolve_exit_code(exit_code_of(status));
                }
                running => {
                    if let Err(e) = running {
                        warn!(pid = self.pid, error = %e, "failed to check process status at disposal");
                    }
                    terminate_child(&mut child, self.pid, policy);
                    release(child, self.pid, policy);
                }
            }
        }

        let placeholder = self.shared.resolve_exit_code(DISPOSED_EXIT_CODE);
        self.shared.exited.cancel();

        debug!(
            program = %self.program,
            pid = self.pid,
            policy = %policy,
            exit_code = self.exit_code(),
            placeholder,
            "process wrapper disposed"
        );
    }
}

impl Drop for ProcessWrapper {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_reader<R>(stream: R, output_type: OutputType, shared: Arc<Shared>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => shared.record(output_type, decode_line(&line)),
                Err(e) => {
                    debug!(%output_type, error = %e, "stopped reading process output");
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily.
fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Polls the child until it exits or the wrapper is disposed.
async fn watch_exit(pid: Option<u32>, readers: Vec<JoinHandle<()>>, shared: Arc<Shared>) {
    loop {
        match shared.poll_exit() {
            Ok(Some(status)) => {
                let code = exit_code_of(status);
                shared.resolve_exit_code(code);
                debug!(pid, exit_code = code, "process exited");
                break;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(pid, error = %e, "failed to wait for process");
                break;
            }
        }

        tokio::select! {
            biased;
            () = shared.exited.cancelled() => return,
            () = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
        }
    }

    // A descendant that inherited the pipes can keep them open long after
    // the process itself is gone.
    let flushed = tokio::time::timeout(OUTPUT_FLUSH_GRACE, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if flushed.is_err() {
        debug!(pid, "output pipes still open after exit");
    }

    shared.exited.cancel();
}

fn terminate_child(child: &mut Child, pid: Option<u32>, policy: Terminate) {
    let result = match (policy, pid) {
        (Terminate::No, _) => return,
        (Terminate::EntireProcessTree, Some(pid)) => terminate::kill_process_tree(pid),
        (Terminate::Yes | Terminate::EntireProcessTree, _) => child.start_kill(),
    };
    if let Err(e) = result {
        log_termination_failure(pid, policy, &e);
    }
}

/// Drop the handle, reaping a killed process in the background when a runtime is available.
///
/// Without a runtime the handle is dropped as is and tokio reaps the process later.
fn release(mut child: Child, pid: Option<u32>, policy: Terminate) {
    if policy == Terminate::No {
        return;
    }
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                debug!(pid, "killed process not reaped in time");
            }
        });
    }
}

fn log_termination_failure(pid: Option<u32>, policy: Terminate, err: &std::io::Error) {
    if terminate::is_already_gone(err) {
        debug!(pid, policy = %policy, "process already gone at disposal");
    } else {
        warn!(pid, policy = %policy, error = %err, "failed to terminate process");
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
