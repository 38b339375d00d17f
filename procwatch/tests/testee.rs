//! End-to-end tests driving the `testee` binary.

use std::time::{Duration, Instant};

use procwatch::{ProcessOptions, ProcessWrapper, Terminate, WaitOptions};
use regex::Regex;
use tokio_stream::StreamExt;

const TESTEE: &str = env!("CARGO_BIN_EXE_testee");

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start(args: &[&str]) -> ProcessWrapper {
    start_with(args, ProcessOptions::new())
}

fn start_with(args: &[&str], options: ProcessOptions) -> ProcessWrapper {
    init_tracing();
    ProcessWrapper::start(TESTEE, args, None, options).unwrap()
}

async fn collect_lines<S: tokio_stream::Stream<Item = String>>(stream: S) -> Vec<String> {
    let stream = std::pin::pin!(stream);
    stream.collect().await
}

/// Whether `pid` is alive. A zombie still answers signals but is no longer running.
#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
        let state = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next());
        state != Some("Z")
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok()
}

#[cfg(unix)]
async fn wait_until_stopped(pid: u32, timeout: Duration) -> bool {
    let began = Instant::now();
    while is_running(pid) {
        if began.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

#[cfg(unix)]
fn kill_quietly(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Ok(pid) = i32::try_from(pid) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

/// Start a testee that spawns a never-exiting child, and return the child's pid.
#[cfg(unix)]
async fn start_with_child_process(policy: Terminate) -> (ProcessWrapper, u32) {
    let parent = start_with(
        &["-n", "--spawnchildprocess"],
        ProcessOptions::new().when_disposing(policy),
    );

    let pattern = Regex::new(r"Child Process Id: (?<pid>\d+)").unwrap();
    let mut child_pid = None;
    let found = parent
        .wait_for_output(
            |output| {
                if let Some(captures) = pattern.captures(output) {
                    child_pid = captures["pid"].parse::<u32>().ok();
                    return true;
                }
                false
            },
            Duration::from_secs(5),
        )
        .await;
    assert!(found);

    (parent, child_pid.unwrap())
}

#[tokio::test]
async fn test_exit_code() {
    let process = start(&[]);
    assert_eq!(process.wait_for_exit().await, Some(0));

    let process = start(&["--exitcode", "123"]);
    assert_eq!(process.wait_for_exit().await, Some(123));
    assert_eq!(process.exit_code(), Some(123));
}

#[tokio::test]
async fn test_exit_code_of_running_process_is_none() {
    let process = start(&["--infinitecounter"]);
    assert_eq!(process.exit_code(), None);
}

#[tokio::test]
async fn test_start_when_file_not_found() {
    let missing = std::env::temp_dir().join(format!("{}.exe", uuid::Uuid::now_v7().simple()));
    let result = ProcessWrapper::start(&missing, [] as [&str; 0], None, ProcessOptions::new());

    let err = result.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[tokio::test]
async fn test_output() {
    let process = start(&[]);
    process.wait_for_exit().await;

    assert_eq!(process.output(), "Hello,\neveryone.\nNice to\nmeet you.");
    assert_eq!(process.std_output(), "Hello,\nNice to");
    assert_eq!(process.std_error(), "everyone.\nmeet you.");
}

#[tokio::test]
async fn test_output_modes() {
    let process = start(&["-o", "stderr"]);
    process.wait_for_exit().await;

    assert_eq!(process.std_output(), "");
    assert_eq!(process.std_error(), "Hello,\neveryone.\nNice to\nmeet you.");
}

#[tokio::test]
async fn test_stream_all() {
    let process = start(&[]);

    let lines = collect_lines(process.stream_all()).await;

    assert_eq!(lines, vec!["Hello,", "everyone.", "Nice to", "meet you."]);
    assert_eq!(process.exit_code(), Some(0));
}

#[tokio::test]
async fn test_stream_std_out() {
    let process = start(&["--exitcode", "234"]);

    let lines = collect_lines(process.stream_std_out()).await;

    assert_eq!(lines, vec!["Hello,", "Nice to"]);
    assert_eq!(process.exit_code(), Some(234));
}

#[tokio::test]
async fn test_stream_std_err() {
    let process = start(&[]);

    let lines = collect_lines(process.stream_std_err()).await;

    assert_eq!(lines, vec!["everyone.", "meet you."]);
    assert_eq!(process.exit_code(), Some(0));
}

#[tokio::test]
async fn test_drain_output_then_snapshot_continues_counter() {
    let process = start(&["-i", "-o", "mixboth"]);
    {
        let mut stream = std::pin::pin!(process.stream_all());
        assert!(stream.next().await.is_some());
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let drained = process.drain_output();
    let first: Vec<&str> = drained.split('\n').collect();
    assert!(!first.is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let rest = process.output();
    let second: Vec<&str> = rest.split('\n').collect();
    assert!(!second.is_empty());

    // Nothing lost or repeated between the drain and the snapshot.
    for (expected, line) in first.iter().chain(second.iter()).enumerate() {
        assert_eq!(*line, expected.to_string());
    }
}

#[tokio::test]
async fn test_wait_for_output() {
    let process = start(&["-i"]);

    let found = process
        .wait_for_output(|s| s == "20", Duration::from_secs(5))
        .await;

    assert!(found);
}

#[tokio::test]
async fn test_wait_for_output_after_exited() {
    let process = start(&[]);
    process.wait_for_exit().await;

    let found = process
        .wait_for_output(|s| s == "Nice to", Duration::from_secs(30))
        .await;

    assert!(found);
}

#[tokio::test]
async fn test_wait_for_output_after_exited_not_found() {
    let process = start(&[]);
    process.wait_for_exit().await;

    let found = process.wait_for_output(|_| false, Duration::from_secs(30)).await;

    assert!(!found);
}

#[tokio::test]
async fn test_wait_for_output_timed_out() {
    let process = start(&["-n"]);

    let began = Instant::now();
    let found = process
        .wait_for_output(|_| false, Duration::from_millis(3000))
        .await;
    let elapsed = began.elapsed();

    assert!(!found);
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(4500));
    assert_eq!(process.exit_code(), None);
}

#[tokio::test]
async fn test_wait_for_output_idle_timeout() {
    // The counter interval grows by 10ms per line and passes 200ms after ten lines.
    let process = start(&["--infinitecounter", "--counterdelay", "10"]);

    let found = tokio::time::timeout(
        Duration::from_secs(3),
        process.wait_for_output_configured(|_| false, |options| {
            options.idle_timeout = Duration::from_millis(200);
        }),
    )
    .await;

    assert_eq!(found, Ok(false));
}

#[tokio::test]
async fn test_wait_for_output_does_not_idle_timeout() {
    // A line every 100ms never leaves the wait idle for 200ms.
    let process = start(&["--infinitecounter"]);

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        process.wait_for_output_with(
            |_| false,
            WaitOptions::new().idle_timeout(Duration::from_millis(200)),
        ),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(process.exit_code(), None);
}

#[tokio::test]
async fn test_environment_variables() {
    let value = uuid::Uuid::now_v7().simple().to_string();
    let process = start_with(
        &["--showenvvar", "USERNAME"],
        ProcessOptions::new().env("USERNAME", value.clone()),
    );
    process.wait_for_exit().await;

    assert_eq!(process.output(), format!("USERNAME: \"{value}\""));
}

#[tokio::test]
async fn test_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let process = ProcessWrapper::start(TESTEE, [] as [&str; 0], Some(dir.path()), ProcessOptions::new())
        .unwrap();

    assert_eq!(process.wait_for_exit().await, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_entire_process_tree_when_disposing() {
    let (parent, child_pid) = start_with_child_process(Terminate::EntireProcessTree).await;
    let parent_pid = parent.pid().unwrap();

    parent.dispose();

    let child_stopped = wait_until_stopped(child_pid, Duration::from_secs(5)).await;
    let parent_stopped = wait_until_stopped(parent_pid, Duration::from_secs(5)).await;
    kill_quietly(child_pid);

    assert!(child_stopped);
    assert!(parent_stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_process_only_when_disposing() {
    let (parent, child_pid) = start_with_child_process(Terminate::Yes).await;
    let parent_pid = parent.pid().unwrap();

    parent.dispose();

    let parent_stopped = wait_until_stopped(parent_pid, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let child_running = is_running(child_pid);
    kill_quietly(child_pid);

    assert!(parent_stopped);
    assert!(child_running);
}

#[cfg(unix)]
#[tokio::test]
async fn test_do_not_terminate_when_disposing() {
    let (parent, child_pid) = start_with_child_process(Terminate::No).await;
    let parent_pid = parent.pid().unwrap();

    drop(parent);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let parent_running = is_running(parent_pid);
    let child_running = is_running(child_pid);
    kill_quietly(child_pid);
    kill_quietly(parent_pid);

    assert!(parent_running);
    assert!(child_running);
}
