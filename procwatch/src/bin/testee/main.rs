//! Testee - a test subject for procwatch.
//!
//! Prints a short greeting (or a counter) to stdout and stderr, can spawn a
//! child of its own, can block forever, and exits with a chosen code.

mod args;

use std::io::{self, BufRead, Write};
use std::process::{Command, ExitCode, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use args::{Args, OutputMode};

const GREETING: [&str; 4] = ["Hello,", "everyone.", "Nice to", "meet you."];

/// Writes lines to stdout or stderr according to the output mode.
struct LineWriter {
    mode: OutputMode,
    to_stderr: bool,
}

impl LineWriter {
    fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            to_stderr: mode == OutputMode::StdErr,
        }
    }

    fn write_line(&mut self, text: &str) -> Result<()> {
        if self.to_stderr {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{text}")?;
            stderr.flush()?;
        } else {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{text}")?;
            stdout.flush()?;
        }

        if self.mode == OutputMode::MixBoth {
            self.to_stderr = !self.to_stderr;
        }
        Ok(())
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let mut writer = LineWriter::new(args.output_mode);

    if args.spawn_child_process {
        let pid = spawn_child_process()?;
        println!("Child Process Id: {pid}");
    }

    if let Some(ref name) = args.show_env_var {
        let value = std::env::var(name).unwrap_or_default();
        writer.write_line(&format!("{name}: \"{value}\""))?;
    } else if args.infinite_counter {
        infinite_counter(&mut writer, args.counter_delay)?;
    } else {
        greeting(&mut writer)?;
    }

    if args.never_exit {
        println!("Press any keys to exit.");
        wait_for_input();
    }

    Ok(ExitCode::from(args.exit_code))
}

fn greeting(writer: &mut LineWriter) -> Result<()> {
    for line in GREETING {
        writer.write_line(line)?;
        thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

fn infinite_counter(writer: &mut LineWriter, counter_delay: u64) -> Result<()> {
    let mut interval = 100;
    for count in 0..10_000 {
        if counter_delay == 0 {
            writer.write_line(&count.to_string())?;
        } else {
            writer.write_line(&format!("{count} ({interval} msec)"))?;
        }
        thread::sleep(Duration::from_millis(interval));
        interval += counter_delay;
    }
    Ok(())
}

/// Start another testee that never exits, detached from our output pipes.
fn spawn_child_process() -> Result<u32> {
    let exe = std::env::current_exe().context("Failed to locate the testee executable")?;
    let child = Command::new(exe)
        .arg("-n")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn child testee")?;
    Ok(child.id())
}

/// Block until a line arrives on stdin. Without a usable stdin, block forever.
fn wait_for_input() {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(n) if n > 0 => {}
        _ => loop {
            thread::park();
        },
    }
}
