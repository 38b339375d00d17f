//! Command line of the test subject.

use clap::{Parser, ValueEnum};

/// A process that prints predictable output, used to exercise procwatch
#[derive(Parser, Debug)]
#[command(name = "testee")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Exit code to return
    #[arg(long = "exitcode", default_value_t = 0)]
    pub exit_code: u8,

    /// Print an increasing counter instead of the greeting
    #[arg(short = 'i', long = "infinitecounter")]
    pub infinite_counter: bool,

    /// Milliseconds added to the counter interval after each line
    #[arg(long = "counterdelay", default_value_t = 0)]
    pub counter_delay: u64,

    /// Where to write the output lines
    #[arg(short = 'o', long = "outputmode", value_enum, default_value_t = OutputMode::MixBoth)]
    pub output_mode: OutputMode,

    /// Block until a line is read from stdin before exiting
    #[arg(short = 'n', long = "neverexit")]
    pub never_exit: bool,

    /// Launch another testee that never exits and print its process id
    #[arg(long = "spawnchildprocess")]
    pub spawn_child_process: bool,

    /// Print the value of this environment variable
    #[arg(long = "showenvvar")]
    pub show_env_var: Option<String>,
}

/// Output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputMode {
    /// Alternate between stdout and stderr, starting with stdout
    MixBoth,
    /// Write everything to stdout
    StdOut,
    /// Write everything to stderr
    StdErr,
}
