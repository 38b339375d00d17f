//! Captured output line tagged with the stream it came from.

use serde::{Deserialize, Serialize};

/// Which output stream of the child a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputType {
    /// Standard output.
    StdOut,
    /// Standard error.
    StdErr,
}

impl OutputType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StdOut => "StdOut",
            Self::StdErr => "StdErr",
        }
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete line of output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFragment {
    /// Stream the line was read from.
    pub output_type: OutputType,
    /// Text of the line.
    pub data: String,
}

impl OutputFragment {
    /// Create a new fragment.
    pub fn new(output_type: OutputType, data: impl Into<String>) -> Self {
        Self {
            output_type,
            data: data.into(),
        }
    }

    pub fn is_std_out(&self) -> bool {
        self.output_type == OutputType::StdOut
    }

    pub fn is_std_err(&self) -> bool {
        self.output_type == OutputType::StdErr
    }
}

impl std::fmt::Display for OutputFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} \"{}\"", self.output_type, self.data)
    }
}

/// Join the text of `fragments` with `\n`.
pub fn join_fragments<'a, I>(fragments: I) -> String
where
    I: IntoIterator<Item = &'a OutputFragment>,
{
    fragments
        .into_iter()
        .map(|fragment| fragment.data.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
