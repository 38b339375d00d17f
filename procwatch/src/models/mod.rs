//! Data models for captured process output.

mod fragment;

pub use fragment::{join_fragments, OutputFragment, OutputType};
