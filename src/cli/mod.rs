//! Command-line interface for the `mnet` binary.

mod commands;

pub use commands::{is_verbose, run};
