//! Command line interface
//!
//! Argument parsing (with config-file and environment fallbacks) and the
//! runner that drives one sync and prints its summary.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
