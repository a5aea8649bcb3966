//! Command line interface
//!
//! Argument parsing and the runner that wires configuration, registry
//! client, store and pipeline together for a single conversion.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
