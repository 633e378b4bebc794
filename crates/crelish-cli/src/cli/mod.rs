//! # CLI Layer
//!
//! The only place that touches stdout, stderr and the process exit code.
//!
//! - `setup`: argument parsing via clap
//! - `commands`: dispatch from parsed arguments to library calls
//! - `args`: `key=value` argument grammar for filters and attributes
//! - `render`: JSON and status line output

mod args;
mod commands;
mod render;
pub mod setup;

pub use commands::run;
