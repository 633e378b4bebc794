//! # crelish
//!
//! Command line client for a crelish content root. It is a thin shell over
//! the `crelish` library: every command opens the site, runs one library
//! operation and prints the result.
//!
//! ## Finding the Site
//!
//! The configuration is looked up in this order:
//!
//! 1. `--config <FILE>` when given
//! 2. the nearest `crelish.toml` walking up from the current directory
//! 3. the per-user `crelish.toml` in the platform config directory
//! 4. environment variables only (`CRELISH_CONTENT_ROOT` and friends)
//!
//! Relative paths in a config file are taken relative to that file.
//!
//! ## Output
//!
//! Data (records, pages, columns, descriptors) is printed as pretty JSON on
//! stdout so it can be piped into `jq`. Mutations print one status line.
//! Diagnostics go to stderr through `tracing`; `-v` turns on debug output and
//! `RUST_LOG` overrides both.
//!
//! ## Exit Codes
//!
//! `0` on success, `1` on any error, including validation failures.

mod cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
