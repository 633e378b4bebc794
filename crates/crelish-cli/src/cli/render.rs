use anyhow::Result;
use colored::Colorize;
use crelish::validation::ValidationErrors;
use serde::Serialize;

pub(super) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(super) fn success(message: &str) {
    println!("{}", message.green());
}

/// One line per failing field, on stderr.
pub(super) fn validation_errors(errors: &ValidationErrors) {
    for (field, messages) in errors.iter() {
        for message in messages {
            eprintln!("{} {}", format!("{}:", field).yellow(), message.red());
        }
    }
}
