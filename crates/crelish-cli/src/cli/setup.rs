use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "crelish",
    bin_name = "crelish",
    version,
    disable_help_subcommand = true
)]
#[command(about = "Query and edit a crelish content root", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a crelish.toml (default: nearest one above the current directory)
    #[arg(short, long, global = true, help_heading = "Options")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, help_heading = "Options")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List records of a content type
    #[command(alias = "ls", display_order = 1)]
    List {
        /// Content type, e.g. event
        ctype: String,

        /// Field condition: key=value, or key=op:a[:b] with op one of
        /// strict, noempty, lt, gt, between
        #[arg(short, long = "filter", value_name = "CONDITION")]
        filters: Vec<String>,

        /// Words that must all appear somewhere in the record
        #[arg(short, long)]
        search: Option<String>,

        /// Sort order, e.g. "title desc" or "price:asc"
        #[arg(long)]
        sort: Option<String>,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page (default: page_size from the config)
        #[arg(long)]
        page_size: Option<usize>,

        /// Print stored values instead of processed ones, unpaged
        #[arg(long)]
        raw: bool,
    },

    /// Show one record
    #[command(alias = "v", display_order = 2)]
    Get { ctype: String, uuid: String },

    /// Create a record, or update one with --uuid
    #[command(display_order = 3)]
    Save {
        ctype: String,

        /// Update this record instead of creating a new one
        #[arg(long)]
        uuid: Option<String>,

        /// Read attributes as a JSON object from stdin
        #[arg(long)]
        stdin: bool,

        /// Attributes as key=value pairs
        #[arg(value_name = "KEY=VALUE")]
        values: Vec<String>,
    },

    /// Delete a record
    #[command(alias = "rm", display_order = 4)]
    Delete { ctype: String, uuid: String },

    /// Show the grid columns of a content type
    #[command(display_order = 10)]
    Columns { ctype: String },

    /// Drop cached listings (all of them when no type is given)
    #[command(display_order = 11)]
    Flush { ctype: Option<String> },

    /// Show the model descriptor a content type resolves to
    #[command(display_order = 12)]
    Resolve { ctype: String },

    /// Look up which record owns a slug
    #[command(display_order = 13)]
    Slug { slug: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_collects_repeated_filters() {
        let cli = Cli::parse_from([
            "crelish", "list", "event", "-f", "price=gt:3", "--filter", "title=party", "--raw",
        ]);
        match cli.command {
            Commands::List {
                ctype,
                filters,
                raw,
                page,
                ..
            } => {
                assert_eq!(ctype, "event");
                assert_eq!(filters, vec!["price=gt:3", "title=party"]);
                assert!(raw);
                assert_eq!(page, 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::parse_from(["crelish", "flush", "-v", "--config", "site/crelish.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("site/crelish.toml")));
        assert!(matches!(cli.command, Commands::Flush { ctype: None }));
    }
}
