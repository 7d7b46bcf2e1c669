use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tierline")]
#[command(version)]
#[command(about = "Adaptive request routing over cost-tiered backends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the default config and create the state database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Route one request, or a JSONL batch concurrently
    Route {
        /// Request text
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,

        /// JSONL file with one {"text", "resources"?, "id"?} object per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Resource touched by the request (repeatable)
        #[arg(short, long = "resource")]
        resources: Vec<String>,

        /// Minimum backend capability, 1-10
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        min_capability: Option<u8>,

        /// Write results as JSONL here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Classify a request without routing it
    Classify { text: String },

    /// Mark a resource stale and drop cached results built with it
    Invalidate { resource_id: String },

    /// Show backend health
    Health,

    /// Show relevance tiers and cache size
    Status,

    /// View the dispatch log
    History {
        /// Number of most recent records
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Aggregate per backend tier instead of listing records
        #[arg(long)]
        stats: bool,
    },

    /// Print version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::try_parse_from(["tierline", "version"]);
        assert!(cli.is_ok());
        assert!(matches!(cli.unwrap().command, Commands::Version));
    }

    #[test]
    fn test_cli_parse_route_text() {
        let cli = Cli::try_parse_from([
            "tierline",
            "route",
            "--text",
            "fix the login bug",
            "-r",
            "src/auth.rs",
            "--resource",
            "docs/auth.md",
        ])
        .unwrap();
        match cli.command {
            Commands::Route {
                text, resources, ..
            } => {
                assert_eq!(text.as_deref(), Some("fix the login bug"));
                assert_eq!(resources, vec!["src/auth.rs", "docs/auth.md"]);
            }
            _ => panic!("Expected Route command"),
        }
    }

    #[test]
    fn test_cli_route_text_and_file_conflict() {
        let cli = Cli::try_parse_from([
            "tierline", "route", "--text", "a", "--file", "b.jsonl",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_min_capability_range() {
        assert!(Cli::try_parse_from(["tierline", "route", "-t", "x", "--min-capability", "11"]).is_err());
        assert!(Cli::try_parse_from(["tierline", "route", "-t", "x", "--min-capability", "8"]).is_ok());
    }

    #[test]
    fn test_cli_parse_history() {
        let cli = Cli::try_parse_from(["tierline", "history", "--stats", "-l", "5"]).unwrap();
        if let Commands::History { limit, stats } = cli.command {
            assert_eq!(limit, 5);
            assert!(stats);
        } else {
            panic!("Expected History command");
        }
    }
}
