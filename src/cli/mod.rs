//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the `alma` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use alma_tree::application::OutputFormat;
use alma_tree::domain::GiftKind;
use alma_tree::infrastructure::{DEMO_EMAIL, DEMO_PASSWORD};

/// Alma - keep your life's memories as a tree and gift them to others.
///
/// IDs may be given in full or as the short prefix shown in tables.
#[derive(Parser, Debug)]
#[command(name = "alma")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format: table, markdown, or json.
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    /// Account email.
    #[arg(long, default_value = DEMO_EMAIL, global = true)]
    pub email: String,

    /// Account password.
    #[arg(long, default_value = DEMO_PASSWORD, global = true)]
    pub password: String,

    /// Configuration file (defaults to `<data_dir>/config.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register an account and plant its tree.
    Register {
        /// Display name.
        name: String,
    },

    /// Plant a tree for the current account.
    Init {
        /// Tree name.
        #[arg(default_value = "My tree")]
        name: String,
    },

    /// Show my tree.
    Show,

    /// Create a share token for my tree.
    Share,

    /// View someone else's tree through a share token.
    View {
        token: String,
    },

    /// Manage branches (life categories).
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Manage fruits (memories).
    Fruit {
        #[command(subcommand)]
        action: FruitAction,
    },

    /// Manage roots (ancestry).
    Root {
        #[command(subcommand)]
        action: RootAction,
    },

    /// Send, list and answer gifts.
    Gift {
        #[command(subcommand)]
        action: GiftAction,
    },

    /// List the branch categories.
    Categories,

    /// Show the active configuration.
    Config {
        /// Write the default config file if none exists.
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BranchAction {
    /// Add a branch.
    Add {
        name: String,
        /// Category id (see `alma categories`).
        #[arg(short, long, default_value = "family")]
        category: String,
    },
    /// Rename or recategorize a branch.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Remove a branch.
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum FruitAction {
    /// Add a memory to a branch.
    Add {
        /// Branch id.
        branch: String,
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Comma-separated tags.
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Comma-separated people.
        #[arg(short, long, value_delimiter = ',')]
        people: Vec<String>,
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Edit a memory.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Move to another branch.
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Remove a memory.
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum RootAction {
    /// Add an ancestry entry.
    Add { name: String, relation: String },
    /// Remove an ancestry entry.
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum GiftAction {
    /// Send a branch, fruit, tree or time capsule.
    Send {
        /// Gift type: branch, fruit, tree, timeCapsule.
        kind: GiftKind,
        /// Recipient user id.
        to: String,
        /// Id of the branch or fruit to give (ignored for `tree`).
        #[arg(default_value = "")]
        content: String,
        #[arg(short, long, default_value = "")]
        message: String,
        /// Unlock date for time capsules (YYYY-MM-DD).
        #[arg(short, long)]
        unlock: Option<String>,
    },
    /// List received gifts (or sent with `--sent`).
    List {
        #[arg(long)]
        sent: bool,
    },
    /// Accept a gift; its content joins my tree.
    Accept { id: String },
    /// Reject a gift.
    Reject { id: String },
    /// Mark a gift as seen.
    Seen { id: String },
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_demo_credentials() {
        let cli = Cli::try_parse_from(["alma", "show"]).unwrap();
        assert_eq!(cli.email, DEMO_EMAIL);
        assert_eq!(cli.password, DEMO_PASSWORD);
        assert!(matches!(cli.output_format(), Ok(OutputFormat::Table)));
    }

    #[test]
    fn test_gift_send_parses_kind() {
        let cli = Cli::try_parse_from([
            "alma", "gift", "send", "timeCapsule", "user_ana", "abc123", "-u", "2030-01-01",
        ])
        .unwrap();
        match cli.command {
            Commands::Gift {
                action: GiftAction::Send { kind, unlock, .. },
            } => {
                assert_eq!(kind, GiftKind::TimeCapsule);
                assert_eq!(unlock.as_deref(), Some("2030-01-01"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_fruit_tags_split_on_commas() {
        let cli =
            Cli::try_parse_from(["alma", "fruit", "add", "b1", "Beach", "-t", "summer,sea"]).unwrap();
        match cli.command {
            Commands::Fruit {
                action: FruitAction::Add { tags, .. },
            } => assert_eq!(tags, vec!["summer", "sea"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
