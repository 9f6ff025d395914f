//! Output formatting for trees and gifts.
//!
//! Supports multiple output formats: Markdown, JSON, and table view.

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::{Gift, GiftStatus, Tree, CATEGORIES};

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Compact table listing.
    #[default]
    Table,
    /// Human-readable Markdown format.
    Markdown,
    /// JSON format for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => Err(format!("Unknown format: {s}. Use: markdown, json, table")),
        }
    }
}

/// Formats a tree as Markdown: roots, then each branch with its memories.
pub fn format_tree_markdown(tree: &Tree) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", tree.name));
    out.push_str(&format!(
        "**Created:** {}\n",
        tree.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "**Branches:** {} | **Memories:** {} | **Roots:** {}\n\n",
        tree.branches.len(),
        tree.fruits.len(),
        tree.roots.len()
    ));

    if !tree.roots.is_empty() {
        out.push_str("## Roots\n\n");
        for root in &tree.roots {
            out.push_str(&format!("- {} ({})\n", root.name, root.relation));
        }
        out.push('\n');
    }

    for branch in &tree.branches {
        let shared = if branch.is_shared { " · shared" } else { "" };
        out.push_str(&format!(
            "## {} `{}`{shared}\n\n",
            branch.name, branch.category_id
        ));

        let mut empty = true;
        for fruit in tree.fruits_of(&branch.id) {
            empty = false;
            out.push_str(&format!("### {}\n\n", fruit.title));
            out.push_str(&format!("*{}*\n\n", fruit.created_at.format("%Y-%m-%d")));
            if !fruit.description.is_empty() {
                out.push_str(&fruit.description);
                out.push_str("\n\n");
            }
            if let Some(location) = &fruit.location {
                out.push_str(&format!("📍 {}\n\n", location.name));
            }
            if !fruit.tags.is_empty() {
                out.push_str(&format!("Tags: {}\n\n", fruit.tags.join(", ")));
            }
            if !fruit.people.is_empty() {
                out.push_str(&format!("With: {}\n\n", fruit.people.join(", ")));
            }
        }
        if empty {
            out.push_str("_No memories yet_\n\n");
        }
    }

    out
}

/// Formats a tree as JSON, with the wire field names.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_tree_json(tree: &Tree) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tree)
}

/// Formats a table of the tree's branches and memories.
pub fn format_tree_table(tree: &Tree) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Kind", "Branch", "Title", "Created"]);

    for branch in &tree.branches {
        table.add_row(vec![
            short_id(&branch.id).to_string(),
            "branch".to_string(),
            branch.category_id.clone(),
            truncate(&branch.name, 35),
            format_date(branch.created_at),
        ]);
        for fruit in tree.fruits_of(&branch.id) {
            table.add_row(vec![
                short_id(&fruit.id).to_string(),
                "fruit".to_string(),
                short_id(&branch.id).to_string(),
                truncate(&fruit.title, 35),
                format_date(fruit.created_at),
            ]);
        }
    }
    for root in &tree.roots {
        table.add_row(vec![
            short_id(&root.id).to_string(),
            "root".to_string(),
            "-".to_string(),
            truncate(&format!("{} ({})", root.name, root.relation), 35),
            format_date(root.created_at),
        ]);
    }

    format!("{}\n{}", tree.name.bold(), table)
}

/// Formats a table of gifts.
pub fn format_gifts_table(gifts: &[Gift], now: DateTime<Utc>) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Type", "From", "To", "Status", "Unlocks", "Message"]);

    for gift in gifts {
        let status = match gift.status {
            GiftStatus::Pending => "pending".yellow(),
            GiftStatus::Accepted => "accepted".green(),
            GiftStatus::Rejected => "rejected".red(),
        };
        let status = if gift.is_new {
            format!("{status} •")
        } else {
            status.to_string()
        };
        let unlocks = gift.unlock_date.map_or_else(
            || "-".to_string(),
            |date| {
                if gift.is_unlocked(now) {
                    format!("{} (open)", format_date(date))
                } else {
                    format_date(date)
                }
            },
        );

        table.add_row(vec![
            short_id(&gift.id).to_string(),
            gift.kind.to_string(),
            gift.sender_name.clone(),
            gift.recipient_id.clone(),
            status,
            unlocks,
            truncate(&gift.message, 30),
        ]);
    }

    table.to_string()
}

/// Formats the category catalog.
pub fn format_categories() -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Name", "Color"]);
    for category in CATEGORIES {
        table.add_row(vec![category.id, category.name, category.color]);
    }
    table.to_string()
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M").to_string()
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(end, _)| &id[..end])
}

/// Truncates a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{cut}...")
    }
}
