//! Alma - a memory tree on the command line.
//!
//! Keeps one tree per account in a local `SQLite` backend: roots for
//! ancestry, branches for life categories, fruits for memories. Branches,
//! fruits, whole trees and time capsules can be gifted to other accounts.
//!
//! QUICK START:
//!   alma init "Ana's tree"                 # Plant a tree (demo account)
//!   alma branch add Travel -c travel       # Add a branch
//!   alma fruit add <branch> "Lisbon 2019"  # Add a memory
//!   alma show -f markdown                  # Read it back
//!   alma gift send fruit user_ana_example_com <fruit> -m "For you"

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alma_tree::application::{
    format_categories, format_gifts_table, format_tree_json, format_tree_markdown,
    format_tree_table, FetchOutcome, OutputFormat, Session,
};
use alma_tree::domain::{
    AppConfig, AppError, Branch, BranchChanges, Fruit, FruitChanges, Gift, GiftDraft, GiftKind,
    Location, Root, SystemClock, Tree,
};
use alma_tree::infrastructure::{
    config_file_path, ensure_config_exists, load_config, load_config_from_file, save_config_to,
    DemoIdentityProvider, IdentityProvider, SqliteRemote, TreeRemote,
};
use cli::{BranchAction, Cli, Commands, FruitAction, GiftAction, RootAction};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        let message = e
            .downcast_ref::<AppError>()
            .map_or_else(|| format!("{e:#}"), AppError::user_message);
        eprintln!("{} {}", "Error:".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output_format().map_err(|e| anyhow!(e))?;
    let config = match &cli.config {
        Some(path) => load_config_from_file(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Categories => {
            println!("{}", format_categories());
            return Ok(());
        }
        Commands::Config { init } => {
            let path = cli.config.clone().unwrap_or_else(config_file_path);
            return cmd_config(&config, &path, init);
        }
        _ => {}
    }

    let remote: Arc<dyn TreeRemote> = Arc::new(
        SqliteRemote::open(&config.database_path())
            .with_context(|| format!("Failed to open {}", config.database_path().display()))?
            .with_latency(config.latency()),
    );
    let identity = DemoIdentityProvider;

    let session = if let Commands::Register { name } = &cli.command {
        let auth = identity.register(name, &cli.email, &cli.password).await?;
        Session::start(auth.user, remote, config, Arc::new(SystemClock))
    } else {
        Session::login(
            &identity,
            &cli.email,
            &cli.password,
            remote,
            config,
            Arc::new(SystemClock),
        )
        .await?
    };

    let result = dispatch(&session, cli.command, format).await;
    session.logout();
    result
}

async fn dispatch(session: &Session, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Register { name } => {
            let tree = session.store().create_my_tree(&format!("{name}'s tree")).await?;
            println!(
                "{} Registered {} ({})",
                "✓".green().bold(),
                session.user().name.cyan(),
                session.user().id
            );
            println!("  Planted {}", tree.name.bold());
        }
        Commands::Init { name } => {
            let tree = session.store().create_my_tree(&name).await?;
            println!("{} Planted {} ({})", "✓".green().bold(), tree.name.bold(), tree.id);
        }
        Commands::Show => {
            // Loading gifts also copies any time capsule that has unlocked.
            session.load().await?;
            let tree = my_tree(session)?;
            print_tree(&tree, format)?;
            let unseen = session.gifts().unseen_count();
            if unseen > 0 {
                println!("\n{} {unseen} new gift(s), see `alma gift list`", "•".yellow());
            }
        }
        Commands::Share => {
            session.load().await?;
            my_tree(session)?;
            let token = session.store().share_my_tree().await?;
            println!("{} Share token: {}", "✓".green().bold(), token.cyan());
            println!("  Open with: alma view {token}");
        }
        Commands::View { token } => {
            if session.store().fetch_shared_tree(&token).await == FetchOutcome::Failed {
                bail!(store_error(session, "shared tree"));
            }
            let tree = session
                .store()
                .shared_tree()
                .ok_or_else(|| AppError::not_found("shared tree"))?;
            print_tree(&tree, format)?;
            session.store().leave_shared_view();
        }
        Commands::Branch { action } => cmd_branch(session, action).await?,
        Commands::Fruit { action } => cmd_fruit(session, action).await?,
        Commands::Root { action } => cmd_root(session, action).await?,
        Commands::Gift { action } => cmd_gift(session, action, format).await?,
        Commands::Categories | Commands::Config { .. } => {}
    }

    Ok(())
}

async fn cmd_branch(session: &Session, action: BranchAction) -> anyhow::Result<()> {
    session.load().await?;
    let tree = my_tree(session)?;
    let store = session.store();

    match action {
        BranchAction::Add { name, category } => {
            let branch = Branch::new(name, category);
            let id = branch.id.clone();
            store.add_branch(branch).await?;
            println!("{} Added branch {}", "✓".green().bold(), id);
        }
        BranchAction::Update {
            id,
            name,
            category,
            color,
        } => {
            let id = resolve(tree.branches.iter().map(|b| b.id.as_str()), &id, "branch")?;
            let changes = BranchChanges {
                name,
                category_id: category,
                color,
                ..Default::default()
            };
            store.update_branch(&id, changes).await?;
            println!("{} Updated branch {}", "✓".green().bold(), id);
        }
        BranchAction::Remove { id } => {
            let id = resolve(tree.branches.iter().map(|b| b.id.as_str()), &id, "branch")?;
            store.remove_branch(&id).await?;
            println!("{} Removed branch {}", "✓".green().bold(), id);
        }
    }

    Ok(())
}

async fn cmd_fruit(session: &Session, action: FruitAction) -> anyhow::Result<()> {
    session.load().await?;
    let tree = my_tree(session)?;
    let store = session.store();

    match action {
        FruitAction::Add {
            branch,
            title,
            description,
            tags,
            people,
            location,
        } => {
            let branch_id = resolve(tree.branches.iter().map(|b| b.id.as_str()), &branch, "branch")?;
            let mut fruit = Fruit::new(branch_id, title, description);
            fruit.tags = tags;
            fruit.people = people;
            fruit.location = location.map(|name| Location {
                name,
                latitude: None,
                longitude: None,
            });
            let id = fruit.id.clone();
            store.add_fruit(fruit).await?;
            println!("{} Added memory {}", "✓".green().bold(), id);
        }
        FruitAction::Update {
            id,
            title,
            description,
            branch,
        } => {
            let id = resolve(tree.fruits.iter().map(|f| f.id.as_str()), &id, "memory")?;
            let branch_id = branch
                .map(|b| resolve(tree.branches.iter().map(|b| b.id.as_str()), &b, "branch"))
                .transpose()?;
            let changes = FruitChanges {
                branch_id,
                title,
                description,
                ..Default::default()
            };
            store.update_fruit(&id, changes).await?;
            println!("{} Updated memory {}", "✓".green().bold(), id);
        }
        FruitAction::Remove { id } => {
            let id = resolve(tree.fruits.iter().map(|f| f.id.as_str()), &id, "memory")?;
            store.remove_fruit(&id).await?;
            println!("{} Removed memory {}", "✓".green().bold(), id);
        }
    }

    Ok(())
}

async fn cmd_root(session: &Session, action: RootAction) -> anyhow::Result<()> {
    session.load().await?;
    let tree = my_tree(session)?;
    let store = session.store();

    match action {
        RootAction::Add { name, relation } => {
            let root = Root::new(name, relation);
            let id = root.id.clone();
            store.add_root(root).await?;
            println!("{} Added root {}", "✓".green().bold(), id);
        }
        RootAction::Remove { id } => {
            let id = resolve(tree.roots.iter().map(|r| r.id.as_str()), &id, "root")?;
            store.remove_root(&id).await?;
            println!("{} Removed root {}", "✓".green().bold(), id);
        }
    }

    Ok(())
}

async fn cmd_gift(session: &Session, action: GiftAction, format: OutputFormat) -> anyhow::Result<()> {
    session.load().await?;
    let gifts = session.gifts();

    match action {
        GiftAction::Send {
            kind,
            to,
            content,
            message,
            unlock,
        } => {
            let tree = my_tree(session)?;
            let content_id = match kind {
                GiftKind::Tree => tree.id.clone(),
                GiftKind::Branch => {
                    resolve(tree.branches.iter().map(|b| b.id.as_str()), &content, "branch")?
                }
                GiftKind::Fruit => {
                    resolve(tree.fruits.iter().map(|f| f.id.as_str()), &content, "memory")?
                }
                GiftKind::TimeCapsule => resolve(
                    tree.branches
                        .iter()
                        .map(|b| b.id.as_str())
                        .chain(tree.fruits.iter().map(|f| f.id.as_str())),
                    &content,
                    "branch or memory",
                )?,
            };
            let mut draft = GiftDraft::new(kind, to, content_id, message);
            if let Some(date) = unlock {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("Invalid unlock date: {date}"))?;
                draft = draft.with_unlock_date(date.and_time(chrono::NaiveTime::MIN).and_utc());
            }
            let gift = gifts.send(&draft).await?;
            println!(
                "{} Sent {} gift {} to {}",
                "✓".green().bold(),
                gift.kind,
                gift.id,
                gift.recipient_id
            );
        }
        GiftAction::List { sent } => {
            let list = if sent {
                gifts.sent().await
            } else {
                gifts.received().await
            };
            print_gifts(&list, format)?;
        }
        GiftAction::Accept { id } => {
            let id = resolve_gift(session, &id).await?;
            let gift = gifts.accept(&id).await?;
            if gift.is_unlocked(Utc::now()) {
                println!("{} Accepted {}; it is now part of your tree", "✓".green().bold(), gift.id);
            } else {
                println!(
                    "{} Accepted {}; it opens on {}",
                    "✓".green().bold(),
                    gift.id,
                    gift.unlock_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_default()
                );
            }
        }
        GiftAction::Reject { id } => {
            let id = resolve_gift(session, &id).await?;
            let gift = gifts.reject(&id).await?;
            println!("{} Rejected {}", "✓".green().bold(), gift.id);
        }
        GiftAction::Seen { id } => {
            let id = resolve_gift(session, &id).await?;
            let gift = gifts.mark_seen(&id).await?;
            println!("{} Marked {} as seen", "✓".green().bold(), gift.id);
        }
    }

    Ok(())
}

/// Show the active configuration.
fn cmd_config(config: &AppConfig, path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if path == config_file_path() {
            ensure_config_exists()?;
        } else if !path.exists() {
            save_config_to(config, path)?;
        }
    }

    println!("{}", "⚙ Configuration".bold());
    println!("  Config file: {}", path.display());
    println!("  Database:    {}", config.database_path().display());
    println!();
    println!(
        "{}",
        toml::to_string_pretty(config).context("Failed to serialize configuration")?
    );

    Ok(())
}

fn my_tree(session: &Session) -> anyhow::Result<Tree> {
    session.store().tree().ok_or_else(|| {
        session.store().error().map_or_else(
            || anyhow!("No tree yet, plant one with `alma init`"),
            |e| anyhow!(e),
        )
    })
}

fn store_error(session: &Session, what: &str) -> String {
    session
        .store()
        .error()
        .unwrap_or_else(|| format!("Could not load {what}"))
}

fn print_tree(tree: &Tree, format: OutputFormat) -> anyhow::Result<()> {
    let output = match format {
        OutputFormat::Markdown => format_tree_markdown(tree),
        OutputFormat::Json => format_tree_json(tree).map_err(AppError::json_parse)?,
        OutputFormat::Table => format_tree_table(tree),
    };
    println!("{output}");
    Ok(())
}

fn print_gifts(gifts: &[Gift], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(gifts).map_err(AppError::json_parse)?
            );
        }
        OutputFormat::Markdown | OutputFormat::Table => {
            if gifts.is_empty() {
                println!("No gifts");
            } else {
                println!("{}", format_gifts_table(gifts, Utc::now()));
            }
        }
    }
    Ok(())
}

async fn resolve_gift(session: &Session, prefix: &str) -> anyhow::Result<String> {
    let mut all = session.gifts().received().await;
    all.extend(session.gifts().sent().await);
    resolve(all.iter().map(|g| g.id.as_str()), prefix, "gift")
}

/// Resolve a full id or unique prefix among `ids`.
fn resolve<'a>(
    ids: impl Iterator<Item = &'a str>,
    prefix: &str,
    what: &str,
) -> anyhow::Result<String> {
    let matches: Vec<&str> = ids.filter(|id| id.starts_with(prefix)).collect();
    if let Some(exact) = matches.iter().find(|id| **id == prefix) {
        return Ok((*exact).to_string());
    }
    match matches.as_slice() {
        [] => Err(AppError::not_found(what).into()),
        [only] => Ok((*only).to_string()),
        _ => bail!("'{prefix}' matches several {what} ids, use more characters"),
    }
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
