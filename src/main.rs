use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use leader_clusters::{
    default_rules, format_step_report, format_summary, get_aliases, insert_leaders, leader_count,
    leader_history, leader_records, load_csv, load_leaders, load_rules, logging,
    non_ascii_inventory, save_clusters, setup_database, ClusterEngine, ClusterError, NameRecord, Replacement,
    RuleTable, RunOutcome, TextReporter,
};

#[derive(Parser)]
#[command(
    name = "leader-clusters",
    version,
    about = "Find typos and alternate spellings in the leader roster"
)]
struct Cli {
    /// SQLite database holding the `leaders` table
    #[arg(long, env = "LEADER_DB", default_value = "minutes.db", global = true)]
    db: PathBuf,

    /// Log every merge
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load leaders from a CSV file with `name,lead_count` columns
    Import { csv: PathBuf },

    /// Run every normalization step and report the merges
    Run {
        /// JSON rule table to use instead of the built-in one
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Wait for Enter after each step
        #[arg(long)]
        pause: bool,

        /// Review each step in the terminal UI
        #[arg(long, conflicts_with = "pause")]
        tui: bool,

        /// Print the whole outcome as JSON instead of text reports
        #[arg(long, conflicts_with_all = ["pause", "tui"])]
        json: bool,

        /// Write the resulting clusters back as leader aliases
        #[arg(long)]
        save: bool,
    },

    /// Apply one step (numbered from 1) to the raw names on its own
    Step {
        step: usize,

        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Show the key after every step for the given names
    Normalize {
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// List non-ASCII characters found in leader names
    NonAscii,

    /// Show the saved aliases and audit trail of a canonical leader
    History { name: String },

    /// Print the rule table
    Rules {
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

enum ReviewMode {
    Text,
    Paused,
    Tui,
    Silent,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, Command::Run { tui: true, .. });
    logging::init_logging(cli.verbose, interactive);

    match cli.command {
        Command::Import { csv } => run_import(&cli.db, &csv),
        Command::Run {
            rules,
            pause,
            tui,
            json,
            save,
        } => {
            let mode = if tui {
                ReviewMode::Tui
            } else if pause {
                ReviewMode::Paused
            } else if json {
                ReviewMode::Silent
            } else {
                ReviewMode::Text
            };
            run_clustering(&cli.db, rules.as_deref(), mode, json, save)
        }
        Command::Step { step, rules } => run_single_step(&cli.db, rules.as_deref(), step),
        Command::Normalize { names, rules } => run_normalize(rules.as_deref(), &names),
        Command::NonAscii => run_non_ascii(&cli.db),
        Command::History { name } => run_history(&cli.db, &name),
        Command::Rules { rules } => run_print_rules(rules.as_deref()),
    }
}

fn load_table(rules: Option<&Path>) -> Result<RuleTable> {
    let rules = match rules {
        Some(path) => load_rules(path)?,
        None => default_rules(),
    };
    Ok(RuleTable::compile(&rules)?)
}

fn open_store(db: &Path) -> Result<Connection> {
    let conn = Connection::open(db).with_context(|| format!("Failed to open database {:?}", db))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn load_records(conn: &Connection) -> Result<Vec<NameRecord>> {
    let rows = load_leaders(conn)?;
    if rows.is_empty() {
        warn!("No leaders in the store; run `import` first");
    }
    Ok(leader_records(&rows)?)
}

fn run_import(db: &Path, csv: &Path) -> Result<()> {
    println!("📂 Loading CSV...");
    let rows = load_csv(csv)?;
    println!("✓ Loaded {} leaders from {:?}", rows.len(), csv);

    let conn = open_store(db)?;
    let inserted = insert_leaders(&conn, &rows)?;
    let count = leader_count(&conn)?;

    println!("✓ Inserted: {} leaders", inserted);
    println!("✓ Already stored: {}", rows.len() - inserted);
    println!("✓ Database contains {} leaders", count);

    Ok(())
}

fn run_clustering(
    db: &Path,
    rules: Option<&Path>,
    mode: ReviewMode,
    json: bool,
    save: bool,
) -> Result<()> {
    let engine = ClusterEngine::from_table(load_table(rules)?);
    let mut conn = open_store(db)?;
    let records = load_records(&conn)?;

    let result = match mode {
        ReviewMode::Silent => engine.run(records),
        ReviewMode::Text => engine.run_with_sink(records, &mut TextReporter::new(io::stdout())),
        ReviewMode::Paused => engine.run_with_sink(
            records,
            &mut TextReporter::new(io::stdout()).with_pause(io::stdin().lock()),
        ),
        ReviewMode::Tui => run_tui(&engine, records)?,
    };

    let outcome: RunOutcome = match result {
        Ok(outcome) => outcome,
        Err(ClusterError::ReviewAborted { step }) => {
            println!("Review stopped after pass {}; nothing saved", step + 1);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", format_summary(&outcome));
    }

    if save {
        let written = save_clusters(&mut conn, &outcome)?;
        info!(written, "Clusters saved");
        if !json {
            println!("✓ Saved {} aliases", written);
        }
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_tui(
    engine: &ClusterEngine,
    records: Vec<NameRecord>,
) -> Result<std::result::Result<RunOutcome, ClusterError>> {
    let mut reviewer = leader_clusters::ui::TuiReviewer::new(engine.rules().len())
        .context("Failed to start terminal UI")?;
    let result = engine.run_with_sink(records, &mut reviewer);

    // Restore the terminal before anything is printed
    drop(reviewer);
    Ok(result)
}

#[cfg(not(feature = "tui"))]
fn run_tui(
    _engine: &ClusterEngine,
    _records: Vec<NameRecord>,
) -> Result<std::result::Result<RunOutcome, ClusterError>> {
    bail!("TUI mode not available! Rebuild with: cargo build --features tui")
}

fn run_single_step(db: &Path, rules: Option<&Path>, step: usize) -> Result<()> {
    let engine = ClusterEngine::from_table(load_table(rules)?);
    let Some(index) = step.checked_sub(1) else {
        bail!("Steps are numbered from 1");
    };

    let conn = open_store(db)?;
    let records = load_records(&conn)?;
    let report = engine.validate_step(records, index)?;

    print!("{}", format_step_report(&report));
    Ok(())
}

fn run_normalize(rules: Option<&Path>, names: &[String]) -> Result<()> {
    let table = load_table(rules)?;

    for name in names {
        println!("{:?}", name);
        for (i, (description, key)) in table.trace(name).into_iter().enumerate() {
            println!("  {:>2}. {:<45} {:?}", i + 1, description, key);
        }
        println!();
    }

    Ok(())
}

fn run_non_ascii(db: &Path) -> Result<()> {
    let conn = open_store(db)?;
    let rows = load_leaders(&conn)?;
    let inventory = non_ascii_inventory(rows.iter().map(|row| row.name.as_str()));

    if inventory.is_empty() {
        println!("✓ All {} leader names are ASCII", rows.len());
        return Ok(());
    }

    for (c, count) in inventory {
        println!("{}  U+{:04X}  {}", c, c as u32, count);
    }

    Ok(())
}

fn run_history(db: &Path, name: &str) -> Result<()> {
    let conn = open_store(db)?;
    let aliases = get_aliases(&conn, name)?;
    let events = leader_history(&conn, name)?;

    if aliases.is_empty() && events.is_empty() {
        println!("No saved clusters for {:?}", name);
        return Ok(());
    }

    println!("{:?}", name);
    for alias in &aliases {
        println!("  alias  {:?}", alias);
    }
    for event in &events {
        println!(
            "  {}  {}  {}",
            event.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            event.kind,
            event.details
        );
    }

    Ok(())
}

fn run_print_rules(rules: Option<&Path>) -> Result<()> {
    let table = load_table(rules)?;

    for rule in table.iter() {
        let replacement = match &rule.rule().replacement {
            Replacement::Template(template) => format!("{:?}", template),
            Replacement::Transform(transform) => format!("<{:?}>", transform),
        };
        println!(
            "{:>2}. {:<45} /{}/ -> {}",
            rule.step() + 1,
            rule.description(),
            rule.rule().pattern,
            replacement
        );
    }

    Ok(())
}
