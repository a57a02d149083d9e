use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use eagle_core::config::Config;
use eagle_core::conflict::{Conflict, ConflictLog, ConflictRecord, Resolution, Stamp, Strategy};
use eagle_core::paths;
use std::io::Read;
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConflictSubcommand {
    /// Resolve a conflict described in a YAML or JSON file ("-" for stdin)
    Resolve {
        file: String,
        /// Override the strategy configured for the conflict's category
        #[arg(long)]
        strategy: Option<Strategy>,
        /// Primary region for tie-breaks (default: configured primary)
        #[arg(long, env = "PRIMARY_REGION")]
        primary_region: Option<String>,
        /// Print the decision without appending it to the audit log
        #[arg(long)]
        no_record: bool,
    },

    /// List the conflict audit log
    List {
        /// Only records awaiting manual review
        #[arg(long)]
        open: bool,
    },

    /// Settle a record awaiting review by choosing a region's value
    Settle {
        id: Uuid,
        /// Region whose candidate wins
        #[arg(long)]
        region: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConflictSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConflictSubcommand::Resolve {
            file,
            strategy,
            primary_region,
            no_record,
        } => resolve(root, &file, strategy, primary_region, no_record, json),
        ConflictSubcommand::List { open } => list(root, open, json),
        ConflictSubcommand::Settle { id, region } => settle(root, id, &region, json),
    }
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read conflict from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))
    }
}

fn resolve(
    root: &Path,
    file: &str,
    strategy: Option<Strategy>,
    primary_region: Option<String>,
    no_record: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load_or_default(root).context("failed to load eagle.yaml")?;
    // YAML is a superset of JSON, so one parser covers both.
    let conflict: Conflict =
        serde_yaml::from_str(&read_input(file)?).context("invalid conflict document")?;
    let primary = match primary_region {
        Some(p) => p,
        None => config.region_set(None, None)?.primary().id.clone(),
    };

    let stamp = Stamp::fresh();
    let policy = &config.conflicts;
    let record = match strategy {
        Some(s) => policy.resolve_with(&conflict, s, &primary, stamp),
        None => policy.resolve(&conflict, &primary, stamp),
    }?;

    if !no_record {
        let log = ConflictLog::open(&paths::conflict_log_path(root))
            .context("failed to open conflict log")?;
        log.append(&record)?;
    }

    if json {
        print_json(&record)?;
    } else {
        print_record(&record);
    }
    if let Some(e) = record.unresolved_error() {
        eprintln!("warning: {e}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(root: &Path, open: bool, json: bool) -> anyhow::Result<()> {
    let path = paths::conflict_log_path(root);
    let records = if path.exists() {
        let log = ConflictLog::open(&path).context("failed to open conflict log")?;
        if open {
            log.open_records()?
        } else {
            log.list_all()?
        }
    } else {
        Vec::new()
    };

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No conflict records.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.entity_id.clone(),
                r.strategy.to_string(),
                outcome_label(r),
                r.winner_region().unwrap_or("-").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "RECORDED", "ENTITY", "STRATEGY", "OUTCOME", "WINNER"],
        rows,
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// settle
// ---------------------------------------------------------------------------

fn settle(root: &Path, id: Uuid, region: &str, json: bool) -> anyhow::Result<()> {
    let log = ConflictLog::open(&paths::conflict_log_path(root))
        .context("failed to open conflict log")?;
    let open = log.get(id)?;
    let settlement = ConflictRecord::settlement(&open, region, Stamp::fresh())?;
    log.append(&settlement)?;

    if json {
        print_json(&settlement)?;
    } else {
        println!(
            "Settled conflict on '{}': '{region}' wins.",
            settlement.entity_id
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn outcome_label(r: &ConflictRecord) -> String {
    match (&r.resolution, r.settles) {
        (_, Some(_)) => "settled".to_string(),
        (Resolution::Resolved { winner_region: None, .. }, _) => "merged".to_string(),
        (Resolution::Resolved { .. }, _) => "resolved".to_string(),
        (Resolution::Rejected { .. }, _) => "needs-review".to_string(),
    }
}

fn print_record(r: &ConflictRecord) {
    println!("Entity:   {}", r.entity_id);
    println!("Strategy: {}", r.strategy);
    println!("Outcome:  {}", outcome_label(r));
    match &r.resolution {
        Resolution::Resolved {
            winner_region,
            value,
            field_sources,
        } => {
            if let Some(w) = winner_region {
                println!("Winner:   {w}");
            }
            println!("Value:    {value}");
            for (field, region) in field_sources {
                println!("  {field} <- {region}");
            }
        }
        Resolution::Rejected { reason } => println!("Reason:   {reason}"),
    }
    println!("Record:   {}", r.id);
}
