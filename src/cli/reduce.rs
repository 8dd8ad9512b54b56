use crate::cli::require_config;
use crate::reducer::{self, IdentityMap, ReduceRequest};
use crate::storage::archive::Archive;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub struct ReduceArgs {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub output: Option<PathBuf>,
}

pub fn reduce(config_path: Option<PathBuf>, args: ReduceArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = require_config(config_path)?;
    let reducer_config = config
        .reducer
        .as_ref()
        .ok_or("config has no 'reducer' section")?;

    if let (Some(since), Some(until)) = (args.since, args.until) {
        if since >= until {
            return Err(format!("--since {} is not before --until {}", since, until).into());
        }
    }

    // Metadata problems abort before anything is read
    let identity = IdentityMap::load(&reducer_config.metadata)?;
    let archive = Archive::open(&config.storage.archive)?;

    let request = ReduceRequest {
        since: args.since,
        until: args.until,
        period: reducer_config.period,
    };
    let outcome = reducer::reduce(&archive, &identity, &request)?;

    let output = args.output.unwrap_or_else(|| reducer_config.output.clone());
    let written = reducer::write_outputs(&outcome, &output)?;

    println!(
        "Reduced {} streams into {} summary records ({} files in {})",
        outcome.series.len(),
        outcome.summaries.len(),
        written.len(),
        output.display()
    );
    if !outcome.unresolved.is_empty() {
        println!(
            "{} readings from {} unmapped addresses were excluded:",
            outcome.unknown_count(),
            outcome.unresolved.len()
        );
        for (address, count) in &outcome.unresolved {
            println!("  {} ({} readings)", address, count);
        }
    }
    if outcome.collisions > 0 {
        println!("{} duplicate readings collided; later arrivals kept", outcome.collisions);
    }
    if outcome.rejected_entries > 0 {
        println!("{} archive entries could not be read", outcome.rejected_entries);
    }

    Ok(())
}
