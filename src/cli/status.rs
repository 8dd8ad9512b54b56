use crate::cli::require_config;
use crate::storage::archive::Archive;
use crate::storage::outbox::Outbox;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;

/// Backlog report. Reads the outbox without locking it, so a collector
/// running concurrently may change what is shown.
pub fn status(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = require_config(config_path)?;

    let pending = Outbox::inspect(&config.storage.outbox)?;
    let archive = Archive::open(&config.storage.archive)?;

    println!("Outbox:  {}", config.storage.outbox.display());
    println!("Pending: {} batches", pending.len());

    if let Some(oldest) = pending.first() {
        let age = Utc::now().signed_duration_since(oldest.created_at);
        let age_std = age.to_std().unwrap_or_default();
        println!(
            "Oldest:  {} ({} ago)",
            oldest.created_at.to_rfc3339(),
            humantime_serde::re::humantime::format_duration(std::time::Duration::from_secs(age_std.as_secs()))
        );

        let interval = config.collector.as_ref().and_then(|c| c.poll_interval);
        if let Some(interval) = interval.filter(|i| !i.is_zero()) {
            let cycles = age_std.as_secs_f64() / interval.as_secs_f64();
            println!("         {:.1} poll intervals behind", cycles);
        }

        let readings: usize = pending.iter().map(|b| b.readings.len()).sum();
        println!("         {} readings waiting", readings);
    }

    let pending_ids: HashSet<_> = pending.iter().map(|b| b.batch_id).collect();
    let rejections: Vec<_> = Outbox::inspect_rejections(&config.storage.outbox)?
        .into_iter()
        .filter(|r| pending_ids.contains(&r.batch_id))
        .collect();
    if !rejections.is_empty() {
        println!("Rejected: {} batches refused by the endpoint", rejections.len());
        for rejection in &rejections {
            let status = rejection
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "         {} attempts={} status={} last={} {}",
                rejection.batch_id,
                rejection.attempts,
                status,
                rejection.last_at.to_rfc3339(),
                rejection.reason
            );
        }
    }

    println!("Archive: {} ({} entries)", archive.dir().display(), archive.len());
    Ok(())
}
