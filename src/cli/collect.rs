use crate::cli::require_config;
use crate::collector::{CollectorRunner, CycleOutcome};
use crate::delivery::HttpTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// One collector cycle. Delivery failures and a busy outbox are not errors;
/// the next scheduled run picks up where this one stopped.
pub async fn collect(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let (_, config) = require_config(config_path)?;
    let collector_config = config
        .collector
        .as_ref()
        .ok_or("config has no 'collector' section")?;

    let transport = Arc::new(HttpTransport::new(collector_config)?);
    info!(endpoint = %transport.endpoint(), "Delivering to endpoint");

    let runner = CollectorRunner::new(&config, transport)?;
    let report = runner.run_cycle().await?;

    if report.outcome == CycleOutcome::Busy {
        info!("Outbox busy, cycle skipped");
    }
    Ok(())
}
