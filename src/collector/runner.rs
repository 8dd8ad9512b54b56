use crate::collector::batch::{Batch, BatchDocument, ReadingKey};
use crate::config::types::{CollectorConfig, Config};
use crate::delivery::{deliver_with_retry, RetryPolicy, Transport};
use crate::sensor::{SensorError, SensorSource};
use crate::storage::archive::{Archive, ArchiveError};
use crate::storage::outbox::{Outbox, OutboxError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed,
    /// Another collector held the outbox; nothing was touched
    Busy,
}

/// What one cycle did; logged even when nothing failed
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub readings_polled: usize,
    pub devices_skipped: usize,
    pub duplicates_dropped: usize,
    pub batch_enqueued: bool,
    pub delivered: usize,
    pub duplicate_acks: usize,
    pub failed: usize,
    /// Not attempted because an earlier batch hit a transient failure
    pub deferred: usize,
    /// Permanently refused by the endpoint; each one is in a rejection record
    pub rejected: usize,
    pub pending_after: usize,
}

impl CycleReport {
    fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            readings_polled: 0,
            devices_skipped: 0,
            duplicates_dropped: 0,
            batch_enqueued: false,
            delivered: 0,
            duplicate_acks: 0,
            failed: 0,
            deferred: 0,
            rejected: 0,
            pending_after: 0,
        }
    }
}

pub struct CollectorRunner {
    collector_id: String,
    source: SensorSource,
    transport: Arc<dyn Transport>,
    outbox_dir: PathBuf,
    archive_dir: PathBuf,
    lock_wait: Duration,
    max_clock_skew: Duration,
    retry: RetryPolicy,
}

impl CollectorRunner {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self, CollectorError> {
        let collector_config = config
            .collector
            .as_ref()
            .ok_or_else(|| CollectorError::Config("collector config section missing".to_string()))?;

        Ok(Self {
            collector_id: resolve_collector_id(collector_config),
            source: SensorSource::new(&config.sensors)?,
            transport,
            outbox_dir: config.storage.outbox.clone(),
            archive_dir: config.storage.archive.clone(),
            lock_wait: collector_config.lock_wait,
            max_clock_skew: collector_config.max_clock_skew,
            retry: RetryPolicy {
                max_retries: collector_config.max_retries,
                retry_interval: collector_config.retry_interval,
            },
        })
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    /// Run one poll cycle: poll, merge with backlog, deliver oldest first.
    ///
    /// Delivery failures leave batches pending and are not errors. Storage
    /// integrity failures are.
    pub async fn run_cycle(&self) -> Result<CycleReport, CollectorError> {
        self.run_cycle_at(None).await
    }

    /// `observed_at` overrides the poll timestamp, which is otherwise taken
    /// once the outbox lock is held
    pub(crate) async fn run_cycle_at(
        &self,
        observed_at: Option<DateTime<Utc>>,
    ) -> Result<CycleReport, CollectorError> {
        let outbox = match Outbox::lock(&self.outbox_dir, self.lock_wait).await {
            Ok(outbox) => outbox,
            Err(OutboxError::Busy(dir)) => {
                warn!(
                    outbox = %dir.display(),
                    waited_ms = self.lock_wait.as_millis() as u64,
                    "Another collector holds the outbox, skipping this cycle"
                );
                return Ok(CycleReport::new(CycleOutcome::Busy));
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = CycleReport::new(CycleOutcome::Completed);

        let poll = match observed_at {
            Some(at) => self.source.poll_at(at),
            None => self.source.poll(),
        };
        report.readings_polled = poll.readings.len();
        report.devices_skipped = poll.errors.len();
        for device_error in &poll.errors {
            warn!(address = %device_error.address, error = %device_error.kind, "Skipping device");
        }
        if poll.is_empty() {
            info!(root = %self.source.root().display(), "Poll found no readable devices");
        }

        // Unreadable backlog is fatal: carrying on could drop readings silently
        let mut pending = outbox.list_pending()?;
        let mut archive = Archive::open(&self.archive_dir)?;

        let mut known: HashSet<ReadingKey> = pending.iter().flat_map(Batch::keys).collect();
        let skew = chrono::Duration::from_std(self.max_clock_skew).unwrap_or(chrono::Duration::zero());
        known.extend(archive.reading_keys_since(poll.observed_at - skew)?);

        let fresh: Vec<_> = poll
            .readings
            .into_iter()
            .filter(|r| !known.contains(&r.key()))
            .collect();
        report.duplicates_dropped = report.readings_polled - fresh.len();
        if report.duplicates_dropped > 0 {
            warn!(
                dropped = report.duplicates_dropped,
                "Fresh readings already pending or archived, dropped"
            );
        }

        if !fresh.is_empty() {
            let batch = Batch::new(self.collector_id.clone(), fresh, poll.observed_at);
            outbox.enqueue(&batch)?;
            report.batch_enqueued = true;
            pending.push(batch);
        }

        let total = pending.len();
        for (position, batch) in pending.into_iter().enumerate() {
            let document = BatchDocument::from(&batch);
            match deliver_with_retry(self.transport.as_ref(), &document, self.retry).await {
                Ok(ack) => {
                    outbox.mark_sent(batch.batch_id)?;
                    archive.append(&batch.into_sent())?;
                    report.delivered += 1;
                    if ack.was_duplicate() {
                        report.duplicate_acks += 1;
                        info!(batch_id = %document.batch_id, "Endpoint already had this batch");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    if e.is_transient() {
                        // Keep arrival order at the endpoint; the next cycle resumes here
                        report.deferred = total - position - 1;
                        warn!(
                            batch_id = %document.batch_id,
                            deferred = report.deferred,
                            error = %e,
                            "Delivery failed, batch stays pending"
                        );
                        break;
                    }
                    let rejection =
                        outbox.record_rejection(batch.batch_id, e.status(), &e.to_string())?;
                    report.rejected += 1;
                    error!(
                        batch_id = %document.batch_id,
                        attempts = rejection.attempts,
                        error = %e,
                        "Endpoint rejected batch, it stays pending for inspection"
                    );
                }
            }
        }

        report.pending_after = outbox.list_pending()?.len();

        info!(
            collector_id = %self.collector_id,
            polled = report.readings_polled,
            skipped_devices = report.devices_skipped,
            duplicates_dropped = report.duplicates_dropped,
            delivered = report.delivered,
            failed = report.failed,
            deferred = report.deferred,
            rejected = report.rejected,
            pending = report.pending_after,
            "Collector cycle complete"
        );

        Ok(report)
    }
}

/// Configured ID, else hostname, else "collector"
fn resolve_collector_id(config: &CollectorConfig) -> String {
    config.collector_id.clone().unwrap_or_else(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.to_str().map(|s| s.to_string()))
            .unwrap_or_else(|| "collector".to_string())
    })
}
