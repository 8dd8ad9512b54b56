pub mod archive;
pub mod fs;
pub mod outbox;

pub use archive::{Archive, ArchiveError};
pub use outbox::{Outbox, OutboxError};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// File name of a stored batch: `<RFC 3339 millis>;<batch_id>.json`.
/// Lexical order of names is time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryName {
    pub timestamp: DateTime<Utc>,
    pub batch_id: Uuid,
}

impl EntryName {
    pub fn new(timestamp: DateTime<Utc>, batch_id: Uuid) -> Self {
        Self { timestamp, batch_id }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{};{}.json",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.batch_id
        )
    }

    /// `None` for names that are not batch files
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        let (timestamp, batch_id) = stem.split_once(';')?;
        Some(Self {
            timestamp: DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc),
            batch_id: Uuid::parse_str(batch_id).ok()?,
        })
    }
}
