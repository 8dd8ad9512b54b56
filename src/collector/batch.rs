use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// A single observation from one hardware device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Hardware address, e.g. `28-011912588b87`
    pub address: String,

    pub value: f64,

    pub observed_at: DateTime<Utc>,
}

/// Identity of a reading: `(address, observed_at)`
pub type ReadingKey = (String, DateTime<Utc>);

impl Reading {
    pub fn new(address: impl Into<String>, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            value,
            observed_at,
        }
    }

    pub fn key(&self) -> ReadingKey {
        (self.address.clone(), self.observed_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Sent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique batch ID, also the idempotency key understood by the endpoint
    pub batch_id: Uuid,

    /// ID of the collector that polled these readings
    pub collector_id: String,

    pub created_at: DateTime<Utc>,

    pub status: BatchStatus,

    /// Readings in poll order
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum BatchValidationError {
    #[error("batch_id is nil")]
    NilId,

    #[error("batch {0} has no readings")]
    Empty(Uuid),

    #[error("reading #{0} has an empty address")]
    EmptyAddress(usize),

    #[error("reading for {address} has non-finite value {value}")]
    NonFiniteValue { address: String, value: f64 },

    #[error("duplicate reading for {address} at {observed_at}")]
    DuplicateReading {
        address: String,
        observed_at: DateTime<Utc>,
    },
}

impl Batch {
    /// Create a new pending batch with a fresh ID
    pub fn new(collector_id: impl Into<String>, readings: Vec<Reading>, created_at: DateTime<Utc>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            collector_id: collector_id.into(),
            created_at,
            status: BatchStatus::Pending,
            readings,
        }
    }

    /// Earliest and latest `observed_at` in the batch
    pub fn observed_range(&self) -> Option<ObservedRange> {
        let start = self.readings.iter().map(|r| r.observed_at).min()?;
        let end = self.readings.iter().map(|r| r.observed_at).max()?;
        Some(ObservedRange { start, end })
    }

    pub fn keys(&self) -> impl Iterator<Item = ReadingKey> + '_ {
        self.readings.iter().map(Reading::key)
    }

    /// Check field-level invariants before a batch crosses a storage or wire boundary
    pub fn validate(&self) -> Result<(), BatchValidationError> {
        if self.batch_id.is_nil() {
            return Err(BatchValidationError::NilId);
        }
        if self.readings.is_empty() {
            return Err(BatchValidationError::Empty(self.batch_id));
        }

        let mut seen = HashSet::with_capacity(self.readings.len());
        for (i, reading) in self.readings.iter().enumerate() {
            if reading.address.trim().is_empty() {
                return Err(BatchValidationError::EmptyAddress(i));
            }
            if !reading.value.is_finite() {
                return Err(BatchValidationError::NonFiniteValue {
                    address: reading.address.clone(),
                    value: reading.value,
                });
            }
            if !seen.insert((reading.address.as_str(), reading.observed_at)) {
                return Err(BatchValidationError::DuplicateReading {
                    address: reading.address.clone(),
                    observed_at: reading.observed_at,
                });
            }
        }

        Ok(())
    }

    pub fn into_sent(mut self) -> Self {
        self.status = BatchStatus::Sent;
        self
    }
}

/// JSON document POSTed to the delivery endpoint, one per batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDocument {
    pub batch_id: Uuid,
    pub collector_id: String,
    pub created_at: DateTime<Utc>,
    pub observed_at_range: Option<ObservedRange>,
    pub readings: Vec<Reading>,
}

impl From<&Batch> for BatchDocument {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            collector_id: batch.collector_id.clone(),
            created_at: batch.created_at,
            observed_at_range: batch.observed_range(),
            readings: batch.readings.clone(),
        }
    }
}

impl BatchDocument {
    /// Materialize a received document as an acknowledged batch
    pub fn into_sent_batch(self) -> Batch {
        Batch {
            batch_id: self.batch_id,
            collector_id: self.collector_id,
            created_at: self.created_at,
            status: BatchStatus::Sent,
            readings: self.readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_new_batch_is_pending_with_unique_id() {
        let a = Batch::new("gizmo", vec![Reading::new("28-01", 1.0, at(0))], at(0));
        let b = Batch::new("gizmo", vec![Reading::new("28-01", 1.0, at(0))], at(0));
        assert_eq!(a.status, BatchStatus::Pending);
        assert_ne!(a.batch_id, b.batch_id);
    }

    #[test]
    fn test_validate_rejects_duplicate_reading_key() {
        let batch = Batch::new(
            "gizmo",
            vec![
                Reading::new("28-01", 1.0, at(0)),
                Reading::new("28-02", 2.0, at(0)),
                Reading::new("28-01", 3.0, at(0)),
            ],
            at(0),
        );
        assert_eq!(
            batch.validate(),
            Err(BatchValidationError::DuplicateReading {
                address: "28-01".to_string(),
                observed_at: at(0),
            })
        );
    }

    #[test]
    fn test_validate_rejects_nil_empty_and_non_finite() {
        let mut batch = Batch::new("gizmo", vec![Reading::new("28-01", 1.0, at(0))], at(0));
        assert!(batch.validate().is_ok());

        batch.readings[0].value = f64::NAN;
        assert!(matches!(
            batch.validate(),
            Err(BatchValidationError::NonFiniteValue { .. })
        ));

        batch.readings.clear();
        assert_eq!(batch.validate(), Err(BatchValidationError::Empty(batch.batch_id)));

        batch.batch_id = Uuid::nil();
        assert_eq!(batch.validate(), Err(BatchValidationError::NilId));
    }

    #[test]
    fn test_document_carries_observed_range() {
        let batch = Batch::new(
            "gizmo",
            vec![
                Reading::new("28-01", 1.0, at(5)),
                Reading::new("28-01", 1.5, at(1)),
                Reading::new("28-02", 2.0, at(3)),
            ],
            at(6),
        );
        let doc = BatchDocument::from(&batch);
        let range = doc.observed_at_range.unwrap();
        assert_eq!(range.start, at(1));
        assert_eq!(range.end, at(5));

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["batch_id"].is_string());
        assert_eq!(json["readings"].as_array().unwrap().len(), 3);
        assert_eq!(json["readings"][0]["address"], "28-01");
    }

    #[test]
    fn test_document_missing_field_is_rejected() {
        let json = r#"{"batch_id":"6f1c1d3e-8f6c-4a55-9a34-3a8f0b0f1a11","readings":[]}"#;
        assert!(serde_json::from_str::<BatchDocument>(json).is_err());
    }
}
