pub mod export;
pub mod identity;
pub mod summary;

pub use identity::{IdentityMap, MetadataLoadError, Resolution, SensorIdentity};
pub use summary::{SeriesPoint, SummaryRecord, TimeSeries};

use crate::collector::batch::Batch;
use crate::config::types::Period;
use crate::storage::archive::{Archive, ArchiveError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataLoadError),

    #[error("cannot write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("streams '{first}' and '{second}' would both be written to {file}")]
    PlotNameClash {
        file: String,
        first: String,
        second: String,
    },
}

/// Half-open range `[since, until)` over `observed_at`
#[derive(Debug, Clone, Default)]
pub struct ReduceRequest {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub period: Period,
}

impl ReduceRequest {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| at >= since) && self.until.map_or(true, |until| at < until)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReduceOutcome {
    /// Sorted by stream name
    pub series: Vec<TimeSeries>,
    pub summaries: Vec<SummaryRecord>,
    /// Readings per address with no mapping
    pub unresolved: BTreeMap<String, usize>,
    /// Same stream and `observed_at` seen twice; the later arrival won
    pub collisions: usize,
    /// Archive entries that could not be parsed
    pub rejected_entries: usize,
}

impl ReduceOutcome {
    pub fn unknown_count(&self) -> usize {
        self.unresolved.values().sum()
    }
}

/// Accumulates readings in archive order
struct Grouper<'a> {
    identity: &'a IdentityMap,
    request: &'a ReduceRequest,
    streams: HashMap<String, BTreeMap<DateTime<Utc>, f64>>,
    unresolved: BTreeMap<String, usize>,
    collisions: usize,
}

impl<'a> Grouper<'a> {
    fn new(identity: &'a IdentityMap, request: &'a ReduceRequest) -> Self {
        Self {
            identity,
            request,
            streams: HashMap::new(),
            unresolved: BTreeMap::new(),
            collisions: 0,
        }
    }

    fn add(&mut self, batch: &Batch) {
        for reading in &batch.readings {
            if !self.request.contains(reading.observed_at) {
                continue;
            }
            match self.identity.resolve(&reading.address) {
                Resolution::Stream(identity) => {
                    let points = self.streams.entry(identity.stream_name.clone()).or_default();
                    if let Some(previous) = points.insert(reading.observed_at, reading.value) {
                        self.collisions += 1;
                        warn!(
                            stream = %identity.stream_name,
                            observed_at = %reading.observed_at,
                            kept = reading.value,
                            dropped = previous,
                            batch_id = %batch.batch_id,
                            "Two readings for one stream at the same instant"
                        );
                    }
                }
                Resolution::Unknown => {
                    *self.unresolved.entry(reading.address.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    fn finish(self, rejected_entries: usize) -> ReduceOutcome {
        for (address, count) in &self.unresolved {
            warn!(address = %address, readings = count, "Address not in metadata, readings excluded");
        }

        let mut series: Vec<TimeSeries> = self
            .streams
            .into_iter()
            .map(|(stream_name, points)| TimeSeries {
                stream_name,
                points: points
                    .into_iter()
                    .map(|(observed_at, value)| SeriesPoint { observed_at, value })
                    .collect(),
            })
            .collect();
        series.sort_by(|a, b| a.stream_name.cmp(&b.stream_name));

        let summaries = series
            .iter()
            .flat_map(|s| {
                summary::summarize(s, self.request.period, self.identity.unit_for_stream(&s.stream_name))
            })
            .collect();

        ReduceOutcome {
            series,
            summaries,
            unresolved: self.unresolved,
            collisions: self.collisions,
            rejected_entries,
        }
    }
}

/// Group already-loaded batches, given in arrival order
pub fn reduce_batches<'b>(
    batches: impl IntoIterator<Item = &'b Batch>,
    identity: &IdentityMap,
    request: &ReduceRequest,
) -> ReduceOutcome {
    let mut grouper = Grouper::new(identity, request);
    for batch in batches {
        grouper.add(batch);
    }
    grouper.finish(0)
}

/// Walk the archive in arrival order and build named series and summaries.
/// Unparseable entries are skipped and counted. The range applies to each
/// reading's `observed_at`; archive timestamps come from another clock and
/// are never used to filter.
pub fn reduce(
    archive: &Archive,
    identity: &IdentityMap,
    request: &ReduceRequest,
) -> Result<ReduceOutcome, ReduceError> {
    let mut grouper = Grouper::new(identity, request);
    let mut rejected = 0;
    let mut read = 0;

    for entry in archive.entries()? {
        match archive.read_entry(&entry) {
            Ok(batch) => {
                grouper.add(&batch);
                read += 1;
            }
            Err(e @ ArchiveError::Malformed { .. }) => {
                error!(error = %e, "Skipping unreadable archive entry");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let outcome = grouper.finish(rejected);
    info!(
        entries = read,
        rejected = outcome.rejected_entries,
        streams = outcome.series.len(),
        summaries = outcome.summaries.len(),
        unknown = outcome.unknown_count(),
        collisions = outcome.collisions,
        "Reduce complete"
    );
    Ok(outcome)
}

/// Write `summary.json` and one plot file per stream into `output`.
/// Nothing is written if two stream names sanitize to the same file.
pub fn write_outputs(outcome: &ReduceOutcome, output: &Path) -> Result<Vec<PathBuf>, ReduceError> {
    let mut files: HashMap<String, &str> = HashMap::new();
    for series in &outcome.series {
        let file = export::plot_file_name(&series.stream_name);
        if let Some(first) = files.insert(file.clone(), &series.stream_name) {
            return Err(ReduceError::PlotNameClash {
                file,
                first: first.to_string(),
                second: series.stream_name.clone(),
            });
        }
    }

    let output_err = |path: PathBuf| move |source: io::Error| ReduceError::Output { path, source };

    let mut written = Vec::with_capacity(outcome.series.len() + 1);
    written.push(
        export::write_summary(
            output,
            &outcome.summaries,
            &outcome.unresolved,
            outcome.collisions,
            outcome.rejected_entries,
        )
        .map_err(output_err(output.join(export::SUMMARY_FILE)))?,
    );

    for series in &outcome.series {
        let path = export::write_plot(output, series)
            .map_err(output_err(output.join(export::plot_file_name(&series.stream_name))))?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::batch::Reading;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn identity_map(dir: &TempDir) -> IdentityMap {
        let path = dir.path().join("sensors.json");
        fs::write(
            &path,
            r#"{"sensors": [
                {"address": "A", "stream_name": "office_air", "unit": "degC"},
                {"address": "C", "stream_name": "garage"}
            ]}"#,
        )
        .unwrap();
        IdentityMap::load(&path).unwrap()
    }

    #[test]
    fn test_resolves_groups_and_counts_unknown() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let batches = vec![
            Batch::new("gizmo", vec![Reading::new("A", 10.0, at(1)), Reading::new("B", 5.0, at(1))], at(1)),
            Batch::new("gizmo", vec![Reading::new("A", 12.0, at(2))], at(2)),
        ];

        let outcome = reduce_batches(&batches, &identity, &ReduceRequest::default());

        assert_eq!(outcome.series.len(), 1);
        let office = &outcome.series[0];
        assert_eq!(office.stream_name, "office_air");
        assert_eq!(
            office.points,
            vec![
                SeriesPoint { observed_at: at(1), value: 10.0 },
                SeriesPoint { observed_at: at(2), value: 12.0 },
            ]
        );
        assert_eq!(outcome.unknown_count(), 1);
        assert_eq!(outcome.unresolved.get("B"), Some(&1));

        assert_eq!(outcome.summaries.len(), 1);
        let summary = &outcome.summaries[0];
        assert_eq!(summary.count, 2);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 12.0);
        assert_eq!(summary.mean, 11.0);
        assert_eq!(summary.unit.as_deref(), Some("degC"));
    }

    #[test]
    fn test_out_of_order_batches_are_sorted() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let batches = vec![
            Batch::new("gizmo", vec![Reading::new("C", 3.0, at(30))], at(30)),
            Batch::new("gizmo", vec![Reading::new("C", 1.0, at(10))], at(10)),
            Batch::new("gizmo", vec![Reading::new("C", 2.0, at(20))], at(20)),
        ];

        let outcome = reduce_batches(&batches, &identity, &ReduceRequest::default());
        let values: Vec<f64> = outcome.series[0].points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_collision_keeps_later_arrival() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let batches = vec![
            Batch::new("gizmo", vec![Reading::new("A", 10.0, at(1))], at(1)),
            Batch::new("gizmo", vec![Reading::new("A", 99.0, at(1))], at(1)),
        ];

        let outcome = reduce_batches(&batches, &identity, &ReduceRequest::default());
        assert_eq!(outcome.collisions, 1);
        assert_eq!(outcome.series[0].points.len(), 1);
        assert_eq!(outcome.series[0].points[0].value, 99.0);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let batch = Batch::new(
            "gizmo",
            vec![
                Reading::new("A", 1.0, at(0)),
                Reading::new("A", 2.0, at(10)),
                Reading::new("A", 3.0, at(20)),
            ],
            at(20),
        );
        let request = ReduceRequest {
            since: Some(at(10)),
            until: Some(at(20)),
            period: Period::Day,
        };

        let outcome = reduce_batches([&batch], &identity, &request);
        assert_eq!(outcome.series[0].points.len(), 1);
        assert_eq!(outcome.series[0].points[0].value, 2.0);
    }

    #[test]
    fn test_reduce_archive_skips_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let archive_dir = dir.path().join("archive");
        let mut archive = Archive::open(&archive_dir).unwrap();

        archive
            .append_at(&Batch::new("gizmo", vec![Reading::new("A", 10.0, at(1))], at(1)), at(2))
            .unwrap();
        let bogus = crate::storage::EntryName::new(at(3), uuid::Uuid::new_v4());
        fs::write(archive_dir.join(bogus.file_name()), b"not json").unwrap();
        archive
            .append_at(&Batch::new("gizmo", vec![Reading::new("A", 12.0, at(4))], at(4)), at(5))
            .unwrap();

        let outcome = reduce(&archive, &identity, &ReduceRequest::default()).unwrap();
        assert_eq!(outcome.rejected_entries, 1);
        assert_eq!(outcome.series[0].points.len(), 2);
    }

    #[test]
    fn test_range_ignores_archive_clock() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let mut archive = Archive::open(&dir.path().join("archive")).unwrap();

        // Receiver clock two seconds behind the sensor host
        archive
            .append_at(&Batch::new("gizmo", vec![Reading::new("A", 10.0, at(10))], at(10)), at(8))
            .unwrap();

        let request = ReduceRequest {
            since: Some(at(9)),
            until: None,
            period: Period::Day,
        };
        let outcome = reduce(&archive, &identity, &request).unwrap();
        assert_eq!(outcome.series.len(), 1);
        assert_eq!(outcome.series[0].points[0].value, 10.0);
    }

    #[test]
    fn test_clashing_plot_names_write_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sensors.json");
        fs::write(
            &path,
            r#"{"sensors": [
                {"address": "A", "stream_name": "loft temp"},
                {"address": "B", "stream_name": "loft_temp"}
            ]}"#,
        )
        .unwrap();
        let identity = IdentityMap::load(&path).unwrap();
        let batches = vec![Batch::new(
            "gizmo",
            vec![Reading::new("A", 1.0, at(0)), Reading::new("B", 2.0, at(0))],
            at(0),
        )];
        let outcome = reduce_batches(&batches, &identity, &ReduceRequest::default());
        assert_eq!(outcome.series.len(), 2);

        let output = dir.path().join("out");
        match write_outputs(&outcome, &output) {
            Err(ReduceError::PlotNameClash { file, first, second }) => {
                assert_eq!(file, "loft_temp.data");
                assert_eq!(first, "loft temp");
                assert_eq!(second, "loft_temp");
            }
            other => panic!("expected a plot name clash, got {:?}", other),
        }
        assert!(!output.join("summary.json").exists());
    }

    #[test]
    fn test_write_outputs() {
        let dir = TempDir::new().unwrap();
        let identity = identity_map(&dir);
        let batches = vec![Batch::new(
            "gizmo",
            vec![Reading::new("A", 10.0, at(0)), Reading::new("C", 4.0, at(0))],
            at(0),
        )];
        let outcome = reduce_batches(&batches, &identity, &ReduceRequest::default());

        let output = dir.path().join("out");
        let written = write_outputs(&outcome, &output).unwrap();
        assert_eq!(written.len(), 3);

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(output.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["records"].as_array().unwrap().len(), 2);
        assert_eq!(summary["collisions"], 0);

        let plot = fs::read_to_string(output.join("garage.data")).unwrap();
        assert!(plot.starts_with("time\tgarage\n"));
        assert_eq!(plot.lines().count(), 2);
    }
}
