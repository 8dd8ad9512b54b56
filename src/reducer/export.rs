use crate::reducer::summary::{SummaryRecord, TimeSeries};
use crate::storage::fs::atomic_write;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SUMMARY_FILE: &str = "summary.json";
pub const PLOT_EXTENSION: &str = "data";

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    records: &'a [SummaryRecord],
    /// Readings per unmapped address
    unresolved: &'a BTreeMap<String, usize>,
    collisions: usize,
    rejected_entries: usize,
}

/// File name for a stream's plot data; path separators and other odd
/// characters become `_`.
pub fn plot_file_name(stream_name: &str) -> String {
    let safe: String = stream_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    let safe = if safe.is_empty() { "_" } else { safe };
    format!("{}.{}", safe, PLOT_EXTENSION)
}

/// Tab-delimited, gnuplot-ready: header `time<TAB><stream>`, then POSIX
/// seconds with millisecond fraction and the value.
pub fn render_plot(series: &TimeSeries) -> String {
    let mut out = format!("time\t{}\n", series.stream_name);
    for point in &series.points {
        let millis = point.observed_at.timestamp_millis();
        let _ = writeln!(
            out,
            "{}.{:03}\t{}",
            millis.div_euclid(1000),
            millis.rem_euclid(1000),
            point.value
        );
    }
    out
}

pub fn write_summary(
    output: &Path,
    records: &[SummaryRecord],
    unresolved: &BTreeMap<String, usize>,
    collisions: usize,
    rejected_entries: usize,
) -> io::Result<PathBuf> {
    let document = SummaryDocument {
        records,
        unresolved,
        collisions,
        rejected_entries,
    };
    let data = serde_json::to_vec_pretty(&document)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let path = output.join(SUMMARY_FILE);
    atomic_write(&path, &data)?;
    debug!(path = %path.display(), records = records.len(), "Summary written");
    Ok(path)
}

pub fn write_plot(output: &Path, series: &TimeSeries) -> io::Result<PathBuf> {
    let path = output.join(plot_file_name(&series.stream_name));
    atomic_write(&path, render_plot(series).as_bytes())?;
    debug!(path = %path.display(), points = series.points.len(), "Plot data written");
    Ok(path)
}
