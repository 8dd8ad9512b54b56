use crate::config::types::Period;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub observed_at: DateTime<Utc>,
    pub value: f64,
}

/// Points of one stream, strictly ascending by `observed_at`
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeries {
    pub stream_name: String,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRecord {
    pub stream_name: String,
    /// `YYYY-MM-DD` or `YYYY-MM`, UTC
    pub period: String,
    pub period_start: DateTime<Utc>,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Period {
    pub fn key(self, at: DateTime<Utc>) -> String {
        match self {
            Period::Day => at.format("%Y-%m-%d").to_string(),
            Period::Month => at.format("%Y-%m").to_string(),
        }
    }

    /// Midnight UTC on the first day of the period containing `at`
    pub fn start(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let first = match self {
            Period::Day => date,
            Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN))
    }
}

/// Per-period count/min/max/mean. Points must already be sorted, so periods
/// come out in order.
pub fn summarize(series: &TimeSeries, period: Period, unit: Option<&str>) -> Vec<SummaryRecord> {
    let mut records: Vec<SummaryRecord> = Vec::new();
    let mut sum = 0.0;

    for point in &series.points {
        let key = period.key(point.observed_at);
        match records.last_mut() {
            Some(current) if current.period == key => {
                current.count += 1;
                current.min = current.min.min(point.value);
                current.max = current.max.max(point.value);
                sum += point.value;
            }
            _ => {
                if let Some(finished) = records.last_mut() {
                    finished.mean = sum / finished.count as f64;
                }
                records.push(SummaryRecord {
                    stream_name: series.stream_name.clone(),
                    period: key,
                    period_start: period.start(point.observed_at),
                    count: 1,
                    min: point.value,
                    max: point.value,
                    mean: point.value,
                    unit: unit.map(str::to_string),
                });
                sum = point.value;
            }
        }
    }
    if let Some(last) = records.last_mut() {
        last.mean = sum / last.count as f64;
    }

    records
}
