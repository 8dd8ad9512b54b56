//! Parsing of the `w1_slave` pseudofile exposed by the Linux w1_therm driver.
//!
//! ```text
//! 03 01 4b 46 7f ff 0c 10 30 : crc=30 YES
//! 03 01 4b 46 7f ff 0c 10 30 t=16187
//! ```
//!
//! The second line carries the driver's conversion in thousandths. A plain
//! decimal file (such as the newer `temperature` attribute) is passed through
//! unchanged.

use super::reader::DeviceErrorKind;

pub fn parse_value(content: &str) -> Result<f64, DeviceErrorKind> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DeviceErrorKind::Unparseable("empty value file".to_string()));
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        return finite(value, trimmed);
    }

    let mut lines = trimmed.lines();
    let status = lines.next().unwrap_or_default();
    if !status.contains("crc=") {
        return Err(DeviceErrorKind::Unparseable(trimmed.to_string()));
    }
    match status.split_whitespace().last() {
        Some("YES") => {}
        Some("NO") => return Err(DeviceErrorKind::CrcMismatch),
        _ => return Err(DeviceErrorKind::Unparseable(status.to_string())),
    }

    let data = lines
        .next()
        .ok_or_else(|| DeviceErrorKind::Unparseable("missing data line".to_string()))?;
    let (_, raw) = data
        .rsplit_once("t=")
        .ok_or_else(|| DeviceErrorKind::Unparseable(data.to_string()))?;
    let milli: i64 = raw
        .trim()
        .parse()
        .map_err(|_| DeviceErrorKind::Unparseable(data.to_string()))?;

    finite(milli as f64 / 1000.0, data)
}

fn finite(value: f64, raw: &str) -> Result<f64, DeviceErrorKind> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DeviceErrorKind::Unparseable(raw.to_string()))
    }
}
