use crate::collector::batch::Reading;
use crate::config::types::SensorsConfig;
use crate::sensor::w1therm;
use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("invalid address pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A single device that could not be read during a poll. Never fatal to the poll.
#[derive(Debug, Error)]
#[error("device {address}: {kind}")]
pub struct DeviceReadError {
    pub address: String,
    pub kind: DeviceErrorKind,
}

#[derive(Debug, Error)]
pub enum DeviceErrorKind {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("crc check failed")]
    CrcMismatch,

    #[error("unparseable value: {0:?}")]
    Unparseable(String),
}

/// Result of one poll: all readings share a single logical timestamp.
#[derive(Debug)]
pub struct PollOutcome {
    pub observed_at: DateTime<Utc>,
    pub readings: Vec<Reading>,
    pub errors: Vec<DeviceReadError>,
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Reads the current value of every hardware-address directory under a
/// w1-style device tree (`<root>/<address>/<value_file>`).
pub struct SensorSource {
    root: PathBuf,
    value_file: String,
    address_pattern: Regex,
}

impl SensorSource {
    pub fn new(config: &SensorsConfig) -> Result<Self, SensorError> {
        Ok(Self {
            root: config.path.clone(),
            value_file: config.value_file.clone(),
            address_pattern: Regex::new(&config.address_pattern)?,
        })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn poll(&self) -> PollOutcome {
        // Millisecond precision survives the JSON round trip exactly
        self.poll_at(Utc::now().trunc_subsecs(3))
    }

    pub fn poll_at(&self, observed_at: DateTime<Utc>) -> PollOutcome {
        let mut outcome = PollOutcome {
            observed_at,
            readings: Vec::new(),
            errors: Vec::new(),
        };

        let addresses = match self.present_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                // No bus (driver not loaded, gizmo unplugged) means no devices
                warn!(root = %self.root.display(), error = %e, "Device tree unavailable, poll is empty");
                return outcome;
            }
        };

        for address in addresses {
            let path = self.root.join(&address).join(&self.value_file);
            let parsed = fs::read_to_string(&path)
                .map_err(DeviceErrorKind::from)
                .and_then(|content| w1therm::parse_value(&content));

            match parsed {
                Ok(value) => {
                    debug!(address = %address, value, "Read device");
                    outcome.readings.push(Reading::new(address, value, observed_at));
                }
                Err(kind) => outcome.errors.push(DeviceReadError { address, kind }),
            }
        }

        outcome
    }

    /// Device directory names matching the address pattern, sorted
    fn present_addresses(&self) -> io::Result<Vec<String>> {
        let mut addresses = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.address_pattern.is_match(&name) {
                addresses.push(name);
            } else {
                debug!(entry = %name, "Skipping non-device entry");
            }
        }
        addresses.sort();
        Ok(addresses)
    }
}
