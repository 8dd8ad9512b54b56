pub mod reader;
pub mod w1therm;

pub use reader::{DeviceErrorKind, DeviceReadError, PollOutcome, SensorError, SensorSource};
