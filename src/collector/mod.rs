pub mod batch;
pub mod runner;

pub use batch::{Batch, BatchDocument, BatchStatus, Reading};
pub use runner::{CollectorError, CollectorRunner, CycleOutcome, CycleReport};
