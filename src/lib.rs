pub mod args;
pub mod capture;
pub mod complex;
pub mod control;
pub mod error;
pub mod exfil;
pub mod monitoring;
pub mod record;
pub mod scheduler;
pub mod segmenter;
pub mod tags;
pub mod time;
pub mod transport;

pub use complex::{Complex, Sample};
pub use error::{Error, Result};
pub use record::BurstRecord;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
pub use segmenter::{BurstMode, Segmenter, SegmenterConfig};
pub use time::Timestamp;

/// Default largest record, in samples
pub const MAX_RECORD_SIZE: usize = 4096;
/// Default number of samples per scheduler pull
pub const PULL_SIZE: usize = 4096;
/// Default ring capacity between I/O threads and the processing loop
pub const RING_CAPACITY: usize = 1 << 20;
