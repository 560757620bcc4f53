//! Record to stream reconstruction
//!
//! Records come in whenever the network delivers them; the output stream is
//! pulled at a steady cadence. Each pull fills exactly the requested number
//! of samples: leftover data from the last truncated record first, then every
//! queued record that lands inside the window, and zeros everywhere else.
//!
//! The queue is FIFO by arrival. A record is late when it starts before the
//! point the output has already been written up to, regardless of where it
//! sits in the queue, and late records are dropped whole.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    complex::Sample,
    error::{Error, Result},
    record::BurstRecord,
    time::Timestamp,
    transport::RecordSource,
};

/// Initial residue capacity, a guess at the largest record size
pub const DEFAULT_RESIDUE_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sample_rate: f64,
    /// Time of output sample zero. `None` captures wall time on first use.
    pub start_time: Option<Timestamp>,
}

impl SchedulerConfig {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            start_time: None,
        }
    }

    /// Fix the origin at integer seconds plus a fractional second. An all
    /// zero start time means "not configured".
    pub fn start_time(mut self, secs: i64, frac_secs: f64) -> Self {
        self.start_time = if secs == 0 && frac_secs == 0.0 {
            None
        } else {
            Some(Timestamp::from_secs_frac(secs, frac_secs))
        };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub on_time: u64,
    pub late: u64,
    pub sequence_gaps: u64,
    pub queued: usize,
}

/// A record with its start resolved to an output sample index
#[derive(Debug, Clone)]
struct Scheduled {
    counts: i64,
    record: BurstRecord,
}

impl Scheduled {
    fn end(&self) -> i64 {
        self.counts + self.record.len() as i64
    }
}

#[derive(Debug)]
struct Shared {
    sample_rate: f64,
    origin: Option<Timestamp>,
    queue: VecDeque<Scheduled>,
    residue: Vec<Sample>,
    expected_sequence: u32,
    stats: SchedulerStats,
}

impl Shared {
    fn origin(&mut self) -> Timestamp {
        *self.origin.get_or_insert_with(|| {
            let now = Timestamp::now();
            debug!(origin = %now, "start time initialized from wall clock");
            now
        })
    }

    fn ingest(&mut self, record: BurstRecord) {
        if record.sequence != self.expected_sequence {
            self.stats.sequence_gaps += 1;
            if record.sequence < self.expected_sequence {
                warn!(
                    expected = self.expected_sequence,
                    received = record.sequence,
                    "duplicate or reordered record"
                );
            } else {
                warn!(
                    expected = self.expected_sequence,
                    received = record.sequence,
                    dropped = record.sequence - self.expected_sequence,
                    "records missing upstream"
                );
            }
        }
        self.expected_sequence = record.sequence.wrapping_add(1);

        if record.is_probe() {
            debug!(sequence = record.sequence, "connection probe received");
            return;
        }

        let origin = self.origin();
        let counts = record.start_time.counts_since(&origin, self.sample_rate);

        if let Some(last) = self.queue.back() {
            if record.start_time < last.record.start_time {
                warn!(
                    previous = %last.record.start_time,
                    current = %record.start_time,
                    "record timestamp went backwards"
                );
            }
            if counts < last.end() {
                self.stats.late += 1;
                warn!(
                    sequence = record.sequence,
                    start = counts,
                    previous_end = last.end(),
                    "record overlaps the previous one, dropping"
                );
                return;
            }
        }

        self.queue.push_back(Scheduled { counts, record });
        self.stats.queued = self.queue.len();
    }

    fn pop_due(&mut self, max_time: i64) -> Option<Scheduled> {
        if self.queue.front()?.counts >= max_time {
            return None;
        }
        let item = self.queue.pop_front();
        self.stats.queued = self.queue.len();
        item
    }
}

/// Cloneable ingress side of a [`Scheduler`], safe to hand to other threads
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SchedulerHandle {
    /// Check sequence, resolve the start to sample counts, drop overlaps and
    /// queue the record
    pub fn on_record_received(&self, record: BurstRecord) {
        self.shared.lock().ingest(record);
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats
    }
}

pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    source: Option<Box<dyn RecordSource>>,
    nitems_written: i64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Mutex::new(Shared {
                sample_rate: config.sample_rate,
                origin: config.start_time,
                queue: VecDeque::new(),
                residue: Vec::with_capacity(DEFAULT_RESIDUE_SIZE),
                expected_sequence: 0,
                stats: SchedulerStats::default(),
            })),
            source: None,
            nitems_written: 0,
        })
    }

    /// Pull records from `source` as output is produced instead of waiting
    /// for them to be pushed in
    pub fn with_source(mut self, source: impl RecordSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn on_record_received(&self, record: BurstRecord) {
        self.shared.lock().ingest(record);
    }

    pub fn set_start_time(&self, secs: i64, picos: u64) {
        self.shared.lock().origin = Some(Timestamp::new(secs, picos));
    }

    /// Origin of the output stream, if it has been fixed yet
    pub fn start_time(&self) -> Option<Timestamp> {
        self.shared.lock().origin
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats
    }

    pub fn nitems_written(&self) -> u64 {
        self.nitems_written as u64
    }

    pub fn residue_len(&self) -> usize {
        self.shared.lock().residue.len()
    }

    /// Fill all of `out` and return its length. Uncovered samples are zero.
    pub fn work(&mut self, out: &mut [Sample]) -> Result<usize> {
        let noutput = out.len();
        out.fill(Sample::zero());
        let b_time = self.nitems_written;
        let max_time = b_time + noutput as i64;

        let (mut output_offset, queue_empty) = {
            let mut shared = self.shared.lock();
            shared.origin();
            let n = shared.residue.len().min(noutput);
            out[..n].copy_from_slice(&shared.residue[..n]);
            shared.residue.drain(..n);
            (n, shared.queue.is_empty())
        };

        if queue_empty {
            self.load_pending()?;
        }

        loop {
            let Some(item) = self.shared.lock().pop_due(max_time) else {
                break;
            };
            let p_time = item.counts;
            let p_len = item.record.len();

            if p_time < b_time + output_offset as i64 {
                let late = {
                    let mut shared = self.shared.lock();
                    shared.stats.late += 1;
                    shared.stats
                };
                warn!(
                    sequence = item.record.sequence,
                    late_by = b_time + output_offset as i64 - p_time,
                    late = late.late,
                    on_time = late.on_time,
                    "record starts in the past, dropping"
                );
                self.load_pending()?;
                continue;
            }

            let offset = (p_time - b_time) as usize;
            let n = p_len.min(noutput - offset);
            out[offset..offset + n].copy_from_slice(&item.record.samples[..n]);
            output_offset = offset + n;

            let mut shared = self.shared.lock();
            shared.stats.on_time += 1;
            if n < p_len {
                shared.residue.clear();
                shared.residue.extend_from_slice(&item.record.samples[n..]);
                debug!(residue = shared.residue.len(), "record truncated, keeping residue");
            } else {
                drop(shared);
                self.load_pending()?;
            }
        }

        if output_offset == 0 {
            debug!(start = b_time, end = max_time, "no records for window, zero filling");
        }

        self.nitems_written = max_time;
        Ok(noutput)
    }

    /// Move every record the source has ready into the queue
    fn load_pending(&mut self) -> Result<()> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        while let Some(record) = source.poll_record()? {
            self.shared.lock().ingest(record);
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let stats = self.stats();
        info!(
            on_time = stats.on_time,
            late = stats.late,
            sequence_gaps = stats.sequence_gaps,
            "scheduler finished"
        );
    }
}
