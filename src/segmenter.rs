//! Stream to record segmentation
//!
//! Every call looks at the samples the runtime currently has buffered plus
//! the tags on them, decides how many of those samples form the next record,
//! publishes exactly that one record and reports how many samples it took.
//! Anything left over is offered again on the next call.

use tracing::{debug, warn};

use crate::{
    complex::Sample,
    error::{Error, Result},
    record::BurstRecord,
    tags::{tags_in_window, Tag, TagValue, TX_SOB, TX_TIME},
    time::{samples_to_picos, Timestamp},
    transport::RecordSink,
};

/// Time tags up to this fraction of a sample behind the clock are not
/// treated as regressions
const TIME_TAG_TOLERANCE_SAMPLES: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Name of the event stream, used in logs
    pub event_name: String,
    /// Largest record in samples; longer bursts are split
    pub max_record_size: usize,
    /// Legacy constant delay added to every record's start time
    pub schedule_offset_ps: i64,
    pub sample_rate: f64,
    /// Burst length tag key. `None` selects start-of-burst tag mode.
    pub length_tag: Option<String>,
    pub time_tag: String,
    pub sob_tag: String,
}

impl SegmenterConfig {
    pub fn new(event_name: &str, max_record_size: usize, sample_rate: f64) -> Self {
        Self {
            event_name: event_name.to_owned(),
            max_record_size,
            schedule_offset_ps: 0,
            sample_rate,
            length_tag: None,
            time_tag: TX_TIME.to_owned(),
            sob_tag: TX_SOB.to_owned(),
        }
    }

    pub fn length_tag(mut self, key: &str) -> Self {
        self.length_tag = if key.is_empty() {
            None
        } else {
            Some(key.to_owned())
        };
        self
    }

    pub fn schedule_offset_ps(mut self, offset: i64) -> Self {
        self.schedule_offset_ps = offset;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_record_size == 0 {
            return Err(Error::config("max record size must be at least one sample"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// How burst boundaries are marked on the input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstMode {
    /// A length tag on the first sample of every burst
    LengthTag(String),
    /// A marker tag on the first sample of every burst
    StartOfBurst(String),
}

pub struct Segmenter {
    config: SegmenterConfig,
    mode: BurstMode,
    sinks: Vec<Box<dyn RecordSink>>,
    block_time: Timestamp,
    remaining_in_burst: u64,
    sequence: u32,
    nitems_read: u64,
    probe_pending: bool,
}

impl Segmenter {
    /// New segmenter whose clock starts at the current wall time
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        Self::with_start_time(config, Timestamp::now())
    }

    pub fn with_start_time(config: SegmenterConfig, start: Timestamp) -> Result<Self> {
        config.validate()?;
        let mode = match &config.length_tag {
            Some(key) => BurstMode::LengthTag(key.clone()),
            None => BurstMode::StartOfBurst(config.sob_tag.clone()),
        };
        debug!(event = %config.event_name, ?mode, "segmenter created");
        Ok(Self {
            config,
            mode,
            sinks: vec![],
            block_time: start,
            remaining_in_burst: 0,
            sequence: 0,
            nitems_read: 0,
            probe_pending: true,
        })
    }

    /// Publish every record to `sink` as well
    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn with_sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn mode(&self) -> &BurstMode {
        &self.mode
    }

    /// Start time the next record will carry, before the schedule offset
    pub fn block_time(&self) -> Timestamp {
        self.block_time
    }

    pub fn remaining_in_burst(&self) -> u64 {
        self.remaining_in_burst
    }

    /// Sequence number of the next record
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Total input samples consumed so far
    pub fn nitems_read(&self) -> u64 {
        self.nitems_read
    }

    /// Process one window of input. `input[0]` is absolute sample
    /// `nitems_read()`; tags are addressed in the same absolute offsets.
    /// Returns how many samples were consumed.
    pub fn work(&mut self, input: &[Sample], tags: &[Tag]) -> Result<usize> {
        debug!(
            event = %self.config.event_name,
            ninput = input.len(),
            block_time = %self.block_time,
            "work called"
        );

        if self.probe_pending {
            let probe = BurstRecord::probe(self.stamp(), self.sequence);
            debug!(sequence = self.sequence, "sending zero length probe record");
            self.publish(&probe)?;
            self.sequence = self.sequence.wrapping_add(1);
            self.probe_pending = false;
            return Ok(0);
        }

        if input.is_empty() {
            return Ok(0);
        }

        let n = if self.remaining_in_burst > 0 {
            self.continue_burst(input.len(), tags)
        } else {
            match self.mode.clone() {
                BurstMode::LengthTag(key) => self.length_tag_window(input.len(), tags, &key),
                BurstMode::StartOfBurst(key) => self.sob_window(input.len(), tags, &key),
            }
        };

        self.emit(&input[..n])?;
        Ok(n)
    }

    fn continue_burst(&mut self, available: usize, tags: &[Tag]) -> usize {
        debug!(remaining = self.remaining_in_burst, "mid-burst");
        let n = (self.remaining_in_burst.min(available as u64) as usize).min(self.config.max_record_size);
        let end = self.nitems_read + n as u64;
        for tag in tags.iter().filter(|t| t.offset >= self.nitems_read && t.offset < end) {
            warn!(
                offset = tag.offset,
                key = %tag.key,
                value = ?tag.value,
                "ignoring tag inside burst"
            );
        }
        self.remaining_in_burst -= n as u64;
        n
    }

    fn length_tag_window(&mut self, available: usize, tags: &[Tag], key: &str) -> usize {
        let start = self.nitems_read;
        let len_tags: Vec<(u64, u64)> = tags_in_window(tags, start, start + available as u64, key)
            .into_iter()
            .filter_map(|t| match t.value {
                TagValue::Length(0) => {
                    warn!(offset = t.offset, "ignoring zero length burst tag");
                    None
                }
                TagValue::Length(len) => Some((t.offset, len)),
                ref other => {
                    warn!(offset = t.offset, value = ?other, "length tag without a length");
                    None
                }
            })
            .collect();

        let Some(&(offset, burst_len)) = len_tags.first() else {
            debug!("no length tags found, passing samples through");
            self.apply_time_tag(tags);
            return available.min(self.config.max_record_size);
        };

        if offset != start {
            debug!(tag_offset = offset, nitems_read = start, "fast forwarding to length tag");
            self.apply_time_tag(tags);
            return ((offset - start) as usize).min(self.config.max_record_size);
        }

        let n = (burst_len.min(available as u64) as usize).min(self.config.max_record_size);
        self.remaining_in_burst = burst_len - n as u64;
        self.apply_time_tag(tags);
        debug!(burst_len, n, remaining = self.remaining_in_burst, "starting burst");
        n
    }

    fn sob_window(&mut self, available: usize, tags: &[Tag], key: &str) -> usize {
        let start = self.nitems_read;
        let mut sob_tags = tags_in_window(tags, start, start + available as u64, key);
        let before = sob_tags.len();
        sob_tags.dedup_by_key(|t| t.offset);
        if sob_tags.len() != before {
            warn!(
                duplicates = before - sob_tags.len(),
                "ignoring repeated start of burst tags at the same offset"
            );
        }
        self.apply_time_tag(tags);

        let n = match sob_tags.as_slice() {
            [] => {
                debug!("no start of burst tags found, passing samples through");
                available
            }
            [first, ..] if first.offset != start => {
                debug!(tag_offset = first.offset, nitems_read = start, "fast forwarding to start of burst");
                (first.offset - start) as usize
            }
            [first, second, ..] => {
                debug!(from = first.offset, to = second.offset, "burst bounded by next start of burst");
                (second.offset - first.offset) as usize
            }
            [_] => available,
        };
        n.min(self.config.max_record_size)
    }

    /// Let a time tag on the first sample of the window reset the clock
    fn apply_time_tag(&mut self, tags: &[Tag]) {
        let start = self.nitems_read;
        let found = tags_in_window(tags, start, start + 1, &self.config.time_tag);
        let Some(tag) = found.first() else {
            return;
        };
        let TagValue::Time(tag_time) = tag.value else {
            warn!(offset = tag.offset, value = ?tag.value, "time tag without a time");
            return;
        };
        let tolerance = samples_to_picos(TIME_TAG_TOLERANCE_SAMPLES, self.config.sample_rate);
        if tag_time.picos_since(&self.block_time) >= -tolerance {
            debug!(time = %tag_time, "updating block time from tag");
        } else {
            // The tag still wins; downstream will see time run backwards
            warn!(
                block_time = %self.block_time,
                tag_time = %tag_time,
                "time tag is behind block time, adopting it anyway"
            );
        }
        self.block_time = tag_time;
    }

    fn emit(&mut self, samples: &[Sample]) -> Result<()> {
        let record = BurstRecord::new(self.stamp(), self.sequence, samples.to_vec());
        debug!(
            sequence = record.sequence,
            len = record.len(),
            start = %record.start_time,
            "publishing record"
        );
        self.publish(&record)?;
        self.sequence = self.sequence.wrapping_add(1);
        self.nitems_read += samples.len() as u64;
        self.block_time = self.block_time.add_samples(samples.len(), self.config.sample_rate);
        Ok(())
    }

    fn stamp(&self) -> Timestamp {
        self.block_time.add_picos(self.config.schedule_offset_ps as i128)
    }

    fn publish(&mut self, record: &BurstRecord) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.publish(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tags::{PACKET_LEN, TX_SOB},
        transport::{message_port, PortReceiver, RecordSource},
    };

    const RATE: f64 = 1e6;

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n).map(|i| Sample::new(i as f32, 0.0)).collect()
    }

    fn primed(config: SegmenterConfig) -> (Segmenter, PortReceiver) {
        let (tx, mut rx) = message_port(None);
        let mut seg = Segmenter::with_start_time(config, Timestamp::new(100, 0))
            .unwrap()
            .with_sink(tx);
        assert_eq!(seg.work(&ramp(8), &[]).unwrap(), 0);
        assert!(rx.poll_record().unwrap().unwrap().is_probe());
        (seg, rx)
    }

    fn drain(rx: &mut PortReceiver) -> Vec<BurstRecord> {
        let mut out = vec![];
        while let Some(r) = rx.poll_record().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_first_call_is_probe() {
        let (tx, mut rx) = message_port(None);
        let mut seg = Segmenter::with_start_time(
            SegmenterConfig::new("tx", 1000, RATE),
            Timestamp::new(3, 0),
        )
        .unwrap()
        .with_sink(tx);
        assert_eq!(seg.work(&ramp(4096), &[]).unwrap(), 0);
        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert!(records[0].is_probe());
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[0].start_time, Timestamp::new(3, 0));
        assert_eq!(seg.nitems_read(), 0);
        assert_eq!(seg.block_time(), Timestamp::new(3, 0));
    }

    #[test]
    fn test_length_tag_burst() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE).length_tag(PACKET_LEN));
        let input = ramp(1000);
        let tags = vec![Tag::length(0, PACKET_LEN, 300)];
        assert_eq!(seg.work(&input, &tags).unwrap(), 300);
        let rec = drain(&mut rx);
        assert_eq!(rec.len(), 1);
        assert_eq!(rec[0].len(), 300);
        assert_eq!(rec[0].sequence, 1);
        assert_eq!(seg.remaining_in_burst(), 0);
        assert_eq!(seg.block_time(), Timestamp::new(100, 300_000_000));
    }

    #[test]
    fn test_length_tag_longer_than_window() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE).length_tag(PACKET_LEN));
        let tags = vec![Tag::length(0, PACKET_LEN, 1000)];
        assert_eq!(seg.work(&ramp(300), &tags).unwrap(), 300);
        assert_eq!(seg.remaining_in_burst(), 700);
        // A stray tag mid burst is ignored
        let stray = vec![Tag::length(400, PACKET_LEN, 5)];
        assert_eq!(seg.work(&ramp(1000), &stray).unwrap(), 700);
        assert_eq!(seg.remaining_in_burst(), 0);
        let lens: Vec<usize> = drain(&mut rx).iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![300, 700]);
    }

    #[test]
    fn test_max_record_size_split() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 2000, RATE).length_tag(PACKET_LEN));
        let input = ramp(5000);
        let tags = vec![Tag::length(0, PACKET_LEN, 5000)];
        let mut pos = 0;
        while pos < input.len() {
            pos += seg.work(&input[pos..], &tags).unwrap();
        }
        let records = drain(&mut rx);
        let lens: Vec<usize> = records.iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![2000, 2000, 1000]);
        let seqs: Vec<u32> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(records[1].start_time, Timestamp::new(100, 2_000_000_000));
        assert_eq!(records[2].start_time, Timestamp::new(100, 4_000_000_000));
        assert_eq!(seg.block_time(), Timestamp::new(100, 5_000_000_000));
        assert_eq!(records[2].samples[0], Sample::new(4000.0, 0.0));
    }

    #[test]
    fn test_length_tag_fast_forward() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE).length_tag(PACKET_LEN));
        let tags = vec![Tag::length(120, PACKET_LEN, 50)];
        assert_eq!(seg.work(&ramp(500), &tags).unwrap(), 120);
        assert_eq!(seg.work(&ramp(380), &tags).unwrap(), 50);
        let lens: Vec<usize> = drain(&mut rx).iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![120, 50]);
    }

    #[test]
    fn test_no_length_tags() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 256, RATE).length_tag(PACKET_LEN));
        assert_eq!(seg.work(&ramp(1000), &[]).unwrap(), 256);
        assert_eq!(seg.work(&ramp(100), &[]).unwrap(), 100);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_zero_length_tag_ignored() {
        let (mut seg, _rx) = primed(SegmenterConfig::new("tx", 1000, RATE).length_tag(PACKET_LEN));
        let tags = vec![Tag::length(0, PACKET_LEN, 0), Tag::length(40, PACKET_LEN, 10)];
        assert_eq!(seg.work(&ramp(100), &tags).unwrap(), 40);
    }

    #[test]
    fn test_sob_mode() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        assert_eq!(*seg.mode(), BurstMode::StartOfBurst(TX_SOB.to_owned()));
        let tags = vec![
            Tag::flag(10, TX_SOB),
            Tag::flag(60, TX_SOB),
        ];
        let input = ramp(200);
        // Fast forward to the first marker
        assert_eq!(seg.work(&input, &tags).unwrap(), 10);
        // One burst up to the second marker
        assert_eq!(seg.work(&input[10..], &tags).unwrap(), 50);
        // Last marker with nothing after it takes the whole window
        assert_eq!(seg.work(&input[60..], &tags).unwrap(), 140);
        let lens: Vec<usize> = drain(&mut rx).iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![10, 50, 140]);
    }

    #[test]
    fn test_sob_repeated_marker_still_progresses() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        let tags = vec![Tag::flag(0, TX_SOB), Tag::flag(0, TX_SOB), Tag::flag(30, TX_SOB)];
        let input = ramp(100);
        assert_eq!(seg.work(&input, &tags).unwrap(), 30);
        let tags = vec![Tag::flag(0, TX_SOB), Tag::flag(0, TX_SOB)];
        assert_eq!(seg.work(&input[30..], &[]).unwrap(), 70);
        let (mut seg2, mut rx2) = primed(SegmenterConfig::new("tx", 1000, RATE));
        assert_eq!(seg2.work(&input, &tags).unwrap(), 100);
        let lens: Vec<usize> = drain(&mut rx).iter().map(|r| r.len()).collect();
        assert_eq!(lens, vec![30, 70]);
        assert_eq!(drain(&mut rx2)[0].len(), 100);
        assert_eq!(seg2.sequence(), 2);
    }

    #[test]
    fn test_time_tag_off_first_sample_ignored() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        let tags = vec![Tag::time(5, TX_TIME, Timestamp::new(200, 0))];
        assert_eq!(seg.work(&ramp(10), &tags).unwrap(), 10);
        assert_eq!(drain(&mut rx)[0].start_time, Timestamp::new(100, 0));
        assert_eq!(seg.block_time(), Timestamp::new(100, 0).add_samples(10, RATE));
    }

    #[test]
    fn test_sob_without_markers_caps_at_max() {
        let (mut seg, _rx) = primed(SegmenterConfig::new("tx", 64, RATE));
        assert_eq!(seg.work(&ramp(200), &[]).unwrap(), 64);
    }

    #[test]
    fn test_time_tag_moves_clock() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        let later = Timestamp::new(200, 0);
        let tags = vec![Tag::flag(0, TX_SOB), Tag::time(0, TX_TIME, later)];
        seg.work(&ramp(100), &tags).unwrap();
        let rec = drain(&mut rx);
        assert_eq!(rec[0].start_time, later);
        assert_eq!(seg.block_time(), later.add_samples(100, RATE));
    }

    #[test]
    fn test_time_tag_regression_adopted() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        let earlier = Timestamp::new(50, 0);
        let tags = vec![Tag::time(0, TX_TIME, earlier)];
        seg.work(&ramp(10), &tags).unwrap();
        assert_eq!(drain(&mut rx)[0].start_time, earlier);
    }

    #[test]
    fn test_schedule_offset() {
        let config = SegmenterConfig::new("tx", 1000, RATE).schedule_offset_ps(1_000);
        let (mut seg, mut rx) = primed(config);
        seg.work(&ramp(10), &[]).unwrap();
        let rec = drain(&mut rx);
        assert_eq!(rec[0].start_time, Timestamp::new(100, 1_000));
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        let (mut seg, mut rx) = primed(SegmenterConfig::new("tx", 1000, RATE));
        assert_eq!(seg.work(&[], &[]).unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(seg.sequence(), 1);
    }

    #[test]
    fn test_bad_config() {
        assert!(Segmenter::new(SegmenterConfig::new("tx", 0, RATE)).is_err());
        assert!(Segmenter::new(SegmenterConfig::new("tx", 10, 0.0)).is_err());
    }
}
