//! Stream annotations
//!
//! The invoking runtime marks burst boundaries with tags placed at absolute
//! sample offsets (counted from the first sample the consumer ever read).
//! Tags past the current window are simply not looked at until the window
//! reaches them.

use tracing::debug;

use crate::time::Timestamp;

/// Default key for the burst time annotation
pub const TX_TIME: &str = "tx_time";
/// Default key for the start-of-burst marker
pub const TX_SOB: &str = "tx_sob";
/// Default key for the end-of-burst marker
pub const TX_EOB: &str = "tx_eob";
/// Conventional key for burst length annotations
pub const PACKET_LEN: &str = "packet_len";

#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Flag,
    Length(u64),
    Time(Timestamp),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub offset: u64,
    pub key: String,
    pub value: TagValue,
}

impl Tag {
    pub fn new(offset: u64, key: &str, value: TagValue) -> Self {
        Self {
            offset,
            key: key.to_owned(),
            value,
        }
    }

    pub fn length(offset: u64, key: &str, len: u64) -> Self {
        Self::new(offset, key, TagValue::Length(len))
    }

    pub fn time(offset: u64, key: &str, time: Timestamp) -> Self {
        Self::new(offset, key, TagValue::Time(time))
    }

    pub fn flag(offset: u64, key: &str) -> Self {
        Self::new(offset, key, TagValue::Flag)
    }
}

/// Tags with `key` whose offsets fall in `[start, end)`, in offset order
pub fn tags_in_window<'a>(tags: &'a [Tag], start: u64, end: u64, key: &str) -> Vec<&'a Tag> {
    let mut found: Vec<&Tag> = tags
        .iter()
        .filter(|t| t.key == key && t.offset >= start && t.offset < end)
        .collect();
    found.sort_by_key(|t| t.offset);
    found
}

/// Stamps each burst of a length-delimited stream with the time it should go
/// out at, starting from a fixed start time and advancing by the length of
/// every burst it sees
#[derive(Debug, Clone)]
pub struct TimeTagger {
    block_time: Timestamp,
    sample_rate: f64,
    time_key: String,
    length_key: Option<String>,
    sob_key: Option<String>,
    offset: u64,
}

impl TimeTagger {
    pub fn new(start: Timestamp, sample_rate: f64) -> Self {
        Self {
            block_time: start,
            sample_rate,
            time_key: TX_TIME.to_owned(),
            length_key: None,
            sob_key: None,
            offset: 0,
        }
    }

    pub fn with_time_key(mut self, key: &str) -> Self {
        self.time_key = key.to_owned();
        self
    }

    /// Also emit a length tag for every burst under `key`
    pub fn with_length_key(mut self, key: &str) -> Self {
        self.length_key = Some(key.to_owned());
        self
    }

    /// Also mark the first sample of every burst with a flag under `key`
    pub fn with_sob_key(mut self, key: &str) -> Self {
        self.sob_key = Some(key.to_owned());
        self
    }

    pub fn block_time(&self) -> Timestamp {
        self.block_time
    }

    /// Tag the next burst of `len` samples, which begins right after the
    /// previous one
    pub fn tag_burst(&mut self, len: usize) -> Vec<Tag> {
        let mut out = Vec::with_capacity(3);
        if let Some(key) = &self.length_key {
            out.push(Tag::length(self.offset, key, len as u64));
        }
        if let Some(key) = &self.sob_key {
            out.push(Tag::flag(self.offset, key));
        }
        out.push(Tag::time(self.offset, &self.time_key, self.block_time));
        debug!(offset = self.offset, time = %self.block_time, len, "tagged burst");
        self.block_time = self.block_time.add_samples(len, self.sample_rate);
        self.offset += len as u64;
        out
    }
}
