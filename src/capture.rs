//! This module contains the transmit side capture logic

// The read thread does one thing: pull raw interleaved cf32 off a file (or
// stdin) and push samples into an rtrb ring buffer. The segmenter loop owns
// the other end and behaves like a pipeline runtime, offering whatever is
// buffered and taking back however many samples the segmenter consumed.

use std::{
    io::{ErrorKind, Read},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use byte_slice_cast::AsMutByteSlice;
use rtrb::{Consumer, Producer, PushError};
use tracing::{debug, info};

use crate::{
    complex::{deinterleave, Sample},
    error::Result,
    exfil::Pacer,
    segmenter::Segmenter,
    tags::{Tag, TimeTagger},
};

const READ_CHUNK: usize = 8192;
const IDLE: Duration = Duration::from_micros(200);

/// Read native-endian interleaved f32 IQ until EOF or `stop`. Returns the
/// number of samples pushed.
pub fn read_samples(
    mut reader: impl Read,
    mut producer: Producer<Sample>,
    stop: &AtomicBool,
) -> Result<u64> {
    let mut floats = vec![0f32; READ_CHUNK * 2];
    let mut samples = Vec::with_capacity(READ_CHUNK);
    let mut filled = 0usize;
    let mut total = 0u64;
    loop {
        let bytes = floats.as_mut_byte_slice();
        let n = match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        filled += n;
        let whole = filled / 8;
        deinterleave(&floats[..whole * 2], &mut samples);
        // Keep the partial sample for the next read
        floats.as_mut_byte_slice().copy_within(whole * 8..filled, 0);
        filled -= whole * 8;

        for &s in &samples {
            let mut pending = s;
            loop {
                match producer.push(pending) {
                    Ok(()) => break,
                    Err(PushError::Full(s)) => {
                        if stop.load(Ordering::Relaxed) {
                            return Ok(total);
                        }
                        pending = s;
                        // Spin until there's room
                        std::hint::spin_loop();
                    }
                }
            }
            total += 1;
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
    }
    if filled > 0 {
        debug!(bytes = filled, "dropping trailing partial sample");
    }
    info!(samples = total, "input exhausted");
    Ok(total)
}

/// Synthesized burst annotations for untagged input: a length tag and a time
/// tag every `burst_len` samples
pub struct BurstTagger {
    tagger: TimeTagger,
    burst_len: usize,
    next_burst: u64,
}

impl BurstTagger {
    pub fn new(tagger: TimeTagger, burst_len: usize) -> Self {
        Self {
            tagger,
            burst_len,
            next_burst: 0,
        }
    }

    /// Extend `tags` so every burst starting before `end` is tagged
    fn cover(&mut self, end: u64, tags: &mut Vec<Tag>) {
        while self.next_burst < end {
            tags.extend(self.tagger.tag_burst(self.burst_len));
            self.next_burst += self.burst_len as u64;
        }
    }
}

/// Drive the segmenter from the ring until the reader is gone and every
/// sample has been consumed, or `stop` is set. Returns samples consumed.
pub fn segment_ring(
    mut consumer: Consumer<Sample>,
    segmenter: &mut Segmenter,
    mut tagger: Option<BurstTagger>,
    window: usize,
    mut pacer: Option<Pacer>,
    stop: &AtomicBool,
) -> Result<u64> {
    let mut pending: Vec<Sample> = Vec::with_capacity(window);
    let mut tags: Vec<Tag> = vec![];
    let mut consumed = 0u64;
    while !stop.load(Ordering::Relaxed) {
        while pending.len() < window {
            match consumer.pop() {
                Ok(s) => pending.push(s),
                Err(_) => break,
            }
        }
        if let Some(t) = tagger.as_mut() {
            t.cover(segmenter.nitems_read() + pending.len() as u64, &mut tags);
        }

        let probing = segmenter.sequence() == 0;
        if pending.is_empty() && !probing {
            if consumer.is_abandoned() && consumer.slots() == 0 {
                break;
            }
            thread::sleep(IDLE);
            continue;
        }

        let n = segmenter.work(&pending, &tags)?;
        pending.drain(..n);
        consumed += n as u64;
        let read = segmenter.nitems_read();
        tags.retain(|t| t.offset >= read);
        if let Some(p) = pacer.as_mut() {
            p.wait(n);
        }
    }
    info!(samples = consumed, records = segmenter.sequence(), "segmenting finished");
    Ok(consumed)
}
