//! This module is responsible for getting scheduled samples out of the process

use std::{
    io::{ErrorKind, Write},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use byte_slice_cast::AsByteSlice;
use rtrb::{Consumer, Producer, PushError};
use tracing::{debug, info};

use crate::{
    complex::{interleave, Sample},
    error::Result,
    scheduler::Scheduler,
    transport::ingress::IngressThread,
};

const WRITE_CHUNK: usize = 8192;
const IDLE: Duration = Duration::from_micros(200);

/// Holds a loop to a sample rate. There's no hardware clock here, so wall
/// time stands in for one.
pub struct Pacer {
    sample_rate: f64,
    start: Option<Instant>,
    emitted: u64,
}

impl Pacer {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            start: None,
            emitted: 0,
        }
    }

    /// Account for `n` more samples and sleep until they are due
    pub fn wait(&mut self, n: usize) {
        let start = *self.start.get_or_insert_with(Instant::now);
        self.emitted += n as u64;
        let due = start + Duration::from_secs_f64(self.emitted as f64 / self.sample_rate);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

/// Run the scheduler a chunk at a time, pushing everything it produces into
/// the ring. Stops on `stop` or once the consumer side has gone away.
/// An `ingress` thread that dies with an error stops the loop with that
/// error. Returns samples produced.
pub fn run_scheduler(
    scheduler: &mut Scheduler,
    chunk: usize,
    mut producer: Producer<Sample>,
    mut pacer: Option<Pacer>,
    mut ingress: Option<IngressThread>,
    stop: &AtomicBool,
) -> Result<u64> {
    let mut buf = vec![Sample::zero(); chunk];
    let mut total = 0u64;
    'outer: while !stop.load(Ordering::Relaxed) {
        if ingress.as_ref().map_or(false, IngressThread::is_finished) {
            if let Some(thread) = ingress.take() {
                let delivered = thread.stop()?;
                info!(delivered, "record source closed, playing out what is queued");
            }
        }
        let n = scheduler.work(&mut buf)?;
        for &s in &buf[..n] {
            let mut pending = s;
            loop {
                match producer.push(pending) {
                    Ok(()) => break,
                    Err(PushError::Full(s)) => {
                        if producer.is_abandoned() {
                            debug!("output consumer gone");
                            break 'outer;
                        }
                        if stop.load(Ordering::Relaxed) {
                            break 'outer;
                        }
                        pending = s;
                        std::hint::spin_loop();
                    }
                }
            }
            total += 1;
        }
        if producer.is_abandoned() {
            break;
        }
        if let Some(p) = pacer.as_mut() {
            p.wait(n);
        }
    }
    if let Some(thread) = ingress {
        let delivered = thread.stop()?;
        info!(delivered, "ingress stopped");
    }
    info!(samples = total, "scheduling finished");
    Ok(total)
}

/// Drain the ring to `writer` as native-endian interleaved f32 until the
/// producer is gone and the ring is empty, or `stop` is set
pub fn write_samples(
    mut consumer: Consumer<Sample>,
    mut writer: impl Write,
    stop: &AtomicBool,
) -> Result<u64> {
    let mut samples = Vec::with_capacity(WRITE_CHUNK);
    let mut floats = Vec::with_capacity(WRITE_CHUNK * 2);
    let mut total = 0u64;
    loop {
        samples.clear();
        while samples.len() < WRITE_CHUNK {
            match consumer.pop() {
                Ok(s) => samples.push(s),
                Err(_) => break,
            }
        }
        if samples.is_empty() {
            if stop.load(Ordering::Relaxed)
                || (consumer.is_abandoned() && consumer.slots() == 0)
            {
                break;
            }
            thread::sleep(IDLE);
            continue;
        }
        interleave(&samples, &mut floats);
        match writer.write_all(floats.as_byte_slice()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("output closed");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        total += samples.len() as u64;
    }
    writer.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::BurstRecord, scheduler::SchedulerConfig, time::Timestamp};
    use rtrb::RingBuffer;

    #[test]
    fn test_pacer() {
        let mut pacer = Pacer::new(1e4);
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait(100);
        }
        // 500 samples at 10 kS/s
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_run_scheduler_until_consumer_leaves() {
        let mut sched = Scheduler::new(SchedulerConfig::new(1e3).start_time(10, 0.0)).unwrap();
        sched.on_record_received(BurstRecord::new(
            Timestamp::from_secs_frac(10, 0.05),
            0,
            vec![Sample::new(1.0, 1.0); 20],
        ));
        let (producer, mut consumer) = RingBuffer::new(256);
        let reader = thread::spawn(move || {
            let mut got = vec![];
            while got.len() < 200 {
                if let Ok(s) = consumer.pop() {
                    got.push(s);
                }
            }
            got
        });
        let stop = AtomicBool::new(false);
        let produced = run_scheduler(&mut sched, 64, producer, None, None, &stop).unwrap();
        let got = reader.join().unwrap();
        assert!(produced >= 200);
        assert!(got[..50].iter().all(|s| s.is_zero()));
        assert!(got[50..70].iter().all(|s| *s == Sample::new(1.0, 1.0)));
        assert!(got[70..].iter().all(|s| s.is_zero()));
    }

    #[test]
    fn test_write_samples() {
        let (mut producer, consumer) = RingBuffer::new(64);
        for i in 0..10 {
            producer.push(Sample::new(i as f32, 2.0)).unwrap();
        }
        drop(producer);
        let mut out = vec![];
        let stop = AtomicBool::new(false);
        assert_eq!(write_samples(consumer, &mut out, &stop).unwrap(), 10);
        assert_eq!(out.len(), 80);
        assert_eq!(&out[8..12], 1f32.to_ne_bytes().as_slice());
        assert_eq!(&out[12..16], 2f32.to_ne_bytes().as_slice());
    }

    #[test]
    fn test_run_scheduler_stops_on_ingress_error() {
        use crate::{transport::RecordSource, Error};

        struct Broken;

        impl RecordSource for Broken {
            fn poll_record(&mut self) -> Result<Option<BurstRecord>> {
                Err(Error::malformed("truncated"))
            }

            fn recv_record(&mut self, _timeout: Duration) -> Result<Option<BurstRecord>> {
                self.poll_record()
            }
        }

        let mut sched = Scheduler::new(SchedulerConfig::new(1e3).start_time(10, 0.0)).unwrap();
        let ingress = IngressThread::spawn(Broken, sched.handle(), Duration::from_millis(10));
        while !ingress.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        let (producer, _consumer) = RingBuffer::new(1 << 16);
        let stop = AtomicBool::new(false);
        let result = run_scheduler(&mut sched, 64, producer, None, Some(ingress), &stop);
        assert!(matches!(result, Err(Error::MalformedRecord(_))));
    }
}
