//! Background receive loop feeding a scheduler's push-based ingress

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info};

use super::RecordSource;
use crate::{
    error::{Error, Result},
    scheduler::SchedulerHandle,
};

/// How long a single blocking receive may wait before the stop flag is
/// checked again
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct IngressThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl IngressThread {
    pub fn spawn(
        source: impl RecordSource + 'static,
        scheduler: SchedulerHandle,
        poll_interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || receive_loop(source, scheduler, flag, poll_interval));
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop receiving and wait for the thread. Records already handed to
    /// the scheduler stay queued; a receive in progress is abandoned.
    /// Returns how many records were delivered.
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.take() {
            Some(h) => h
                .join()
                .unwrap_or_else(|_| Err(Error::ThreadPanicked("ingress"))),
            None => Ok(0),
        }
    }
}

impl Drop for IngressThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("ingress thread exited with error: {}", e);
        }
    }
}

fn receive_loop(
    mut source: impl RecordSource,
    scheduler: SchedulerHandle,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) -> Result<u64> {
    let mut delivered = 0u64;
    while !stop.load(Ordering::Relaxed) {
        match source.recv_record(poll_interval) {
            Ok(Some(record)) => {
                debug!(sequence = record.sequence, len = record.len(), "record received");
                scheduler.on_record_received(record);
                delivered += 1;
            }
            Ok(None) => continue,
            Err(Error::Disconnected) => {
                info!("record source closed, stopping ingress");
                break;
            }
            Err(e) => {
                error!("ingress failed: {}", e);
                return Err(e);
            }
        }
    }
    Ok(delivered)
}
