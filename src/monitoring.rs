//! In this module, we implement the runtime monitoring for the scheduler.
//! Counters live in the scheduler itself; this just samples them on a timer
//! and logs what changed since the last report.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{info, warn};

use crate::scheduler::{SchedulerHandle, SchedulerStats};

pub struct StatsReporter {
    stop: Sender<()>,
    thread: Option<JoinHandle<SchedulerStats>>,
}

impl StatsReporter {
    pub fn spawn(handle: SchedulerHandle, interval: Duration) -> Self {
        let (stop, stop_rx) = bounded(1);
        let thread = thread::spawn(move || {
            let ticker = tick(interval);
            let mut last = handle.stats();
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let now = handle.stats();
                        report(&last, &now);
                        last = now;
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            handle.stats()
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stop reporting and return the counters as of shutdown
    pub fn stop(mut self) -> Option<SchedulerStats> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<SchedulerStats> {
        let _ = self.stop.try_send(());
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(last: &SchedulerStats, now: &SchedulerStats) {
    let late = now.late - last.late;
    let gaps = now.sequence_gaps - last.sequence_gaps;
    if late > 0 || gaps > 0 {
        warn!(late, sequence_gaps = gaps, queued = now.queued, "records lost since last report");
    }
    info!(
        on_time = now.on_time - last.on_time,
        total_on_time = now.on_time,
        total_late = now.late,
        queued = now.queued,
        "scheduler stats"
    );
}
