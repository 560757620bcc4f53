//! Moving records between the segmenter and the scheduler
//!
//! Every transport is either a [`RecordSink`] (where the segmenter publishes)
//! or a [`RecordSource`] (where the scheduler pulls from), so the two ends
//! never care whether the other side lives in this process or across the
//! network.

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{
    error::{Error, Result},
    record::BurstRecord,
};

pub mod ingress;
pub mod push_pull;
pub mod udp;

pub trait RecordSink: Send {
    fn publish(&mut self, record: &BurstRecord) -> Result<()>;
}

pub trait RecordSource: Send {
    /// Take the next record if one is ready right now, never blocking
    fn poll_record(&mut self) -> Result<Option<BurstRecord>>;

    /// Wait up to `timeout` for the next record
    fn recv_record(&mut self, timeout: Duration) -> Result<Option<BurstRecord>>;
}

/// Sending half of an in-process message port
#[derive(Clone, Debug)]
pub struct PortSender(Sender<BurstRecord>);

/// Receiving half of an in-process message port
#[derive(Clone, Debug)]
pub struct PortReceiver(Receiver<BurstRecord>);

/// In-process, ordered hand-off of records. With `capacity` set the sender
/// blocks when the port is full, otherwise the port grows without bound.
pub fn message_port(capacity: Option<usize>) -> (PortSender, PortReceiver) {
    let (tx, rx) = match capacity {
        Some(n) => bounded(n),
        None => unbounded(),
    };
    (PortSender(tx), PortReceiver(rx))
}

impl PortReceiver {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl RecordSink for PortSender {
    fn publish(&mut self, record: &BurstRecord) -> Result<()> {
        self.0.send(record.clone()).map_err(|_| Error::Disconnected)
    }
}

impl RecordSource for PortReceiver {
    fn poll_record(&mut self) -> Result<Option<BurstRecord>> {
        match self.0.try_recv() {
            Ok(r) => Ok(Some(r)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }

    fn recv_record(&mut self, timeout: Duration) -> Result<Option<BurstRecord>> {
        match self.0.recv_timeout(timeout) {
            Ok(r) => Ok(Some(r)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}
