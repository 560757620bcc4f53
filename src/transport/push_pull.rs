//! ZeroMQ PUSH/PULL binding
//!
//! One serialized record per zmq message, no envelope. The segmenter side
//! pushes, any number of schedulers pull. Flow control is whatever zmq's
//! high-water mark does; nothing here acknowledges or redelivers.

use std::time::Duration;

use tracing::{debug, warn};

use super::{RecordSink, RecordSource};
use crate::{
    error::{Error, Result},
    record::BurstRecord,
};

pub const DEFAULT_TIMEOUT_MS: i32 = 100;

#[derive(Debug, Clone)]
pub struct ZmqConfig {
    /// zmq endpoint, e.g. `tcp://127.0.0.1:5555`
    pub address: String,
    /// Bind instead of connect
    pub bind: bool,
    /// Send and receive timeout in milliseconds
    pub timeout_ms: i32,
    /// Queue depth in messages, `None` keeps the zmq default
    pub hwm: Option<i32>,
    /// Largest serialized record allowed on this link
    pub max_frame_bytes: Option<usize>,
}

impl ZmqConfig {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_owned(),
            bind: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            hwm: None,
            max_frame_bytes: None,
        }
    }

    pub fn bind(mut self, bind: bool) -> Self {
        self.bind = bind;
        self
    }

    pub fn hwm(mut self, hwm: i32) -> Self {
        self.hwm = Some(hwm);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = Some(limit);
        self
    }

    fn attach(&self, socket: &::zmq::Socket) -> Result<()> {
        if self.bind {
            socket.bind(&self.address)?;
            debug!(address = %self.address, "zmq socket bound");
        } else {
            socket.connect(&self.address)?;
            debug!(address = %self.address, "zmq socket connected");
        }
        Ok(())
    }
}

pub struct PushSink {
    socket: ::zmq::Socket,
    max_frame_bytes: Option<usize>,
    _ctx: ::zmq::Context,
}

impl PushSink {
    pub fn new(config: &ZmqConfig) -> Result<Self> {
        Self::with_context(&::zmq::Context::new(), config)
    }

    /// Use an existing context, required for `inproc://` endpoints
    pub fn with_context(ctx: &::zmq::Context, config: &ZmqConfig) -> Result<Self> {
        let socket = ctx.socket(::zmq::PUSH)?;
        if let Some(hwm) = config.hwm {
            socket.set_sndhwm(hwm)?;
        }
        socket.set_sndtimeo(config.timeout_ms)?;
        socket.set_linger(0)?;
        config.attach(&socket)?;
        Ok(Self {
            socket,
            max_frame_bytes: config.max_frame_bytes,
            _ctx: ctx.clone(),
        })
    }

    /// Push one already serialized record. A full queue that stays full past
    /// the send timeout drops the message.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(limit) = self.max_frame_bytes {
            if bytes.len() > limit {
                return Err(Error::FrameTooLarge {
                    len: bytes.len(),
                    limit,
                });
            }
        }
        match self.socket.send(bytes, 0) {
            Ok(()) => Ok(()),
            Err(::zmq::Error::EAGAIN) => {
                warn!(len = bytes.len(), "push queue full, dropping message");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl RecordSink for PushSink {
    fn publish(&mut self, record: &BurstRecord) -> Result<()> {
        self.send_bytes(&record.encode()?)
    }
}

pub struct PullSource {
    socket: ::zmq::Socket,
    _ctx: ::zmq::Context,
}

impl PullSource {
    pub fn new(config: &ZmqConfig) -> Result<Self> {
        Self::with_context(&::zmq::Context::new(), config)
    }

    pub fn with_context(ctx: &::zmq::Context, config: &ZmqConfig) -> Result<Self> {
        let socket = ctx.socket(::zmq::PULL)?;
        if let Some(hwm) = config.hwm {
            socket.set_rcvhwm(hwm)?;
        }
        socket.set_rcvtimeo(config.timeout_ms)?;
        socket.set_linger(0)?;
        config.attach(&socket)?;
        Ok(Self {
            socket,
            _ctx: ctx.clone(),
        })
    }

    /// Wait up to `timeout_ms` for a message; 0 checks without waiting
    pub fn recv_bytes(&self, timeout_ms: i64) -> Result<Option<Vec<u8>>> {
        if self.socket.poll(::zmq::POLLIN, timeout_ms)? == 0 {
            return Ok(None);
        }
        match self.socket.recv_bytes(::zmq::DONTWAIT) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(::zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl RecordSource for PullSource {
    fn poll_record(&mut self) -> Result<Option<BurstRecord>> {
        self.recv_bytes(0)?
            .map(|b| BurstRecord::decode(&b))
            .transpose()
    }

    fn recv_record(&mut self, timeout: Duration) -> Result<Option<BurstRecord>> {
        self.recv_bytes(timeout.as_millis() as i64)?
            .map(|b| BurstRecord::decode(&b))
            .transpose()
    }
}
