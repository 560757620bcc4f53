//! UDP bridge between a local message endpoint and one remote peer
//!
//! Each datagram carries exactly one serialized record and nothing else.
//! Inbound datagrams are handed to a channel as raw bytes, so the bridge
//! relays anything, not only burst records. Outbound frames larger than the
//! MTU are refused outright since there is no fragmentation.

use std::{
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::RecordSink;
use crate::{
    error::{Error, Result},
    record::BurstRecord,
};

pub const DEFAULT_MTU: usize = 10000;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// Listen on the configured address; reply to whoever sent last
    UdpServer,
    /// Send to the configured address
    UdpClient,
}

impl FromStr for BridgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UDP_SERVER" => Ok(Self::UdpServer),
            "UDP_CLIENT" => Ok(Self::UdpClient),
            other => Err(Error::UnknownTransport(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub kind: BridgeKind,
    pub addr: String,
    pub port: u16,
    pub mtu: usize,
}

impl BridgeConfig {
    pub fn new(kind: BridgeKind, addr: &str, port: u16) -> Self {
        Self {
            kind,
            addr: addr.to_owned(),
            port,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.addr.as_str(), self.port)
            .to_socket_addrs()?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| Error::config(format!("cannot resolve {}:{}", self.addr, self.port)))
    }
}

pub struct UdpBridge {
    socket: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    mtu: usize,
    stop: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl UdpBridge {
    /// Open the socket and start relaying inbound datagrams into `inbound`
    pub fn start(config: &BridgeConfig, inbound: Sender<Vec<u8>>) -> Result<Self> {
        if config.mtu == 0 {
            return Err(Error::config("MTU must be non-zero"));
        }
        let (socket, peer) = match config.kind {
            BridgeKind::UdpServer if config.addr.is_empty() || config.addr == "0.0.0.0" => {
                if config.port == 0 {
                    return Err(Error::config("invalid port for UDP_SERVER"));
                }
                (UdpSocket::bind(("0.0.0.0", config.port))?, None)
            }
            BridgeKind::UdpServer => (UdpSocket::bind(config.resolve()?)?, None),
            BridgeKind::UdpClient => (UdpSocket::bind(("0.0.0.0", 0))?, Some(config.resolve()?)),
        };
        debug!(
            kind = ?config.kind,
            local = ?socket.local_addr().ok(),
            peer = ?peer,
            "udp bridge listening"
        );

        let reader = socket.try_clone()?;
        reader.set_read_timeout(Some(READ_TIMEOUT))?;
        let peer = Arc::new(Mutex::new(peer));
        let stop = Arc::new(AtomicBool::new(false));
        let rx_thread = {
            let peer = peer.clone();
            let stop = stop.clone();
            let mtu = config.mtu;
            thread::spawn(move || receive_datagrams(reader, mtu, peer, inbound, stop))
        };

        Ok(Self {
            socket,
            peer,
            mtu: config.mtu,
            stop,
            rx_thread: Some(rx_thread),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Where outbound datagrams go, if known yet
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.mtu {
            warn!(len = bytes.len(), mtu = self.mtu, "datagram does not fit in MTU");
            return Err(Error::FrameTooLarge {
                len: bytes.len(),
                limit: self.mtu,
            });
        }
        let Some(peer) = self.peer() else {
            warn!(
                local = ?self.socket.local_addr().ok(),
                "other endpoint not known yet, skipping send"
            );
            return Ok(());
        };
        self.socket.send_to(bytes, peer)?;
        Ok(())
    }

    pub fn send_record(&self, record: &BurstRecord) -> Result<()> {
        self.send(&record.encode()?)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.rx_thread.take() {
            if h.join().is_err() {
                error!("udp receive thread panicked");
            }
        }
    }
}

impl RecordSink for UdpBridge {
    fn publish(&mut self, record: &BurstRecord) -> Result<()> {
        self.send_record(record)
    }
}

impl Drop for UdpBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_datagrams(
    socket: UdpSocket,
    mtu: usize,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    inbound: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    // One spare byte so an oversized datagram shows up as longer than the MTU
    let mut buf = vec![0u8; mtu + 1];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                *peer.lock() = Some(from);
                if n > mtu {
                    warn!(%from, mtu, "datagram larger than MTU, dropping");
                    continue;
                }
                if inbound.send(buf[..n].to_vec()).is_err() {
                    debug!("inbound channel closed, stopping udp receive");
                    break;
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                error!("udp receive failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{complex::Sample, time::Timestamp};
    use crossbeam_channel::unbounded;

    #[test]
    fn test_kind_parse() {
        assert_eq!("UDP_SERVER".parse::<BridgeKind>().unwrap(), BridgeKind::UdpServer);
        assert_eq!("UDP_CLIENT".parse::<BridgeKind>().unwrap(), BridgeKind::UdpClient);
        assert!(matches!(
            "TCP_SERVER".parse::<BridgeKind>(),
            Err(Error::UnknownTransport(_))
        ));
    }

    #[test]
    fn test_server_needs_port() {
        let (tx, _rx) = unbounded();
        let config = BridgeConfig::new(BridgeKind::UdpServer, "", 0);
        assert!(matches!(
            UdpBridge::start(&config, tx),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_request_response() {
        let (server_tx, server_rx) = unbounded();
        let server = UdpBridge::start(
            &BridgeConfig::new(BridgeKind::UdpServer, "127.0.0.1", 0),
            server_tx,
        )
        .unwrap();
        let port = server.local_addr().unwrap().port();

        // Nobody has talked to the server yet
        assert!(server.peer().is_none());
        server.send(b"nobody home").unwrap();

        let (client_tx, client_rx) = unbounded();
        let client = UdpBridge::start(
            &BridgeConfig::new(BridgeKind::UdpClient, "127.0.0.1", port),
            client_tx,
        )
        .unwrap();

        let rec = BurstRecord::new(Timestamp::new(12, 34), 7, vec![Sample::new(0.5, -0.5); 32]);
        client.send_record(&rec).unwrap();
        let got = server_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(BurstRecord::decode(&got).unwrap(), rec);

        // Server answers whoever spoke last
        assert!(server.peer().is_some());
        server.send(&got).unwrap();
        let echoed = client_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(echoed, got);
    }

    #[test]
    fn test_mtu_enforced() {
        let (tx, _rx) = unbounded();
        let client = UdpBridge::start(
            &BridgeConfig::new(BridgeKind::UdpClient, "127.0.0.1", 9).mtu(128),
            tx,
        )
        .unwrap();
        let rec = BurstRecord::new(Timestamp::new(0, 0), 0, vec![Sample::zero(); 100]);
        assert!(matches!(
            client.send_record(&rec),
            Err(Error::FrameTooLarge { limit: 128, .. })
        ));
    }

    #[test]
    fn test_oversized_datagram_dropped() {
        let (server_tx, server_rx) = unbounded();
        let server = UdpBridge::start(
            &BridgeConfig::new(BridgeKind::UdpServer, "127.0.0.1", 0).mtu(16),
            server_tx,
        )
        .unwrap();
        let port = server.local_addr().unwrap().port();
        let (client_tx, _client_rx) = unbounded();
        let client = UdpBridge::start(
            &BridgeConfig::new(BridgeKind::UdpClient, "127.0.0.1", port),
            client_tx,
        )
        .unwrap();
        client.send(&[7u8; 32]).unwrap();
        client.send(&[1u8; 8]).unwrap();
        let got = server_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, vec![1u8; 8]);
        assert!(server_rx.try_recv().is_err());
    }
}
