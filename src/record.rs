//! Burst records: one timestamped run of IQ samples
//!
//! On the wire a record is a MessagePack map followed directly by the sample
//! payload:
//!
//! ```text
//! { "timestamp_s": [secs, picos], "packet_len": n, "packet_count": seq }
//! re0 im0 re1 im1 ...   (n * 8 bytes, little-endian f32)
//! ```
//!
//! The map is self-describing, so receivers tolerate extra keys. The payload
//! length is implied by `packet_len` and must match exactly.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::{
    complex::Sample,
    error::{Error, Result},
    time::{Timestamp, PICOS_PER_SEC},
};

/// Bytes per serialized complex sample
pub const SAMPLE_BYTES: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct BurstRecord {
    pub start_time: Timestamp,
    pub sequence: u32,
    pub samples: Vec<Sample>,
}

#[derive(Serialize, Deserialize, Debug)]
struct Metadata {
    timestamp_s: (i64, u64),
    packet_len: u64,
    packet_count: u32,
}

impl BurstRecord {
    pub fn new(start_time: Timestamp, sequence: u32, samples: Vec<Sample>) -> Self {
        Self {
            start_time,
            sequence,
            samples,
        }
    }

    /// A zero-length record. Sent once before any data so the transport
    /// connection is up by the time real samples flow.
    pub fn probe(start_time: Timestamp, sequence: u32) -> Self {
        Self::new(start_time, sequence, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_probe(&self) -> bool {
        self.samples.is_empty()
    }

    /// Exact size of [`BurstRecord::encode`]'s output without building it
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(rmp_serde::to_vec_named(&self.metadata())?.len() + self.len() * SAMPLE_BYTES)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = rmp_serde::to_vec_named(&self.metadata())?;
        buf.reserve(self.len() * SAMPLE_BYTES);
        for s in &self.samples {
            buf.extend_from_slice(&s.re.to_le_bytes());
            buf.extend_from_slice(&s.im.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let meta: Metadata = rmp_serde::from_read(&mut cursor)
            .map_err(|e| Error::malformed(format!("bad metadata section: {}", e)))?;
        let (secs, picos) = meta.timestamp_s;
        if picos >= PICOS_PER_SEC {
            return Err(Error::malformed(format!(
                "sub-second ticks out of range: {}",
                picos
            )));
        }
        let payload = &bytes[cursor.position() as usize..];
        let expected = usize::try_from(meta.packet_len)
            .ok()
            .and_then(|n| n.checked_mul(SAMPLE_BYTES))
            .ok_or_else(|| Error::malformed(format!("packet_len {} too large", meta.packet_len)))?;
        if payload.len() != expected {
            return Err(Error::malformed(format!(
                "packet_len {} needs {} payload bytes, found {}",
                meta.packet_len,
                expected,
                payload.len()
            )));
        }
        let samples = payload
            .chunks_exact(SAMPLE_BYTES)
            .map(|c| {
                Sample::new(
                    f32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                    f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                )
            })
            .collect();
        Ok(Self {
            start_time: Timestamp::new(secs, picos),
            sequence: meta.packet_count,
            samples,
        })
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            timestamp_s: (self.start_time.secs(), self.start_time.picos()),
            packet_len: self.len() as u64,
            packet_count: self.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n).map(|i| Sample::new(i as f32, -(i as f32) * 0.5)).collect()
    }

    #[test]
    fn test_round_trip() {
        let rec = BurstRecord::new(Timestamp::new(1_700_000_000, 123_456_789), 42, ramp(300));
        let bytes = rec.encode().unwrap();
        assert_eq!(bytes.len(), rec.encoded_len().unwrap());
        let back = BurstRecord::decode(&bytes).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.encode().unwrap(), bytes);
    }

    #[test]
    fn test_probe() {
        let probe = BurstRecord::probe(Timestamp::new(5, 0), 0);
        assert!(probe.is_probe());
        let back = BurstRecord::decode(&probe.encode().unwrap()).unwrap();
        assert_eq!(back.len(), 0);
        assert_eq!(back.start_time, Timestamp::new(5, 0));
    }

    #[test]
    fn test_truncated_payload() {
        let rec = BurstRecord::new(Timestamp::new(1, 0), 1, ramp(4));
        let bytes = rec.encode().unwrap();
        let err = BurstRecord::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = BurstRecord::new(Timestamp::new(1, 0), 1, ramp(2))
            .encode()
            .unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            BurstRecord::decode(&bytes),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_missing_field() {
        #[derive(Serialize)]
        struct Partial {
            timestamp_s: (i64, u64),
            packet_len: u64,
        }
        let bytes = rmp_serde::to_vec_named(&Partial {
            timestamp_s: (1, 0),
            packet_len: 0,
        })
        .unwrap();
        assert!(matches!(
            BurstRecord::decode(&bytes),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_garbage() {
        assert!(BurstRecord::decode(&[]).is_err());
        assert!(BurstRecord::decode(&[0xc1, 0x00, 0x13]).is_err());
    }

    #[test]
    fn test_extra_keys_tolerated() {
        #[derive(Serialize)]
        struct Extended {
            timestamp_s: (i64, u64),
            packet_len: u64,
            packet_count: u32,
            event: &'static str,
        }
        let mut bytes = rmp_serde::to_vec_named(&Extended {
            timestamp_s: (9, 1),
            packet_len: 1,
            packet_count: 3,
            event: "tx",
        })
        .unwrap();
        bytes.extend_from_slice(&1f32.to_le_bytes());
        bytes.extend_from_slice(&2f32.to_le_bytes());
        let rec = BurstRecord::decode(&bytes).unwrap();
        assert_eq!(rec.sequence, 3);
        assert_eq!(rec.samples, vec![Sample::new(1.0, 2.0)]);
    }
}
