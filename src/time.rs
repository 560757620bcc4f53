//! Absolute timestamps with picosecond resolution
//!
//! Records carry their start time as whole seconds plus sub-second ticks. All
//! arithmetic goes through `i128` picoseconds so adding thousands of short
//! bursts never accumulates float error.

use std::fmt;

use chrono::Utc;

pub const PICOS_PER_SEC: u64 = 1_000_000_000_000;
const PICOS_PER_SEC_I: i128 = PICOS_PER_SEC as i128;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Timestamp {
    secs: i64,
    picos: u64,
}

impl Timestamp {
    /// Build from seconds and picoseconds, carrying any overflow of `picos`
    /// into the seconds field
    pub fn new(secs: i64, picos: u64) -> Self {
        Self {
            secs: secs + (picos / PICOS_PER_SEC) as i64,
            picos: picos % PICOS_PER_SEC,
        }
    }

    /// Build from integer seconds and a fractional part in seconds
    pub fn from_secs_frac(secs: i64, frac: f64) -> Self {
        let frac_picos = (frac * PICOS_PER_SEC as f64).round() as i128;
        Self::from_picos(secs as i128 * PICOS_PER_SEC_I + frac_picos)
    }

    pub fn from_picos(picos: i128) -> Self {
        Self {
            secs: picos.div_euclid(PICOS_PER_SEC_I) as i64,
            picos: picos.rem_euclid(PICOS_PER_SEC_I) as u64,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let now = Utc::now();
        Self::new(
            now.timestamp(),
            now.timestamp_subsec_nanos() as u64 * 1_000,
        )
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn picos(&self) -> u64 {
        self.picos
    }

    pub fn frac_secs(&self) -> f64 {
        self.picos as f64 / PICOS_PER_SEC as f64
    }

    pub fn as_picos(&self) -> i128 {
        self.secs as i128 * PICOS_PER_SEC_I + self.picos as i128
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.frac_secs()
    }

    pub fn add_picos(self, picos: i128) -> Self {
        Self::from_picos(self.as_picos() + picos)
    }

    /// Advance by the duration of `n` samples at `sample_rate`
    pub fn add_samples(self, n: usize, sample_rate: f64) -> Self {
        self.add_picos(samples_to_picos(n as f64, sample_rate))
    }

    /// Signed difference `self - other` in picoseconds
    pub fn picos_since(&self, other: &Timestamp) -> i128 {
        self.as_picos() - other.as_picos()
    }

    /// Offset of this timestamp from `origin`, in whole samples at
    /// `sample_rate`, rounded to the nearest sample. Negative when this
    /// timestamp precedes the origin.
    pub fn counts_since(&self, origin: &Timestamp, sample_rate: f64) -> i64 {
        let delta = self.picos_since(origin);
        let whole = delta.div_euclid(PICOS_PER_SEC_I) as f64;
        let rem = delta.rem_euclid(PICOS_PER_SEC_I) as f64;
        (whole * sample_rate + rem * sample_rate / PICOS_PER_SEC as f64).round() as i64
    }
}

/// Duration of `n` samples in picoseconds
pub fn samples_to_picos(n: f64, sample_rate: f64) -> i128 {
    (n * PICOS_PER_SEC as f64 / sample_rate).round() as i128
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:012}", self.secs, self.picos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let t = Timestamp::new(1, PICOS_PER_SEC + 5);
        assert_eq!(t.secs(), 2);
        assert_eq!(t.picos(), 5);
        let t = Timestamp::from_picos(-1);
        assert_eq!(t.secs(), -1);
        assert_eq!(t.picos(), PICOS_PER_SEC - 1);
    }

    #[test]
    fn test_add_samples() {
        let t = Timestamp::new(100, 0).add_samples(250_000, 1e6);
        assert_eq!(t, Timestamp::from_secs_frac(100, 0.25));
        // Crossing a second boundary
        let t = Timestamp::from_secs_frac(7, 0.75).add_samples(500_000, 1e6);
        assert_eq!(t, Timestamp::from_secs_frac(8, 0.25));
    }

    #[test]
    fn test_counts_since() {
        let origin = Timestamp::new(100, 5_000_000);
        let t = Timestamp::new(100, 10_000_000);
        assert_eq!(t.counts_since(&origin, 1e6), 5);
        assert_eq!(origin.counts_since(&t, 1e6), -5);
        let later = Timestamp::new(3700, 5_000_000);
        assert_eq!(later.counts_since(&origin, 1e6), 3_600_000_000);
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::new(1, 999) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 1) > Timestamp::new(2, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::new(3, 42).to_string(), "3.000000000042");
    }
}
