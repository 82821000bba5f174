//! Consensus timestamps — the substrate's canonical per-topic ordering key.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IndexerError;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A rational nanosecond instant, encoded textually as `seconds.nanoseconds`
/// with the nanosecond field zero-padded to nine digits so that lexicographic
/// order equals chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsensusTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl ConsensusTimestamp {
    pub const fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Returns this instant advanced by `n` nanoseconds, carrying into the
    /// seconds field on overflow.
    pub fn plus_nanos(self, n: u32) -> Self {
        let total = self.nanos as u64 + n as u64;
        Self {
            seconds: self.seconds + (total / NANOS_PER_SECOND as u64) as i64,
            nanos: (total % NANOS_PER_SECOND as u64) as u32,
        }
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

impl FromStr for ConsensusTimestamp {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IndexerError::InvalidTimestamp { value: s.to_string() };

        let (secs, frac) = match s.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (s, ""),
        };
        let seconds: i64 = secs.parse().map_err(|_| invalid())?;

        // A short fractional part is right-padded: ".5" means .500000000.
        let nanos = if frac.is_empty() {
            0
        } else {
            if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let parsed: u32 = frac.parse().map_err(|_| invalid())?;
            parsed * 10u32.pow(9 - frac.len() as u32)
        };

        Ok(Self { seconds, nanos })
    }
}

impl Serialize for ConsensusTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConsensusTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_roundtrip() {
        let ts: ConsensusTimestamp = "1700000000.000000123".parse().unwrap();
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123);
        assert_eq!(ts.to_string(), "1700000000.000000123");
    }

    #[test]
    fn short_fraction_is_right_padded() {
        let ts: ConsensusTimestamp = "1700000000.5".parse().unwrap();
        assert_eq!(ts.nanos, 500_000_000);
    }

    #[test]
    fn missing_fraction_means_zero_nanos() {
        let ts: ConsensusTimestamp = "1700000000".parse().unwrap();
        assert_eq!(ts.to_string(), "1700000000.000000000");
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ConsensusTimestamp>().is_err());
        assert!("abc.def".parse::<ConsensusTimestamp>().is_err());
        assert!("1.1234567890".parse::<ConsensusTimestamp>().is_err());
    }

    #[test]
    fn plus_nanos_carries_into_seconds() {
        let ts = ConsensusTimestamp::new(10, 999_999_999);
        let next = ts.plus_nanos(1);
        assert_eq!(next, ConsensusTimestamp::new(11, 0));
    }

    #[test]
    fn ordering_matches_chronology() {
        let a: ConsensusTimestamp = "1700000000.000000001".parse().unwrap();
        let b: ConsensusTimestamp = "1700000000.000000002".parse().unwrap();
        let c: ConsensusTimestamp = "1700000001.000000000".parse().unwrap();
        assert!(a < b && b < c);
        // Textual order agrees with the typed order.
        assert!(a.to_string() < b.to_string() && b.to_string() < c.to_string());
    }
}
