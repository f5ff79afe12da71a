//! Time-ordered object identifiers
//!
//! An `ObjectId` packs three components into 12 bytes:
//! - 44-bit millisecond timestamp (good until the year 2527)
//! - 20-bit per-process sequence
//! - 32-bit random tail
//!
//! The text form is 24 lowercase hex characters (`{:011x}{:05x}{:08x}`),
//! which sorts the same way as the numeric tuple.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::{const_mutex, Mutex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

pub const TIMESTAMP_HEX_LEN: usize = 11;
pub const SEQ_HEX_LEN: usize = 5;
pub const RAND_HEX_LEN: usize = 8;
/// Length of the hex representation
pub const OBJECT_ID_LEN: usize = TIMESTAMP_HEX_LEN + SEQ_HEX_LEN + RAND_HEX_LEN;

/// Largest timestamp the text form can hold
pub const MAX_TIMESTAMP: u64 = 0xFFF_FFFF_FFFF;
const MAX_SEQ: u32 = 0xF_FFFF;

static GENERATOR: IdGenerator = IdGenerator::new();

/// Hands out ids that never go backwards within one generator.
///
/// A clock that did not move increments the sequence, and an exhausted
/// sequence borrows the next millisecond.
pub struct IdGenerator {
    /// (last millisecond handed out, sequence within that millisecond)
    state: Mutex<(u64, u32)>,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            state: const_mutex((0, 0)),
        }
    }

    pub fn next_at(&self, now_ms: u64) -> ObjectId {
        let mut state = self.state.lock();
        let (last_ms, seq) = *state;
        let now_ms = now_ms.min(MAX_TIMESTAMP);
        let (timepoint, seq) = if now_ms > last_ms {
            (now_ms, 1)
        } else if seq >= MAX_SEQ && last_ms < MAX_TIMESTAMP {
            (last_ms + 1, 1)
        } else if seq >= MAX_SEQ {
            (last_ms, MAX_SEQ)
        } else {
            (last_ms, seq + 1)
        };
        *state = (timepoint, seq);
        drop(state);

        ObjectId {
            timepoint,
            seq,
            rand: rand::random::<u32>(),
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    timepoint: u64,
    seq: u32,
    rand: u32,
}

impl ObjectId {
    /// Generate a new id from the current wall clock.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Generate a new id as if the process clock read `now_ms`.
    pub fn generate_at(now_ms: u64) -> Self {
        GENERATOR.next_at(now_ms)
    }

    /// Timestamps past `MAX_TIMESTAMP` saturate instead of wrapping.
    pub fn from_parts(timepoint: u64, seq: u32, rand: u32) -> Self {
        Self {
            timepoint: timepoint.min(MAX_TIMESTAMP),
            seq: seq & MAX_SEQ,
            rand,
        }
    }

    /// Smallest id whose timestamp is `dt`. Useful as a range bound.
    pub fn min_at(dt: DateTime<Utc>) -> Self {
        Self::from_parts(dt.timestamp_millis().max(0) as u64, 0, 0)
    }

    pub fn timepoint(&self) -> u64 {
        self.timepoint
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn rand(&self) -> u32 {
        self.rand
    }

    pub fn is_null(&self) -> bool {
        self.timepoint == 0
    }

    /// Seconds since the epoch
    pub fn to_epoch(&self) -> u32 {
        (self.timepoint / 1000) as u32
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timepoint as i64)
            .single()
            .unwrap_or_default()
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to_datetime().date_naive()
    }

    /// Write the 24-char hex form into `buf`.
    pub fn write_hex(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.to_string().as_bytes());
    }

    pub fn parse_hex(data: &[u8]) -> Result<Self, CoreError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| CoreError::InvalidObjectId(String::from_utf8_lossy(data).into_owned()))?;
        text.parse()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:011x}{:05x}{:08x}", self.timepoint, self.seq, self.rand)
    }
}

impl FromStr for ObjectId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidObjectId(s.to_string());
        if s.len() != OBJECT_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let (ts, rest) = s.split_at(TIMESTAMP_HEX_LEN);
        let (seq, rnd) = rest.split_at(SEQ_HEX_LEN);
        Ok(Self {
            timepoint: u64::from_str_radix(ts, 16).map_err(|_| invalid())?,
            seq: u32::from_str_radix(seq, 16).map_err(|_| invalid())?,
            rand: u32::from_str_radix(rnd, 16).map_err(|_| invalid())?,
        })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
