//! Expiry trailer appended to every stored value
//!
//! - `[0x00]`: never expires
//! - `[epoch seconds: 4 LE][0x01]`: expires at that second
//!
//! Readers must look at the trailing discriminator before trusting the
//! preceding four bytes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;

pub const NO_EXPIRY: u8 = 0x00;
pub const EXPIRES_AT: u8 = 0x01;
pub const MARK_LEN: usize = 5;

/// Append the mark for `expire_at`; zero means no expiry.
pub fn fill_expire_at(buf: &mut Vec<u8>, expire_at: u32) {
    if expire_at > 0 {
        buf.extend_from_slice(&expire_at.to_le_bytes());
        buf.push(EXPIRES_AT);
    } else {
        buf.push(NO_EXPIRY);
    }
}

/// Expiry recorded in the mark, if any.
pub fn expire_at(buf: &[u8]) -> Option<u32> {
    match buf.last() {
        Some(&EXPIRES_AT) if buf.len() >= MARK_LEN => {
            let at = &buf[buf.len() - MARK_LEN..buf.len() - 1];
            Some(u32::from_le_bytes([at[0], at[1], at[2], at[3]]))
        }
        _ => None,
    }
}

pub fn is_expired(buf: &[u8], now: u32) -> bool {
    expire_at(buf).map(|at| at <= now).unwrap_or(false)
}

/// The value without its trailing mark.
pub fn strip(buf: &[u8]) -> &[u8] {
    match buf.last() {
        Some(&EXPIRES_AT) if buf.len() >= MARK_LEN => &buf[..buf.len() - MARK_LEN],
        Some(_) => &buf[..buf.len() - 1],
        None => buf,
    }
}

pub fn now_epoch() -> u32 {
    Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// Cached wall clock shared by readers and the merge operator.
///
/// Refreshed once per client operation instead of once per comparison, and
/// never moves backwards.
#[derive(Debug, Clone)]
pub struct ExpiryClock(Arc<AtomicU32>);

impl ExpiryClock {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(now_epoch())))
    }

    pub fn now(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn refresh(&self) -> u32 {
        let now = now_epoch();
        self.0.fetch_max(now, Ordering::Relaxed);
        self.now()
    }
}

impl Default for ExpiryClock {
    fn default() -> Self {
        Self::new()
    }
}
