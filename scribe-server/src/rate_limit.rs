//! Per-IP login rate limiting.
//!
//! A sliding window of failed attempts per source address; crossing the
//! threshold installs a lockout deadline. Applied to the login endpoint
//! only - WebSocket auth is covered by the single-session lock, token
//! entropy, and origin validation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_MAX_ATTEMPTS: usize = 5;
pub const RATE_LIMIT_LOCKOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct IpRecord {
    failures: Vec<Instant>,
    locked_until: Option<Instant>,
}

/// In-memory failed-login tracker.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_attempts: usize,
    lockout: Duration,
    records: Mutex<HashMap<String, IpRecord>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(RATE_LIMIT_WINDOW, RATE_LIMIT_MAX_ATTEMPTS, RATE_LIMIT_LOCKOUT)
    }
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: usize, lockout: Duration) -> Self {
        RateLimiter {
            window,
            max_attempts,
            lockout,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the address is locked out, and for how many more seconds.
    /// An expired lockout is cleared on this access.
    pub fn is_blocked(&self, ip: &str) -> (bool, Option<u64>) {
        let Ok(mut records) = self.records.lock() else {
            return (false, None);
        };
        let now = Instant::now();
        if let Some(record) = records.get(ip) {
            if let Some(deadline) = record.locked_until {
                if deadline > now {
                    return (true, Some((deadline - now).as_secs()));
                }
                records.remove(ip);
            }
        }
        (false, None)
    }

    /// Record a login outcome. Success clears all state for the address;
    /// failures accumulate inside the window and trip the lockout.
    pub fn record(&self, ip: &str, success: bool) {
        let Ok(mut records) = self.records.lock() else {
            return;
        };
        if success {
            records.remove(ip);
            return;
        }

        let now = Instant::now();
        let record = records.entry(ip.to_string()).or_default();
        let window = self.window;
        record.failures.retain(|t| now.duration_since(*t) < window);
        record.failures.push(now);

        if record.failures.len() >= self.max_attempts {
            record.locked_until = Some(now + self.lockout);
            warn!(
                ip,
                failures = record.failures.len(),
                lockout_secs = self.lockout.as_secs(),
                "rate limit exceeded, address locked out"
            );
        }
    }

    /// Attempts left inside the current window.
    pub fn remaining_attempts(&self, ip: &str) -> usize {
        let Ok(mut records) = self.records.lock() else {
            return self.max_attempts;
        };
        let now = Instant::now();
        match records.get_mut(ip) {
            None => self.max_attempts,
            Some(record) => {
                let window = self.window;
                record.failures.retain(|t| now.duration_since(*t) < window);
                self.max_attempts.saturating_sub(record.failures.len())
            }
        }
    }
}
