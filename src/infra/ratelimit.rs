// src/infra/ratelimit.rs — Sliding-window rate limiter
//
// Guards the segment and session-creation endpoints. Keyed by a
// caller-supplied token (user id). Time is passed in explicitly so tests
// control the clock; production callers use `check`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the current window (after this one, if allowed).
    pub remaining: u32,
    /// How long the caller should wait before retrying, if rejected.
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());

        let entry = hits.entry(key.to_string()).or_default();
        while let Some(&front) = entry.front() {
            if now.duration_since(front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if (entry.len() as u32) < self.limit {
            entry.push_back(now);
            Decision {
                allowed: true,
                remaining: self.limit - entry.len() as u32,
                retry_after: None,
            }
        } else {
            // Oldest hit ages out first; that's when a slot opens.
            let retry_after = entry
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)));
            Decision {
                allowed: false,
                remaining: 0,
                retry_after,
            }
        }
    }

    /// Drop keys with no hits inside the window. Called periodically by the
    /// serve loop to bound memory.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let before = hits.len();
        hits.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|&last| now.duration_since(last) < self.window)
        });
        before - hits.len()
    }

    #[cfg(test)]
    fn key_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let rl = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        assert_eq!(rl.check_at("u1", now).remaining, 2);
        assert_eq!(rl.check_at("u1", now).remaining, 1);
        assert_eq!(rl.check_at("u1", now).remaining, 0);

        let d = rl.check_at("u1", now);
        assert!(!d.allowed);
        assert_eq!(d.retry_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(rl.check_at("u1", now).allowed);
        assert!(rl.check_at("u2", now).allowed);
        assert!(!rl.check_at("u1", now).allowed);
    }

    #[test]
    fn test_window_slides() {
        let rl = RateLimiter::new(2, Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(rl.check_at("u1", t0).allowed);
        assert!(rl.check_at("u1", t0 + Duration::from_secs(5)).allowed);
        assert!(!rl.check_at("u1", t0 + Duration::from_secs(6)).allowed);

        // First hit has aged out at t0+11
        let d = rl.check_at("u1", t0 + Duration::from_secs(11));
        assert!(d.allowed);
    }

    #[test]
    fn test_retry_after_accounts_for_elapsed() {
        let rl = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();

        rl.check_at("u1", t0);
        let d = rl.check_at("u1", t0 + Duration::from_secs(4));
        assert_eq!(d.retry_after, Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_evict_idle_keys() {
        let rl = RateLimiter::new(5, Duration::from_secs(10));
        let t0 = Instant::now();

        rl.check_at("old", t0);
        rl.check_at("fresh", t0 + Duration::from_secs(9));
        assert_eq!(rl.key_count(), 2);

        let evicted = rl.evict_idle(t0 + Duration::from_secs(11));
        assert_eq!(evicted, 1);
        assert_eq!(rl.key_count(), 1);
    }

    #[test]
    fn test_concurrent_checks_single_key() {
        use std::sync::Arc;

        let rl = Arc::new(RateLimiter::new(50, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let rl = Arc::clone(&rl);
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0;
                for _ in 0..25 {
                    if rl.check("shared").allowed {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
    }
}
