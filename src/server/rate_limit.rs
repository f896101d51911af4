//! Per-client request rate limiting.
//!
//! One sliding 60-second window per client network address, behind a
//! single lock. A plain refilling bucket would admit bursts of up to twice
//! the limit inside one window; keeping the recent grant timestamps makes
//! the guarantee exact: at most `per_minute` grants in any 60-second span.
//! The window holds at most `per_minute` instants per address, so the
//! critical section stays a few comparisons.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Length of the rate window.
const WINDOW: Duration = Duration::from_secs(60);

/// Address counts at or above this trigger a sweep of idle windows.
const SWEEP_THRESHOLD: usize = 4096;

/// Sliding-window limiter keyed by client address.
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
    per_minute: usize,
}

impl RateLimiter {
    /// Creates a limiter allowing `per_minute` requests per address.
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            per_minute: per_minute.max(1) as usize,
        }
    }

    /// Records one request for the address; `false` means over the limit.
    ///
    /// A poisoned lock fails open: degraded limiting beats refusing every
    /// client on the instance.
    #[must_use]
    pub fn try_acquire(&self, addr: IpAddr) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            tracing::error!("rate limiter lock poisoned, failing open");
            return true;
        };

        let now = Instant::now();
        let horizon = now.checked_sub(WINDOW);

        if windows.len() >= SWEEP_THRESHOLD {
            windows.retain(|_, grants| {
                horizon.is_none_or(|h| grants.back().is_some_and(|last| *last > h))
            });
        }

        let grants = windows.entry(addr).or_default();
        if let Some(horizon) = horizon {
            while grants.front().is_some_and(|t| *t <= horizon) {
                grants.pop_front();
            }
        }

        if grants.len() >= self.per_minute {
            return false;
        }
        grants.push_back(now);
        true
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_twelve_rapid_requests_grant_exactly_ten() {
        let limiter = RateLimiter::new(10);
        let client = addr(1);

        let granted = (0..12).filter(|_| limiter.try_acquire(client)).count();
        assert_eq!(granted, 10);
        assert!(!limiter.try_acquire(client));
    }

    #[test]
    fn test_addresses_do_not_share_windows() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire(addr(1)));
        assert!(!limiter.try_acquire(addr(1)));
        assert!(limiter.try_acquire(addr(2)));
    }

    #[test]
    fn test_window_slides_out_old_grants() {
        let limiter = RateLimiter::new(2);
        let client = addr(3);
        assert!(limiter.try_acquire(client));
        assert!(limiter.try_acquire(client));
        assert!(!limiter.try_acquire(client));

        // Backdate the grants past the window instead of sleeping.
        if let Ok(mut windows) = limiter.windows.lock()
            && let Some(grants) = windows.get_mut(&client)
        {
            for t in grants.iter_mut() {
                *t -= Duration::from_secs(61);
            }
        }

        assert!(limiter.try_acquire(client));
    }

    #[test]
    fn test_mid_window_grants_stay_bounded() {
        // Half the limit spent 30 s ago must still count against the
        // current window: only the other half is grantable now.
        let limiter = RateLimiter::new(10);
        let client = addr(4);
        for _ in 0..5 {
            assert!(limiter.try_acquire(client));
        }
        if let Ok(mut windows) = limiter.windows.lock()
            && let Some(grants) = windows.get_mut(&client)
        {
            for t in grants.iter_mut() {
                *t -= Duration::from_secs(30);
            }
        }

        let granted = (0..10).filter(|_| limiter.try_acquire(client)).count();
        assert_eq!(granted, 5);
    }

    #[test]
    fn test_zero_limit_clamps_to_one() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.try_acquire(addr(5)));
        assert!(!limiter.try_acquire(addr(5)));
    }
}
