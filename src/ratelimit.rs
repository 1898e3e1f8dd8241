//! Per-plugin sliding-window call rate limiting.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};
use crate::manifest::RateLimitPolicy;

/// A single plugin's sliding-window call history and its configured policy.
struct Window {
    calls: VecDeque<Instant>,
    max_calls: u32,
    period: Duration,
}

/// Tracks and enforces per-plugin call budgets.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) the policy for `plugin_id`. Safe to call again
    /// on reload; resets the plugin's call history.
    pub fn register(&self, plugin_id: &str, policy: &RateLimitPolicy) {
        let mut windows = self.windows.lock();
        windows.insert(
            plugin_id.to_string(),
            Window {
                calls: VecDeque::new(),
                max_calls: policy.calls,
                period: Duration::from_secs(policy.period_seconds),
            },
        );
    }

    pub fn unregister(&self, plugin_id: &str) {
        self.windows.lock().remove(plugin_id);
    }

    /// Checks and, if allowed, records a call. Returns `RateLimitExceeded`
    /// when the plugin's window is already full.
    pub fn check(&self, plugin_id: &str) -> HostResult<()> {
        let mut windows = self.windows.lock();
        let window = windows
            .get_mut(plugin_id)
            .ok_or_else(|| HostError::PluginUnavailable {
                id: plugin_id.to_string(),
            })?;

        let now = Instant::now();
        while let Some(&front) = window.calls.front() {
            if now.duration_since(front) > window.period {
                window.calls.pop_front();
            } else {
                break;
            }
        }

        if window.calls.len() as u32 >= window.max_calls {
            return Err(HostError::RateLimitExceeded {
                id: plugin_id.to_string(),
            });
        }

        window.calls.push_back(now);
        Ok(())
    }

    /// Current window occupancy for status reporting.
    pub fn stats(&self, plugin_id: &str) -> Option<RateLimitStats> {
        let mut windows = self.windows.lock();
        let window = windows.get_mut(plugin_id)?;

        let now = Instant::now();
        while let Some(&front) = window.calls.front() {
            if now.duration_since(front) > window.period {
                window.calls.pop_front();
            } else {
                break;
            }
        }

        Some(RateLimitStats {
            count: window.calls.len() as u32,
            max_calls: window.max_calls,
            period_seconds: window.period.as_secs(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub count: u32,
    pub max_calls: u32,
    pub period_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(calls: u32, period_seconds: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            calls,
            period_seconds,
        }
    }

    #[test]
    fn allows_calls_under_budget() {
        let limiter = RateLimiter::new();
        limiter.register("p1", &policy(2, 60));
        assert!(limiter.check("p1").is_ok());
        assert!(limiter.check("p1").is_ok());
    }

    #[test]
    fn rejects_call_once_budget_exhausted() {
        let limiter = RateLimiter::new();
        limiter.register("p1", &policy(1, 60));
        assert!(limiter.check("p1").is_ok());
        assert!(limiter.check("p1").is_err());
    }

    #[test]
    fn allows_again_after_window_elapses() {
        let limiter = RateLimiter::new();
        limiter.register("p1", &policy(1, 1));
        assert!(limiter.check("p1").is_ok());
        assert!(limiter.check("p1").is_err());
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check("p1").is_ok());
    }

    #[test]
    fn unknown_plugin_is_unavailable() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check("ghost"),
            Err(HostError::PluginUnavailable { .. })
        ));
    }

    #[test]
    fn unregister_clears_history() {
        let limiter = RateLimiter::new();
        limiter.register("p1", &policy(1, 60));
        limiter.unregister("p1");
        assert!(limiter.check("p1").is_err());
    }
}
