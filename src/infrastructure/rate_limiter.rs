use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Permits handed out per refresh period.
    pub limit_for_period: u32,
    pub limit_refresh_period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit_for_period: 100,
            limit_refresh_period: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    window_start: Instant,
    permits_used: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterMetrics {
    pub limit_for_period: u32,
    pub available_permits: u32,
    pub permitted_calls: u64,
    pub rejected_calls: u64,
}

/// Fixed-window limiter keyed by operation name. Excess calls are rejected
/// immediately, never queued.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, WindowState>,
    permitted: AtomicU64,
    rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            permitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn try_acquire(&self, operation: &str) -> bool {
        let now = Instant::now();
        // The entry guard holds the shard lock across the read-modify-write.
        let mut window = self
            .windows
            .entry(operation.to_string())
            .or_insert_with(|| WindowState {
                window_start: now,
                permits_used: 0,
            });

        if now.duration_since(window.window_start) >= self.config.limit_refresh_period {
            window.window_start = now;
            window.permits_used = 0;
        }

        if window.permits_used >= self.config.limit_for_period {
            drop(window);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(operation, "Rate limit exceeded");
            return false;
        }

        window.permits_used += 1;
        self.permitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn metrics(&self, operation: &str) -> RateLimiterMetrics {
        let now = Instant::now();
        let used = self
            .windows
            .get(operation)
            .filter(|w| now.duration_since(w.window_start) < self.config.limit_refresh_period)
            .map(|w| w.permits_used)
            .unwrap_or(0);

        RateLimiterMetrics {
            limit_for_period: self.config.limit_for_period,
            available_permits: self.config.limit_for_period.saturating_sub(used),
            permitted_calls: self.permitted.load(Ordering::Relaxed),
            rejected_calls: self.rejected.load(Ordering::Relaxed),
        }
    }
}
