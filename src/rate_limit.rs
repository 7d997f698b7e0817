//! Per-user, per-service sliding-window call limits.
//!
//! Each service keeps a ledger of call timestamps per user. Stale entries are
//! pruned lazily whenever a user's ledger is checked, never on a timer. A
//! timestamp exactly one window old is already stale.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::GatewayError;

// External APIs that carry their own quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Completion,
    Search,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(Self::Completion),
            "search" => Ok(Self::Search),
            other => Err(GatewayError::Config(format!(
                "unknown service '{other}' (expected 'completion' or 'search')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLimit {
    pub quota: usize,
    pub window: Duration,
}

impl ServiceLimit {
    pub fn new(quota: usize, window: Duration) -> Self {
        Self { quota, window }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub completion: ServiceLimit,
    pub search: ServiceLimit,
}

impl Default for RateLimits {
    // 60 completions an hour, 100 searches a day
    fn default() -> Self {
        Self {
            completion: ServiceLimit::new(60, Duration::from_secs(60 * 60)),
            search: ServiceLimit::new(100, Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Snapshot of one user's standing against one service's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub service: Service,
    pub user_id: String,
    pub used: usize,
    pub remaining: usize,
    pub quota: usize,
    pub window_secs: u64,
    pub retry_after_secs: u64,
}

struct Ledger {
    limit: ServiceLimit,
    calls: DashMap<String, VecDeque<Instant>>,
}

impl Ledger {
    fn new(limit: ServiceLimit) -> Self {
        Self {
            limit,
            calls: DashMap::new(),
        }
    }
}

pub struct RateLimiter {
    completion: Ledger,
    search: Ledger,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            completion: Ledger::new(limits.completion),
            search: Ledger::new(limits.search),
            clock,
        }
    }

    fn ledger(&self, service: Service) -> &Ledger {
        match service {
            Service::Completion => &self.completion,
            Service::Search => &self.search,
        }
    }

    pub fn limit(&self, service: Service) -> ServiceLimit {
        self.ledger(service).limit
    }

    /// Prunes the user's ledger, then reports whether one more call fits.
    pub fn can_call(&self, service: Service, user_id: &str) -> bool {
        let ledger = self.ledger(service);
        let now = self.clock.now();

        let Some(mut calls) = ledger.calls.get_mut(user_id) else {
            return true;
        };
        prune(&mut calls, now, ledger.limit.window);

        let allowed = calls.len() < ledger.limit.quota;
        if !allowed {
            debug!(%service, user_id, used = calls.len(), "quota reached");
        }
        allowed
    }

    /// Records a call at the current instant. Does not check the quota.
    pub fn log_call(&self, service: Service, user_id: &str) {
        let now = self.clock.now();
        self.ledger(service)
            .calls
            .entry(user_id.to_string())
            .or_default()
            .push_back(now);
    }

    /// Check and record under one entry lock, so two concurrent callers for
    /// the same user can't both take the last slot.
    pub fn try_acquire(&self, service: Service, user_id: &str) -> Result<(), GatewayError> {
        let ledger = self.ledger(service);
        let now = self.clock.now();

        let mut calls = ledger.calls.entry(user_id.to_string()).or_default();
        prune(&mut calls, now, ledger.limit.window);

        if calls.len() < ledger.limit.quota {
            calls.push_back(now);
            return Ok(());
        }

        Err(GatewayError::QuotaExceeded {
            service,
            retry_after_secs: retry_after(&calls, now, ledger.limit).as_secs(),
        })
    }

    pub fn usage(&self, service: Service, user_id: &str) -> QuotaStatus {
        let ledger = self.ledger(service);
        let limit = ledger.limit;
        let now = self.clock.now();

        let (used, retry) = match ledger.calls.get_mut(user_id) {
            Some(mut calls) => {
                prune(&mut calls, now, limit.window);
                (calls.len(), retry_after(&calls, now, limit))
            }
            None => (0, Duration::ZERO),
        };

        QuotaStatus {
            service,
            user_id: user_id.to_string(),
            used,
            remaining: limit.quota.saturating_sub(used),
            quota: limit.quota,
            window_secs: limit.window.as_secs(),
            retry_after_secs: ceil_secs(retry),
        }
    }

    // Calls currently held for a user, without pruning
    pub fn recorded(&self, service: Service, user_id: &str) -> usize {
        self.ledger(service)
            .calls
            .get(user_id)
            .map(|calls| calls.len())
            .unwrap_or(0)
    }
}

// drop everything at or before now - window
fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while let Some(&oldest) = calls.front() {
        if oldest <= cutoff {
            calls.pop_front();
        } else {
            break;
        }
    }
}

// Time until enough calls age out to free one slot
fn retry_after(calls: &VecDeque<Instant>, now: Instant, limit: ServiceLimit) -> Duration {
    if calls.len() < limit.quota {
        return Duration::ZERO;
    }
    let blocking = calls.len() - limit.quota;
    match calls.get(blocking) {
        Some(&at) => (at + limit.window).saturating_duration_since(now),
        None => limit.window,
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::new(RateLimits::default(), clock.clone()), clock)
    }

    fn spend(limiter: &RateLimiter, service: Service, user: &str) -> usize {
        let mut allowed = 0;
        while limiter.can_call(service, user) {
            limiter.log_call(service, user);
            allowed += 1;
            assert!(allowed <= 1_000, "limiter never denied");
        }
        allowed
    }

    #[test]
    fn defaults_match_service_quotas() {
        let limits = RateLimits::default();
        assert_eq!(limits.completion, ServiceLimit::new(60, HOUR));
        assert_eq!(limits.search, ServiceLimit::new(100, DAY));
    }

    #[test]
    fn fresh_user_is_permitted() {
        let (limiter, _) = limiter();
        assert!(limiter.can_call(Service::Completion, "default"));
        assert!(limiter.can_call(Service::Search, "default"));
        assert_eq!(limiter.recorded(Service::Completion, "default"), 0);
    }

    #[test]
    fn completion_allows_exactly_sixty_per_hour() {
        let (limiter, clock) = limiter();
        assert_eq!(spend(&limiter, Service::Completion, "alice"), 60);

        clock.advance(HOUR - Duration::from_secs(1));
        assert!(!limiter.can_call(Service::Completion, "alice"));
    }

    #[test]
    fn search_allows_exactly_hundred_per_day() {
        let (limiter, clock) = limiter();
        assert_eq!(spend(&limiter, Service::Search, "alice"), 100);

        clock.advance(DAY - Duration::from_secs(1));
        assert!(!limiter.can_call(Service::Search, "alice"));
    }

    #[test]
    fn calls_stop_counting_once_window_passes() {
        let (limiter, clock) = limiter();
        spend(&limiter, Service::Completion, "alice");
        assert!(!limiter.can_call(Service::Completion, "alice"));

        clock.advance(HOUR + Duration::from_millis(1));
        assert!(limiter.can_call(Service::Completion, "alice"));
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 0);
    }

    #[test]
    fn call_exactly_at_cutoff_is_stale() {
        let (limiter, clock) = limiter();
        limiter.log_call(Service::Completion, "alice");

        clock.advance(HOUR);
        assert!(limiter.can_call(Service::Completion, "alice"));
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 0);
    }

    #[test]
    fn call_just_inside_window_still_counts() {
        let (limiter, clock) = limiter();
        limiter.log_call(Service::Completion, "alice");

        clock.advance(HOUR - Duration::from_nanos(1));
        assert!(limiter.can_call(Service::Completion, "alice"));
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 1);
    }

    #[test]
    fn denied_check_still_prunes() {
        let (limiter, clock) = limiter();
        limiter.log_call(Service::Completion, "alice");
        clock.advance(Duration::from_secs(30 * 60));
        for _ in 0..59 {
            limiter.log_call(Service::Completion, "alice");
        }
        assert!(!limiter.can_call(Service::Completion, "alice"));

        // only the first call has aged out
        clock.advance(Duration::from_secs(30 * 60));
        assert!(limiter.can_call(Service::Completion, "alice"));
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 59);
    }

    #[test]
    fn log_call_does_not_check() {
        let (limiter, _) = limiter();
        for _ in 0..65 {
            limiter.log_call(Service::Completion, "alice");
        }
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 65);
        assert!(!limiter.can_call(Service::Completion, "alice"));
    }

    #[test]
    fn users_do_not_share_quota() {
        let (limiter, _) = limiter();
        spend(&limiter, Service::Completion, "alice");

        assert!(!limiter.can_call(Service::Completion, "alice"));
        assert!(limiter.can_call(Service::Completion, "bob"));
    }

    #[test]
    fn services_do_not_share_quota() {
        let (limiter, _) = limiter();
        spend(&limiter, Service::Completion, "alice");

        assert!(!limiter.can_call(Service::Completion, "alice"));
        assert!(limiter.can_call(Service::Search, "alice"));
        assert_eq!(limiter.recorded(Service::Search, "alice"), 0);
    }

    #[test]
    fn try_acquire_denies_at_quota_without_recording() {
        let clock = Arc::new(ManualClock::new());
        let limits = RateLimits {
            completion: ServiceLimit::new(2, Duration::from_secs(60)),
            ..RateLimits::default()
        };
        let limiter = RateLimiter::new(limits, clock.clone());

        assert!(limiter.try_acquire(Service::Completion, "alice").is_ok());
        clock.advance(Duration::from_secs(10));
        assert!(limiter.try_acquire(Service::Completion, "alice").is_ok());

        match limiter.try_acquire(Service::Completion, "alice") {
            Err(GatewayError::QuotaExceeded {
                service,
                retry_after_secs,
            }) => {
                assert_eq!(service, Service::Completion);
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert_eq!(limiter.recorded(Service::Completion, "alice"), 2);
    }

    #[test]
    fn usage_reports_remaining_and_retry_after() {
        let clock = Arc::new(ManualClock::new());
        let limits = RateLimits {
            search: ServiceLimit::new(3, Duration::from_secs(100)),
            ..RateLimits::default()
        };
        let limiter = RateLimiter::new(limits, clock.clone());

        let empty = limiter.usage(Service::Search, "alice");
        assert_eq!(empty.used, 0);
        assert_eq!(empty.remaining, 3);
        assert_eq!(empty.retry_after_secs, 0);

        for _ in 0..3 {
            limiter.log_call(Service::Search, "alice");
            clock.advance(Duration::from_secs(20));
        }
        let full = limiter.usage(Service::Search, "alice");
        assert_eq!(full.used, 3);
        assert_eq!(full.remaining, 0);
        assert_eq!(full.window_secs, 100);
        // oldest call was 60s ago
        assert_eq!(full.retry_after_secs, 40);
    }

    #[test]
    fn service_tags_parse_or_fail_fast() {
        assert_eq!("completion".parse::<Service>().unwrap(), Service::Completion);
        assert_eq!(" Search ".parse::<Service>().unwrap(), Service::Search);

        let err = "weather".parse::<Service>().unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
