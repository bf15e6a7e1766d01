//! Check-interval gating with backoff after network failures.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use tracing::debug;

use crate::error::UpdateError;
use crate::state::{InstallationState, StateStore};

/// Largest exponent applied to the interval.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Upper bound of the random extra delay, as a fraction of the interval.
const JITTER_FRACTION: f64 = 0.10;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Decides when the next cycle may run.
#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    interval: Duration,
    max_backoff: Duration,
    jitter: bool,
    failures: u32,
    jitter_sample: f64,
}

impl UpdateScheduler {
    pub fn new(interval: Duration, max_backoff: Duration) -> Self {
        Self {
            interval,
            max_backoff: max_backoff.max(interval),
            jitter: true,
            failures: 0,
            jitter_sample: 0.0,
        }
    }

    /// Disable the random extra delay.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self.jitter_sample = 0.0;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Interval currently in force: the configured one, or the backed-off
    /// one after network failures.
    pub fn effective_interval(&self) -> Duration {
        if self.failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << self.failures.min(MAX_BACKOFF_EXPONENT);
        let backed_off = self
            .interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        let jitter = backed_off.mul_f64(self.jitter_sample);
        (backed_off + jitter).max(self.interval)
    }

    /// True when no check was ever recorded, when the recorded check lies in
    /// the future (clock moved backwards), or when the effective interval
    /// has elapsed.
    pub fn should_check_now(&self, state: &InstallationState, now: DateTime<Utc>) -> bool {
        let Some(last) = state.last_check else {
            return true;
        };
        if last > now {
            debug!(last_check = %last, now = %now, "last check lies in the future");
            return true;
        }
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.effective_interval(),
            Err(_) => true,
        }
    }

    /// Persist `now` as the time of the last completed cycle.
    pub fn record_check_time(
        &self,
        store: &StateStore,
        now: DateTime<Utc>,
    ) -> Result<(), UpdateError> {
        store.set_last_check(now)
    }

    /// Feed back whether the last cycle reached the distribution host.
    pub fn record_network_result(&mut self, reached_host: bool) {
        if reached_host {
            if self.failures > 0 {
                debug!(failures = self.failures, "host reachable again, backoff reset");
            }
            self.failures = 0;
            self.jitter_sample = 0.0;
        } else {
            self.failures = self.failures.saturating_add(1);
            if self.jitter {
                self.jitter_sample = rand::thread_rng().gen_range(0.0..JITTER_FRACTION);
            }
            debug!(
                failures = self.failures,
                next_interval_secs = self.effective_interval().as_secs(),
                "network failure, backing off"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn state(last_check: Option<DateTime<Utc>>) -> InstallationState {
        InstallationState {
            current_version: "1.0.0".to_string(),
            last_check,
        }
    }

    #[test]
    fn test_due_without_history() {
        let scheduler = UpdateScheduler::new(24 * HOUR, 168 * HOUR);
        assert!(scheduler.should_check_now(&state(None), start()));
    }

    #[test]
    fn test_interval_gating_with_manual_clock() {
        let scheduler = UpdateScheduler::new(24 * HOUR, 168 * HOUR).without_jitter();
        let clock = ManualClock::new(start());
        let recorded = state(Some(clock.now()));

        assert!(!scheduler.should_check_now(&recorded, clock.now()));
        clock.advance(23 * HOUR);
        assert!(!scheduler.should_check_now(&recorded, clock.now()));
        clock.advance(HOUR);
        assert!(scheduler.should_check_now(&recorded, clock.now()));
    }

    #[test]
    fn test_future_last_check_is_due() {
        let scheduler = UpdateScheduler::new(24 * HOUR, 168 * HOUR);
        let future = start() + chrono::Duration::hours(5);
        assert!(scheduler.should_check_now(&state(Some(future)), start()));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut scheduler = UpdateScheduler::new(24 * HOUR, 72 * HOUR).without_jitter();

        scheduler.record_network_result(false);
        assert_eq!(scheduler.effective_interval(), 48 * HOUR);
        scheduler.record_network_result(false);
        assert_eq!(scheduler.effective_interval(), 72 * HOUR);
        for _ in 0..40 {
            scheduler.record_network_result(false);
        }
        assert_eq!(scheduler.effective_interval(), 72 * HOUR);

        scheduler.record_network_result(true);
        assert_eq!(scheduler.consecutive_failures(), 0);
        assert_eq!(scheduler.effective_interval(), 24 * HOUR);
    }

    #[test]
    fn test_jitter_bounded() {
        let mut scheduler = UpdateScheduler::new(24 * HOUR, 168 * HOUR);
        for _ in 0..20 {
            scheduler.record_network_result(false);
            let effective = scheduler.effective_interval();
            assert!(effective >= 24 * HOUR);
            assert!(effective <= (168 * HOUR).mul_f64(1.0 + JITTER_FRACTION));
        }
    }

    #[test]
    fn test_record_check_time_persists() {
        use crate::config::InstallConfig;
        use crate::layout::InstallLayout;

        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(InstallLayout::new(dir.path(), &InstallConfig::default()));
        let scheduler = UpdateScheduler::new(24 * HOUR, 168 * HOUR);

        scheduler.record_check_time(&store, start()).unwrap();
        let loaded = store.load().unwrap();
        assert!(!scheduler.should_check_now(&loaded, start()));
    }
}
