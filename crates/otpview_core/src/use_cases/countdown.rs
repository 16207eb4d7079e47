use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::config::CountdownSettings;
use crate::entities::{Account, AccountId};
use crate::timing::{Clock, DEFAULT_PERIOD_SECS, ROLLOVER_THRESHOLD_SECS, TICK_INTERVAL};

/// Remaining seconds per ticking account, recomputed on every tick
pub type RemainingMap = BTreeMap<AccountId, u32>;

/// Seconds left in the current period, in `(0, period]`.
///
/// A boundary tick (`epoch_secs % period == 0`) yields the full period.
pub fn remaining_secs(epoch_secs: u64, period: u32) -> u32 {
    let period = u64::from(period.max(1));
    (period - epoch_secs % period) as u32
}

/// Edge-triggered rollover test between two consecutive ticks
pub fn is_rollover(previous: u32, current: u32, threshold: u32) -> bool {
    previous <= threshold && current > previous
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownPolicy {
    pub default_period: u32,
    pub rollover_threshold: u32,
}

impl Default for CountdownPolicy {
    fn default() -> Self {
        Self {
            default_period: DEFAULT_PERIOD_SECS,
            rollover_threshold: ROLLOVER_THRESHOLD_SECS,
        }
    }
}

impl From<&CountdownSettings> for CountdownPolicy {
    fn from(settings: &CountdownSettings) -> Self {
        Self {
            default_period: settings.default_period_secs,
            rollover_threshold: settings.rollover_threshold_secs,
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tick {
    pub remaining: RemainingMap,
    /// Accounts whose period wrapped since the previous tick
    pub rolled_over: Vec<AccountId>,
}

impl Tick {
    /// One refresh covers every account that rolled over on this tick
    pub fn needs_refresh(&self) -> bool {
        !self.rolled_over.is_empty()
    }
}

/// Compute the next tick from the previous tick's remaining values.
///
/// Accounts missing from `previous` (new, or just got a code) never roll over
/// on their first tick.
pub fn tick(
    previous: &RemainingMap,
    accounts: &[Account],
    epoch_secs: u64,
    policy: &CountdownPolicy,
) -> Tick {
    let mut next = Tick::default();

    for account in accounts {
        let Some(period) = account.countdown_period(policy.default_period) else {
            continue;
        };

        let remaining = remaining_secs(epoch_secs, period);
        if let Some(&before) = previous.get(&account.id) {
            if is_rollover(before, remaining, policy.rollover_threshold) {
                next.rolled_over.push(account.id);
            }
        }
        next.remaining.insert(account.id, remaining);
    }

    next
}

/// Drives [`tick`] once per interval against the latest account list
pub struct CountdownScheduler<C: Clock> {
    clock: Arc<C>,
    policy: CountdownPolicy,
    interval: Duration,
}

impl<C: Clock + 'static> CountdownScheduler<C> {
    pub fn new(clock: Arc<C>, policy: CountdownPolicy) -> Self {
        Self {
            clock,
            policy,
            interval: TICK_INTERVAL,
        }
    }

    /// A zero tick interval falls back to [`TICK_INTERVAL`].
    pub fn from_settings(clock: Arc<C>, settings: &CountdownSettings) -> Self {
        let mut interval = settings.tick_interval();
        if interval.is_zero() {
            warn!(fallback_ms = TICK_INTERVAL.as_millis() as u64, "tick interval of 0ms ignored");
            interval = TICK_INTERVAL;
        }

        Self {
            clock,
            policy: CountdownPolicy::from(settings),
            interval,
        }
    }

    /// Start ticking. The first tick runs immediately.
    ///
    /// `on_rollover` runs at most once per tick and must not block; an
    /// asynchronous refresh should be spawned from it, never awaited.
    pub fn spawn<F>(self, accounts: watch::Receiver<Vec<Account>>, on_rollover: F) -> CountdownHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (remaining_tx, remaining_rx) = watch::channel(RemainingMap::new());

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut previous = RemainingMap::new();

            loop {
                interval.tick().await;

                let now = self.clock.epoch_secs();
                let current = {
                    let accounts = accounts.borrow();
                    tick(&previous, &accounts, now, &self.policy)
                };

                trace!(epoch_secs = now, ticking = current.remaining.len(), "countdown tick");

                if current.needs_refresh() {
                    debug!(accounts = ?current.rolled_over, "period rolled over, refreshing codes");
                    on_rollover();
                }

                remaining_tx.send_replace(current.remaining.clone());
                previous = current.remaining;
            }
        });

        CountdownHandle {
            remaining: remaining_rx,
            task: Some(task),
        }
    }
}

/// Owner of a running countdown; dropping it stops the interval
pub struct CountdownHandle {
    remaining: watch::Receiver<RemainingMap>,
    task: Option<JoinHandle<()>>,
}

impl CountdownHandle {
    pub fn subscribe(&self) -> watch::Receiver<RemainingMap> {
        self.remaining.clone()
    }

    pub fn current(&self) -> RemainingMap {
        self.remaining.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OtpType;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn totp(id: u32, period: u32) -> Account {
        Account::new(id, OtpType::Totp)
            .with_period(period)
            .with_otp("123456")
    }

    /// Clock following tokio's (pausable) time from a fixed epoch offset
    struct PausedClock {
        base: u64,
        start: tokio::time::Instant,
    }

    impl PausedClock {
        fn starting_at(base: u64) -> Self {
            Self {
                base,
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for PausedClock {
        fn epoch_secs(&self) -> u64 {
            self.base + self.start.elapsed().as_secs()
        }
    }

    #[rstest]
    #[case(28, 30, 2)]
    #[case(29, 30, 1)]
    #[case(30, 30, 30)]
    #[case(0, 30, 30)]
    #[case(1_699_999_981, 30, 29)]
    #[case(59, 60, 1)]
    #[case(120, 60, 60)]
    fn test_remaining_secs(#[case] epoch: u64, #[case] period: u32, #[case] expected: u32) {
        assert_eq!(remaining_secs(epoch, period), expected);
    }

    #[test]
    fn test_remaining_always_within_period() {
        for period in [1u32, 7, 30, 60, 90] {
            for epoch in 1_700_000_000u64..1_700_000_200 {
                let remaining = remaining_secs(epoch, period);
                assert!(remaining > 0 && remaining <= period);
                assert_eq!(remaining == period, epoch % u64::from(period) == 0);
            }
        }
    }

    #[rstest]
    #[case(2, 30, true)]
    #[case(2, 1, false)]
    #[case(1, 30, true)]
    #[case(5, 30, false)]
    #[case(3, 2, false)]
    fn test_is_rollover(#[case] previous: u32, #[case] current: u32, #[case] expected: bool) {
        assert_eq!(is_rollover(previous, current, ROLLOVER_THRESHOLD_SECS), expected);
    }

    #[test]
    fn test_tick_sequence_across_boundary() {
        let policy = CountdownPolicy::default();
        let accounts = vec![totp(1, 30)];
        let base = 30 * 1000;

        let first = tick(&RemainingMap::new(), &accounts, base + 28, &policy);
        assert_eq!(first.remaining[&AccountId::new(1)], 2);
        assert!(!first.needs_refresh());

        let second = tick(&first.remaining, &accounts, base + 29, &policy);
        assert_eq!(second.remaining[&AccountId::new(1)], 1);
        assert!(!second.needs_refresh());

        let third = tick(&second.remaining, &accounts, base + 30, &policy);
        assert_eq!(third.remaining[&AccountId::new(1)], 30);
        assert_eq!(third.rolled_over, vec![AccountId::new(1)]);
    }

    #[test]
    fn test_simultaneous_rollovers_coalesce() {
        let policy = CountdownPolicy::default();
        let accounts = vec![totp(1, 30), totp(2, 60)];

        let before = tick(&RemainingMap::new(), &accounts, 119, &policy);
        let after = tick(&before.remaining, &accounts, 120, &policy);

        assert_eq!(after.rolled_over.len(), 2);
        assert!(after.needs_refresh());
    }

    #[test]
    fn test_non_ticking_accounts_are_absent() {
        let policy = CountdownPolicy::default();
        let accounts = vec![
            totp(1, 30),
            Account::new(2, OtpType::Hotp).with_otp("111111"),
            Account::new(3, OtpType::Totp),
        ];

        let result = tick(&RemainingMap::new(), &accounts, 10, &policy);

        assert_eq!(result.remaining.len(), 1);
        assert!(result.remaining.contains_key(&AccountId::new(1)));
    }

    #[test]
    fn test_new_account_does_not_roll_over_on_first_tick() {
        let policy = CountdownPolicy::default();
        let previous = tick(&RemainingMap::new(), &[totp(1, 30)], 29, &policy);

        let accounts = vec![totp(1, 30), totp(2, 30)];
        let result = tick(&previous.remaining, &accounts, 30, &policy);

        assert_eq!(result.rolled_over, vec![AccountId::new(1)]);
    }

    #[test]
    fn test_default_period_applies() {
        let policy = CountdownPolicy::default();
        let account = Account::new(1, OtpType::Totp).with_otp("123456");

        let result = tick(&RemainingMap::new(), &[account], 45, &policy);

        assert_eq!(result.remaining[&AccountId::new(1)], 15);
    }

    #[test]
    fn test_empty_list_yields_empty_map() {
        let previous: RemainingMap = [(AccountId::new(1), 1)].into_iter().collect();

        let result = tick(&previous, &[], 30, &CountdownPolicy::default());

        assert!(result.remaining.is_empty());
        assert!(!result.needs_refresh());
    }

    #[test]
    fn test_remaining_map_snapshot() {
        let policy = CountdownPolicy::default();
        let accounts = vec![totp(1, 30), totp(2, 60)];

        let result = tick(&RemainingMap::new(), &accounts, 1_700_000_015, &policy);

        insta::assert_debug_snapshot!(result.remaining, @r###"
        {
            AccountId(
                1,
            ): 25,
            AccountId(
                2,
            ): 25,
        }
        "###);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_refreshes_once_on_boundary() {
        let clock = Arc::new(PausedClock::starting_at(30 * 1000 + 28));
        let (_accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30), totp(2, 60)]);
        let refreshes = Arc::new(AtomicUsize::new(0));

        let counter = refreshes.clone();
        let handle = CountdownScheduler::new(clock, CountdownPolicy::default())
            .spawn(accounts_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        // Ticks at +0s (2 left), +1s (1 left), +2s (wrapped)
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.current()[&AccountId::new(1)], 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_reads_latest_account_list() {
        let clock = Arc::new(PausedClock::starting_at(1000));
        let (accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30)]);

        let handle = CountdownScheduler::new(clock, CountdownPolicy::default())
            .spawn(accounts_rx, || {});

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.current().len(), 1);

        accounts_tx.send_replace(vec![totp(1, 30), totp(2, 30)]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.current().len(), 2);

        accounts_tx.send_replace(vec![]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.current().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_coalesces_simultaneous_rollovers() {
        // 28s left of a 30s period, 58s left of a 60s period
        let clock = Arc::new(PausedClock::starting_at(60 * 500 + 58));
        let (_accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30), totp(2, 60)]);
        let refreshes = Arc::new(AtomicUsize::new(0));

        let counter = refreshes.clone();
        let handle = CountdownScheduler::new(clock, CountdownPolicy::default())
            .spawn(accounts_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(handle.current()[&AccountId::new(1)], 30);
        assert_eq!(handle.current()[&AccountId::new(2)], 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_interval_falls_back() {
        let settings = CountdownSettings {
            tick_interval_ms: 0,
            ..CountdownSettings::default()
        };
        let clock = Arc::new(PausedClock::starting_at(1000));
        let (_accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30)]);

        let scheduler = CountdownScheduler::from_settings(clock, &settings);
        assert_eq!(scheduler.interval, TICK_INTERVAL);

        let handle = scheduler.spawn(accounts_rx, || {});
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(handle.is_running());
        assert_eq!(handle.current()[&AccountId::new(1)], 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stops_when_handle_dropped() {
        let clock = Arc::new(PausedClock::starting_at(30 * 1000 + 28));
        let (accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30)]);
        let refreshes = Arc::new(AtomicUsize::new(0));

        let counter = refreshes.clone();
        let handle = CountdownScheduler::new(clock, CountdownPolicy::default())
            .spawn(accounts_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        drop(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
        assert!(accounts_tx.is_closed());
        assert_eq!(Arc::strong_count(&refreshes), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stops_on_stop() {
        let clock = Arc::new(PausedClock::starting_at(30 * 1000 + 28));
        let (_accounts_tx, accounts_rx) = watch::channel(vec![totp(1, 30)]);
        let refreshes = Arc::new(AtomicUsize::new(0));

        let counter = refreshes.clone();
        let mut handle = CountdownScheduler::new(clock, CountdownPolicy::default())
            .spawn(accounts_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(handle.is_running());

        handle.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!handle.is_running());
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }
}
