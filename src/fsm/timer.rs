//! Periodic ticker with observer fan-out
//!
//! [`IntervalTimer`] runs a tokio task that notifies its [`TickObserver`]s
//! once per interval. The first tick arrives one full interval after
//! [`IntervalTimer::start`]. Stopping cancels the task through a
//! `CancellationToken`; a fresh token is installed so the timer can be
//! started again.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::lock;
use super::subject::{Subject, TickObserver};
use crate::error::PhaseError;

struct TimerInner {
    interval: Duration,
    running: bool,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

/// Restartable periodic timer.
pub struct IntervalTimer {
    inner: Mutex<TimerInner>,
    observers: Arc<Subject<dyn TickObserver>>,
}

impl IntervalTimer {
    /// Creates a stopped timer.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, PhaseError> {
        validate_interval(interval)?;
        Ok(Self {
            inner: Mutex::new(TimerInner {
                interval,
                running: false,
                cancel: CancellationToken::new(),
                task: None,
                started_at: None,
            }),
            observers: Arc::new(Subject::new()),
        })
    }

    /// Registers a tick observer.
    pub fn add_observer(&self, observer: &Arc<dyn TickObserver>) {
        self.observers.add_observer(observer);
    }

    /// Registers a weakly held tick observer.
    pub fn subscribe(&self, observer: Weak<dyn TickObserver>) {
        self.observers.subscribe(observer);
    }

    /// Removes a tick observer.
    pub fn remove_observer(&self, observer: &Arc<dyn TickObserver>) {
        self.observers.remove_observer(observer);
    }

    /// Starts ticking. Calling `start` on a running timer does nothing.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Strategy` when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), PhaseError> {
        let mut inner = lock(&self.inner);
        if inner.running {
            return Ok(());
        }
        let handle = runtime_handle()?;
        self.arm(&mut inner, &handle);
        debug!(interval = ?inner.interval, "timer started");
        Ok(())
    }

    fn arm(&self, inner: &mut TimerInner, handle: &tokio::runtime::Handle) {
        let task = spawn_ticker(
            handle,
            inner.interval,
            inner.cancel.clone(),
            Arc::clone(&self.observers),
        );
        inner.task = Some(task);
        inner.running = true;
        inner.started_at = Some(Instant::now());
    }

    /// Stops ticking. Calling `stop` on a stopped timer does nothing.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        if !inner.running {
            return;
        }
        Self::halt(&mut inner);
        debug!("timer stopped");
    }

    fn halt(inner: &mut TimerInner) {
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.task = None;
        inner.running = false;
        inner.started_at = None;
    }

    /// Changes the interval, restarting the ticker if it is running. The
    /// restart happens under the same lock as the halt, so a concurrent
    /// [`stop`](Self::stop) either precedes it or stops the new ticker.
    ///
    /// # Errors
    ///
    /// Returns `PhaseError::Validation` if `interval` is zero, or
    /// `PhaseError::Strategy` if a running timer is updated outside a tokio
    /// runtime; the timer is left untouched in both cases.
    pub fn update_interval(&self, interval: Duration) -> Result<(), PhaseError> {
        validate_interval(interval)?;
        let mut inner = lock(&self.inner);
        if !inner.running {
            inner.interval = interval;
            return Ok(());
        }
        let handle = runtime_handle()?;
        Self::halt(&mut inner);
        inner.interval = interval;
        self.arm(&mut inner, &handle);
        debug!(interval = ?interval, "timer restarted");
        Ok(())
    }

    /// Returns `true` while the ticker task is armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.inner).running
    }

    /// Current interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        lock(&self.inner).interval
    }

    /// Time elapsed since the timer was last started.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        lock(&self.inner).started_at.map(|t| t.elapsed())
    }

    /// When the next tick is due, if running.
    #[must_use]
    pub fn next_trigger(&self) -> Option<Instant> {
        let inner = lock(&self.inner);
        let started = inner.started_at?;
        let period = inner.interval.as_nanos();
        let elapsed = started.elapsed().as_nanos();
        let ticks = elapsed / period + 1;
        let offset = u64::try_from(period * ticks).ok()?;
        Some(started + Duration::from_nanos(offset))
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        lock(&self.inner).cancel.cancel();
    }
}

impl std::fmt::Debug for IntervalTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("IntervalTimer")
            .field("interval", &inner.interval)
            .field("running", &inner.running)
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle, PhaseError> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| PhaseError::Strategy(format!("timer requires a tokio runtime: {e}")))
}

fn validate_interval(interval: Duration) -> Result<(), PhaseError> {
    if interval.is_zero() {
        return Err(PhaseError::Validation(
            "timer interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn spawn_ticker(
    handle: &tokio::runtime::Handle,
    period: Duration,
    cancel: CancellationToken,
    observers: Arc<Subject<dyn TickObserver>>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    trace!("ticker cancelled");
                    break;
                }
                _ = interval.tick() => {
                    observers.notify(|o| o.on_tick());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter(AtomicU32);

    impl TickObserver for Counter {
        fn on_tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn counting_timer(secs: u64) -> (IntervalTimer, Arc<Counter>) {
        let timer = IntervalTimer::new(Duration::from_secs(secs)).unwrap();
        let counter = Arc::new(Counter::default());
        let observer: Arc<dyn TickObserver> = counter.clone();
        timer.add_observer(&observer);
        (timer, counter)
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(IntervalTimer::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_start_without_runtime_errors() {
        let timer = IntervalTimer::new(Duration::from_secs(1)).unwrap();
        let err = timer.start().unwrap_err();
        assert!(matches!(err, PhaseError::Strategy(_)));
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_immediate_tick() {
        let (timer, counter) = counting_timer(1);
        timer.start().unwrap();
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks_and_restart_works() {
        let (timer, counter) = counting_timer(1);
        timer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        timer.start().unwrap();
        timer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_restarts() {
        let (timer, counter) = counting_timer(10);
        timer.start().unwrap();
        timer.update_interval(Duration::from_secs(1)).unwrap();
        assert!(timer.is_running());
        assert_eq!(timer.interval(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_update_interval_sticks() {
        let (timer, counter) = counting_timer(10);
        timer.start().unwrap();
        timer.update_interval(Duration::from_secs(1)).unwrap();
        timer.stop();
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        timer.update_interval(Duration::from_secs(2)).unwrap();
        assert!(!timer.is_running());
        assert_eq!(timer.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_update_interval_while_stopped_needs_no_runtime() {
        let timer = IntervalTimer::new(Duration::from_secs(1)).unwrap();
        timer.update_interval(Duration::from_secs(3)).unwrap();
        assert_eq!(timer.interval(), Duration::from_secs(3));
        assert!(timer.update_interval(Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_trigger_tracks_interval() {
        let (timer, _counter) = counting_timer(2);
        assert!(timer.next_trigger().is_none());
        let before = Instant::now();
        timer.start().unwrap();
        let next = timer.next_trigger().unwrap();
        assert_eq!(next - before, Duration::from_secs(2));
        timer.stop();
        assert!(timer.next_trigger().is_none());
    }
}
