//! Memory limit controller implementation.
//!
//! [`MemoryLimitController`] counts reserved bytes against a soft ceiling.
//! Callers are admitted while usage is at or below the ceiling, so a single
//! admission may overshoot it; once usage is above the ceiling, `reserve`
//! parks until enough bytes are released and `try_reserve` answers `false`.
//! `force_reserve` always admits, for bytes already committed upstream.
//!
//! An optional trigger callback fires when usage first reaches a threshold
//! and re-arms only after usage falls back below it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use memlimit_core::{LimitError, LimitResult, LimiterConfig};

use crate::cancel::{CancellationToken, Unpark};
use crate::reservation::Reservation;
use crate::stats::{Counters, LimiterStats};

/// Callback invoked when usage crosses the trigger threshold.
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

struct Trigger {
    /// Fraction of the ceiling, in `[0, 1]`.
    threshold: f64,
    callback: TriggerCallback,
}

struct State {
    usage: u64,
    armed: bool,
    parked: usize,
    counters: Counters,
}

struct Inner {
    limit: u64,
    trigger: Option<Trigger>,
    state: Mutex<State>,
    capacity: Condvar,
}

impl Inner {
    fn admits(&self, usage: u64) -> bool {
        self.limit == 0 || usage <= self.limit
    }

    fn ratio(&self, usage: u64) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            usage as f64 / self.limit as f64
        }
    }
}

impl Unpark for Inner {
    fn unpark_all(&self) {
        let _state = self.state.lock();
        self.capacity.notify_all();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Admission {
    Normal,
    Forced,
}

/// Result of a successful admission, before the trigger has run.
struct Admitted {
    size: u64,
    fire_trigger: bool,
}

/// Bounded, thread-safe accountant of reserved bytes.
///
/// Cloning is cheap and every clone shares the same accounting.
#[derive(Clone)]
pub struct MemoryLimitController {
    inner: Arc<Inner>,
}

impl MemoryLimitController {
    /// Create a controller with the given ceiling and no trigger.
    ///
    /// A ceiling of zero disables the limit: every reservation is admitted.
    pub fn new(memory_limit: u64) -> Self {
        Self::build(memory_limit, None)
    }

    /// Create a controller that calls `callback` when usage reaches
    /// `threshold_percent` (0 to 100) of `memory_limit`.
    pub fn with_trigger<F>(memory_limit: u64, threshold_percent: f64, callback: F) -> LimitResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let config = LimiterConfig::new()
            .with_max_memory(memory_limit)
            .with_trigger_threshold(threshold_percent);
        Self::from_config(&config, Some(Arc::new(callback)))
    }

    /// Create a controller from a configuration.
    ///
    /// A trigger threshold and a callback must be supplied together.
    pub fn from_config(config: &LimiterConfig, callback: Option<TriggerCallback>) -> LimitResult<Self> {
        config.validate()?;

        let trigger = match (config.trigger_fraction(), callback) {
            (Some(threshold), Some(callback)) => Some(Trigger {
                threshold,
                callback,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(LimitError::InvalidConfig(
                    "trigger threshold configured without a callback".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(LimitError::InvalidConfig(
                    "trigger callback supplied without a threshold".to_string(),
                ))
            }
        };

        Ok(Self::build(config.max_memory_bytes, trigger))
    }

    fn build(limit: u64, trigger: Option<Trigger>) -> Self {
        info!(
            memory_limit = limit,
            trigger_threshold = trigger.as_ref().map(|t| t.threshold),
            "Created memory limit controller"
        );

        Self {
            inner: Arc::new(Inner {
                limit,
                state: Mutex::new(State {
                    usage: 0,
                    armed: trigger.is_some(),
                    parked: 0,
                    counters: Counters::default(),
                }),
                trigger,
                capacity: Condvar::new(),
            }),
        }
    }

    /// Reserve `size` bytes, parking while usage is over the ceiling.
    pub fn reserve(&self, size: i64) -> LimitResult<()> {
        let admitted = self.reserve_blocking("reserve", size, None, None)?;
        self.fire_trigger(admitted.fire_trigger);
        Ok(())
    }

    /// Like [`reserve`](Self::reserve), but the wait ends with
    /// [`LimitError::Cancelled`] once `token` is cancelled.
    ///
    /// A cancelled reservation leaves usage untouched.
    pub fn reserve_interruptible(&self, size: i64, token: &CancellationToken) -> LimitResult<()> {
        let admitted = self.reserve_blocking("reserve_interruptible", size, Some(token), None)?;
        self.fire_trigger(admitted.fire_trigger);
        Ok(())
    }

    /// Like [`reserve`](Self::reserve), but gives up with
    /// [`LimitError::TimedOut`] after `timeout`.
    pub fn reserve_timeout(&self, size: i64, timeout: Duration) -> LimitResult<()> {
        let admitted = self.reserve_blocking("reserve_timeout", size, None, Some(timeout))?;
        self.fire_trigger(admitted.fire_trigger);
        Ok(())
    }

    /// Reserve `size` bytes if usage is at or below the ceiling.
    ///
    /// Returns `Ok(false)` without changing anything when it is not.
    pub fn try_reserve(&self, size: i64) -> LimitResult<bool> {
        let size = checked_size("try_reserve", size)?;

        match self.try_admit("try_reserve", size)? {
            Some(admitted) => {
                self.fire_trigger(admitted.fire_trigger);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reserve `size` bytes regardless of the ceiling.
    pub fn force_reserve(&self, size: i64) -> LimitResult<()> {
        let size = checked_size("force_reserve", size)?;

        let mut state = self.inner.state.lock();
        let admitted = self.admit(&mut state, "force_reserve", size, Admission::Forced)?;
        drop(state);

        self.fire_trigger(admitted.fire_trigger);
        Ok(())
    }

    /// Return `size` bytes to the controller.
    ///
    /// Releasing more than is currently reserved is rejected without
    /// changing usage.
    pub fn release(&self, size: i64) -> LimitResult<()> {
        let size = checked_size("release", size)?;
        self.release_bytes(size)
    }

    pub(crate) fn release_bytes(&self, size: u64) -> LimitResult<()> {
        let mut state = self.inner.state.lock();
        if size > state.usage {
            warn!(size, usage = state.usage, "Rejected release larger than usage");
            return Err(LimitError::invalid_argument(
                "release",
                format!("cannot release {size} bytes, only {} reserved", state.usage),
            ));
        }

        state.usage -= size;
        trace!(size, usage = state.usage, "Released memory");

        if let Some(trigger) = &self.inner.trigger {
            if !state.armed && self.inner.ratio(state.usage) < trigger.threshold {
                state.armed = true;
                trace!(usage = state.usage, "Trigger re-armed");
            }
        }

        if state.parked > 0 && self.inner.admits(state.usage) {
            self.inner.capacity.notify_all();
        }

        Ok(())
    }

    /// Reserve `size` bytes as with [`reserve`](Self::reserve) and return a
    /// guard that releases them on drop.
    pub fn reserve_guarded(&self, size: i64) -> LimitResult<Reservation> {
        let admitted = self.reserve_blocking("reserve", size, None, None)?;
        let reservation = Reservation::new(self.clone(), admitted.size);
        self.fire_trigger(admitted.fire_trigger);
        Ok(reservation)
    }

    /// Reserve as with [`try_reserve`](Self::try_reserve), returning a guard
    /// on admission.
    pub fn try_reserve_guarded(&self, size: i64) -> LimitResult<Option<Reservation>> {
        let size = checked_size("try_reserve", size)?;

        let Some(admitted) = self.try_admit("try_reserve", size)? else {
            return Ok(None);
        };

        let reservation = Reservation::new(self.clone(), admitted.size);
        self.fire_trigger(admitted.fire_trigger);
        Ok(Some(reservation))
    }

    /// Reserve as with [`force_reserve`](Self::force_reserve), returning a
    /// guard.
    pub fn force_reserve_guarded(&self, size: i64) -> LimitResult<Reservation> {
        let size = checked_size("force_reserve", size)?;

        let mut state = self.inner.state.lock();
        let admitted = self.admit(&mut state, "force_reserve", size, Admission::Forced)?;
        drop(state);

        let reservation = Reservation::new(self.clone(), admitted.size);
        self.fire_trigger(admitted.fire_trigger);
        Ok(reservation)
    }

    /// Grow an existing reservation by `additional` bytes if usage is at or
    /// below the ceiling.
    ///
    /// Returns whether the trigger must fire; the caller fires it once its
    /// own bookkeeping is consistent.
    pub(crate) fn try_grow(&self, additional: u64) -> LimitResult<Option<bool>> {
        Ok(self
            .try_admit("try_resize", additional)?
            .map(|admitted| admitted.fire_trigger))
    }

    /// Bytes currently reserved.
    pub fn current_usage(&self) -> u64 {
        self.inner.state.lock().usage
    }

    /// Usage as a plain ratio of the ceiling: `1.01` means 101%.
    ///
    /// Always `0.0` for an unlimited controller.
    pub fn current_usage_percent(&self) -> f64 {
        self.inner.ratio(self.current_usage())
    }

    /// The configured ceiling in bytes; zero when unlimited.
    pub fn memory_limit(&self) -> u64 {
        self.inner.limit
    }

    /// Whether a ceiling is enforced.
    pub fn is_memory_limited(&self) -> bool {
        self.inner.limit > 0
    }

    /// The trigger threshold as a fraction of the ceiling, if configured.
    pub fn trigger_threshold(&self) -> Option<f64> {
        self.inner.trigger.as_ref().map(|t| t.threshold)
    }

    /// Whether the next crossing of the threshold will fire the callback.
    pub fn is_trigger_armed(&self) -> bool {
        self.inner.trigger.is_some() && self.inner.state.lock().armed
    }

    /// Number of threads currently parked in a blocking reservation.
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().parked
    }

    /// Get a snapshot of the current statistics.
    pub fn stats(&self) -> LimiterStats {
        let state = self.inner.state.lock();
        LimiterStats {
            current_usage: state.usage,
            peak_usage: state.counters.peak_usage,
            memory_limit: self.inner.limit,
            admitted: state.counters.admitted,
            forced: state.counters.forced,
            rejected: state.counters.rejected,
            waits: state.counters.waits,
            cancelled: state.counters.cancelled,
            timed_out: state.counters.timed_out,
            parked_waiters: state.parked,
            trigger_fired: state.counters.trigger_fired,
        }
    }

    fn reserve_blocking(
        &self,
        operation: &'static str,
        size: i64,
        token: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> LimitResult<Admitted> {
        let size = checked_size(operation, size)?;

        if let Some(token) = token {
            let target: Arc<dyn Unpark> = self.inner.clone();
            token.register(Arc::downgrade(&target));
        }
        // A timeout too large to express as an instant waits without a deadline.
        let deadline = timeout.and_then(|timeout| {
            Instant::now()
                .checked_add(timeout)
                .map(|deadline| (deadline, timeout))
        });

        let mut state = self.inner.state.lock();
        if !self.inner.admits(state.usage) {
            state.counters.waits += 1;
            state.parked += 1;
            debug!(
                size,
                usage = state.usage,
                memory_limit = self.inner.limit,
                "Reservation waiting for memory"
            );

            let outcome = self.park(&mut state, size, token, deadline);
            state.parked -= 1;
            outcome?;
        }

        self.admit(&mut state, operation, size, Admission::Normal)
    }

    fn park(
        &self,
        state: &mut MutexGuard<'_, State>,
        size: u64,
        token: Option<&CancellationToken>,
        deadline: Option<(Instant, Duration)>,
    ) -> LimitResult<()> {
        while !self.inner.admits(state.usage) {
            if token.is_some_and(CancellationToken::is_cancelled) {
                state.counters.cancelled += 1;
                debug!(size, "Reservation cancelled while waiting");
                return Err(LimitError::Cancelled { size });
            }

            match deadline {
                Some((deadline, timeout)) => {
                    let timed_out = self.inner.capacity.wait_until(state, deadline).timed_out();
                    if timed_out && !self.inner.admits(state.usage) {
                        state.counters.timed_out += 1;
                        debug!(size, ?timeout, "Reservation timed out while waiting");
                        return Err(LimitError::TimedOut { size, timeout });
                    }
                }
                None => self.inner.capacity.wait(state),
            }
        }
        Ok(())
    }

    /// Admit `size` bytes only if usage is at or below the ceiling.
    ///
    /// Returns `None` without changing usage when the controller is over its
    /// ceiling. The trigger, if due, is left for the caller to fire.
    fn try_admit(&self, operation: &'static str, size: u64) -> LimitResult<Option<Admitted>> {
        let mut state = self.inner.state.lock();
        if !self.inner.admits(state.usage) {
            state.counters.rejected += 1;
            trace!(size, usage = state.usage, operation, "Reservation rejected: over limit");
            return Ok(None);
        }
        self.admit(&mut state, operation, size, Admission::Normal).map(Some)
    }

    /// Add `size` to usage and decide whether the trigger fires.
    ///
    /// Must be called with the lock held; the callback itself runs only
    /// after the caller drops it.
    fn admit(
        &self,
        state: &mut State,
        operation: &'static str,
        size: u64,
        kind: Admission,
    ) -> LimitResult<Admitted> {
        let usage = state.usage.checked_add(size).ok_or_else(|| {
            LimitError::invalid_argument(
                operation,
                format!("reserving {size} bytes would overflow usage {}", state.usage),
            )
        })?;

        state.usage = usage;
        match kind {
            Admission::Normal => state.counters.admitted += 1,
            Admission::Forced => state.counters.forced += 1,
        }
        state.counters.record_usage(usage);
        trace!(size, usage, kind = ?kind, "Reserved memory");

        Ok(Admitted {
            size,
            fire_trigger: size > 0 && self.check_trigger(state),
        })
    }

    fn check_trigger(&self, state: &mut State) -> bool {
        let Some(trigger) = &self.inner.trigger else {
            return false;
        };

        if state.armed && self.inner.ratio(state.usage) >= trigger.threshold {
            state.armed = false;
            state.counters.trigger_fired += 1;
            debug!(
                usage = state.usage,
                threshold = trigger.threshold,
                "Memory usage crossed trigger threshold"
            );
            return true;
        }
        false
    }

    pub(crate) fn fire_trigger(&self, fire: bool) {
        if !fire {
            return;
        }
        if let Some(trigger) = &self.inner.trigger {
            (trigger.callback)();
        }
    }
}

fn checked_size(operation: &'static str, size: i64) -> LimitResult<u64> {
    u64::try_from(size).map_err(|_| {
        LimitError::invalid_argument(operation, format!("size must be non-negative, got {size}"))
    })
}

impl std::fmt::Debug for MemoryLimitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryLimitController")
            .field("memory_limit", &self.inner.limit)
            .field("current_usage", &state.usage)
            .field("trigger_threshold", &self.inner.trigger.as_ref().map(|t| t.threshold))
            .field("armed", &state.armed)
            .field("parked", &state.parked)
            .finish()
    }
}
