//! Circuit breaker for outbound calls.
//!
//! - **Closed**: calls flow through, failures are counted within a window
//! - **Open**: calls are refused without touching the network
//! - **Half-Open**: after the reset timeout, exactly one trial call is
//!   admitted at a time; success closes the circuit, failure reopens it
//!
//! Refusals while Open only read two atomics. Every transition happens
//! under one lock, which also owns the half-open trial slot.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing fast.
    Open,
    /// Testing with a single trial call.
    HalfOpen,
}

impl CircuitState {
    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time window for counting failures.
    pub failure_window: Duration,
    /// Time to wait before admitting a half-open trial.
    pub reset_timeout: Duration,
    /// Successful trials needed to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

struct StateCell {
    state: CircuitState,
    trial_in_flight: bool,
}

/// Circuit breaker for a single command key.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    /// Current failure count within the window.
    failure_count: AtomicU32,
    /// Start of the current failure window (millis since `epoch`).
    window_start: AtomicU64,
    /// When the circuit last opened (millis since `epoch`).
    opened_at: AtomicU64,
    /// Successful trials since entering half-open.
    half_open_successes: AtomicU32,
    /// Copy of the state for the lock-free open check.
    state_hint: AtomicU8,
    state_lock: Mutex<StateCell>,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            failure_count: AtomicU32::new(0),
            window_start: AtomicU64::new(0),
            opened_at: AtomicU64::new(0),
            half_open_successes: AtomicU32::new(0),
            state_hint: AtomicU8::new(CircuitState::Closed.code()),
            state_lock: Mutex::new(StateCell {
                state: CircuitState::Closed,
                trial_in_flight: false,
            }),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        let mut cell = self.state_lock.lock();
        self.evaluate_state(&mut cell);
        cell.state
    }

    /// Ask to make a call. `None` means the call must not be attempted.
    ///
    /// The returned permit reports the outcome. Dropping it unreported
    /// (for example when the caller is cancelled) frees the half-open trial
    /// slot without changing state.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        if self.state_hint.load(Ordering::Acquire) == CircuitState::Open.code()
            && !self.reset_elapsed()
        {
            return None;
        }

        let mut cell = self.state_lock.lock();
        self.evaluate_state(&mut cell);
        match cell.state {
            CircuitState::Closed => Some(CallPermit::new(self, false)),
            CircuitState::HalfOpen if !cell.trial_in_flight => {
                cell.trial_in_flight = true;
                Some(CallPermit::new(self, true))
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut cell = self.state_lock.lock();
        self.evaluate_state(&mut cell);

        match cell.state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.window_start.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen if trial => {
                cell.trial_in_flight = false;
                let successes = self.half_open_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.set_state(&mut cell, CircuitState::Closed);
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.window_start.store(0, Ordering::SeqCst);
                    self.half_open_successes.store(0, Ordering::SeqCst);
                    tracing::info!("circuit breaker closed after successful recovery");
                }
            }
            // Late results from calls admitted before the last transition.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut cell = self.state_lock.lock();
        self.evaluate_state(&mut cell);

        let now = self.now_millis();

        match cell.state {
            CircuitState::Closed => {
                let window_start = self.window_start.load(Ordering::SeqCst);
                let window_ms = self.config.failure_window.as_millis() as u64;

                let count = if window_start == 0 || now > window_start + window_ms {
                    self.window_start.store(now, Ordering::SeqCst);
                    self.failure_count.store(1, Ordering::SeqCst);
                    1
                } else {
                    self.failure_count.fetch_add(1, Ordering::SeqCst) + 1
                };

                if count >= self.config.failure_threshold {
                    self.open(&mut cell, now);
                    tracing::warn!(
                        failures = count,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                cell.trial_in_flight = false;
                self.half_open_successes.store(0, Ordering::SeqCst);
                self.open(&mut cell, now);
                tracing::warn!("circuit breaker reopened after half-open failure");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_trial(&self) {
        self.state_lock.lock().trial_in_flight = false;
    }

    fn open(&self, cell: &mut StateCell, now: u64) {
        self.opened_at.store(now, Ordering::SeqCst);
        self.set_state(cell, CircuitState::Open);
    }

    fn set_state(&self, cell: &mut StateCell, state: CircuitState) {
        cell.state = state;
        self.state_hint.store(state.code(), Ordering::Release);
    }

    /// Move Open to HalfOpen once the reset timeout has passed.
    fn evaluate_state(&self, cell: &mut StateCell) {
        if cell.state == CircuitState::Open && self.reset_elapsed() {
            self.set_state(cell, CircuitState::HalfOpen);
            cell.trial_in_flight = false;
            self.half_open_successes.store(0, Ordering::SeqCst);
            tracing::info!("circuit breaker transitioned to half-open");
        }
    }

    fn reset_elapsed(&self) -> bool {
        let opened_at = self.opened_at.load(Ordering::SeqCst);
        let reset_ms = self.config.reset_timeout.as_millis() as u64;
        self.now_millis() > opened_at + reset_ms
    }

    /// Milliseconds since `epoch`, at least 1 so 0 can mean "unset".
    fn now_millis(&self) -> u64 {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        elapsed.max(1)
    }
}

/// Admission to make one call through a [`CircuitBreaker`].
#[must_use = "a permit should report the call outcome"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this is the half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread::{self, sleep};

    fn config(failure_threshold: u32, reset_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            failure_window: Duration::from_secs(60),
            reset_timeout,
            success_threshold: 1,
        }
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().expect("call should be admitted").failure();
    }

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(config(3, Duration::from_secs(30)));

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_success_resets_count() {
        let cb = CircuitBreaker::new(config(3, Duration::from_secs(30)));

        fail(&cb);
        fail(&cb);
        cb.try_acquire().unwrap().success();

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(50)));

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        sleep(Duration::from_millis(100));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_closes_after_half_open_success() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));

        fail(&cb);
        sleep(Duration::from_millis(50));

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reopens_on_half_open_failure() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));

        fail(&cb);
        sleep(Duration::from_millis(50));

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_single_trial_admitted() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));
        fail(&cb);
        sleep(Duration::from_millis(50));

        let trial = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_none());
        assert!(cb.try_acquire().is_none());

        // An unreported trial frees the slot.
        drop(trial);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_single_trial_under_contention() {
        let cb = CircuitBreaker::new(config(1, Duration::from_millis(20)));
        fail(&cb);
        sleep(Duration::from_millis(50));

        let threads = 16;
        let barrier = Barrier::new(threads);
        let admitted = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        let permit = cb.try_acquire();
                        barrier.wait();
                        permit.is_some()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|admitted| *admitted)
                .count()
        });
        assert_eq!(admitted, 1);
    }
}
