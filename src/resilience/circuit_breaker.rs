//! Circuit breaker for instance protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: instance assumed down, calls are rejected before any attempt
//! - Half-Open: a single trial call decides between Closed and Open
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first can_execute() at or after next_attempt_time
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - Per-instance breaker, never global
//! - Pure bookkeeping: the breaker never performs a call itself
//! - Exactly one trial permit in Half-Open; a trial that never reports back
//!   is re-granted after another recovery timeout

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::context::Context;
use crate::observability::{metrics, ResilienceEvent};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Point-in-time copy of a breaker's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub next_attempt_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
    /// When the outstanding half-open trial was handed out.
    trial_started: Option<Instant>,
}

type Transition = (CircuitState, CircuitState);

/// Three-state circuit breaker guarding one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    ctx: Context,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig, ctx: Context) -> Self {
        let target = target.into();
        tracing::trace!(
            addr = %target,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            "Creating circuit breaker"
        );
        Self {
            target,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                next_attempt_time: None,
                trial_started: None,
            }),
            ctx,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for permission to attempt a call.
    ///
    /// In Open, the first caller at or after `next_attempt_time` moves the
    /// breaker to Half-Open and receives the trial permit. In Half-Open every
    /// other caller is refused until the trial reports its result.
    pub fn can_execute(&self) -> bool {
        let now = Instant::now();
        let (allowed, transition) = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => match inner.next_attempt_time {
                    Some(at) if now < at => (false, None),
                    _ => {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_started = Some(now);
                        (true, Some((CircuitState::Open, CircuitState::HalfOpen)))
                    }
                },
                CircuitState::HalfOpen => {
                    if self.trial_slot_free(&inner, now) {
                        inner.trial_started = Some(now);
                        (true, None)
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.announce(transition);
        allowed
    }

    /// Whether `can_execute` would currently grant a permit, without taking it.
    pub fn permits_execution(&self) -> bool {
        let now = Instant::now();
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.next_attempt_time.map_or(true, |at| now >= at),
            CircuitState::HalfOpen => self.trial_slot_free(&inner, now),
        }
    }

    fn trial_slot_free(&self, inner: &BreakerInner, now: Instant) -> bool {
        match inner.trial_started {
            None => true,
            Some(started) => now >= started + self.config.recovery_timeout(),
        }
    }

    /// How long a refused caller should back off before asking again.
    pub fn retry_after(&self) -> Duration {
        let now = Instant::now();
        let inner = self.lock();
        let until = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => inner.next_attempt_time,
            CircuitState::HalfOpen => inner
                .trial_started
                .map(|started| started + self.config.recovery_timeout()),
        };
        until.map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }

    /// Feed the outcome of an attempted call back into the breaker.
    pub fn record_result(&self, success: bool) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.lock();
            if success {
                inner.failure_count = 0;
                if inner.state == CircuitState::HalfOpen {
                    Self::close(&mut inner)
                } else {
                    None
                }
            } else {
                let window = self.config.monitoring_period();
                if inner.state == CircuitState::Closed && !window.is_zero() {
                    if let Some(last) = inner.last_failure_time {
                        if now.saturating_duration_since(last) > window {
                            inner.failure_count = 0;
                        }
                    }
                }
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(now);

                tracing::trace!(
                    addr = %self.target,
                    failure_count = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    "Recorded failure"
                );

                let (state, failures) = (inner.state, inner.failure_count);
                match state {
                    CircuitState::HalfOpen => self.open(&mut inner, now),
                    CircuitState::Closed if failures >= self.config.failure_threshold => {
                        self.open(&mut inner, now)
                    }
                    _ => None,
                }
            }
        };
        self.announce(transition);
    }

    /// Force the breaker open for a full recovery timeout.
    pub fn open_circuit(&self) {
        let transition = {
            let mut inner = self.lock();
            self.open(&mut inner, Instant::now())
        };
        self.announce(transition);
    }

    /// Return to Closed with cleared counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.failure_count = 0;
            inner.last_failure_time = None;
            Self::close(&mut inner)
        };
        self.announce(transition);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            next_attempt_time: inner.next_attempt_time,
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) -> Option<Transition> {
        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.next_attempt_time = Some(now + self.config.recovery_timeout());
        inner.trial_started = None;
        (from != CircuitState::Open).then_some((from, CircuitState::Open))
    }

    fn close(inner: &mut BreakerInner) -> Option<Transition> {
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.next_attempt_time = None;
        inner.trial_started = None;
        (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
    }

    fn announce(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => tracing::warn!(
                addr = %self.target,
                from = from.as_str(),
                recovery_timeout_ms = self.config.recovery_timeout_ms,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(addr = %self.target, "Circuit breaker half-open")
            }
            CircuitState::Closed => tracing::info!(addr = %self.target, "Circuit breaker closed"),
        }
        metrics::record_circuit_state(&self.target, to);
        self.ctx.emit(ResilienceEvent::CircuitStateChanged {
            target: self.target.clone(),
            from,
            to,
        });
    }
}
