//! Core breaker state machine.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{CircuitError, CircuitResult, Refusal};
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};
use crate::policy::{BreakerPolicy, RateThresholdPolicy};
use crate::state::State;
use crate::window::{CallOutcome, SlidingWindow, WindowSnapshot};

/// Mutable breaker state, guarded by a single mutex.
struct BreakerCore {
    state: State,
    window: SlidingWindow,
    last_transition: Instant,
    half_open_admitted: usize,
    half_open_completed: usize,
    // Bumped on every transition; outcomes of calls admitted under an older
    // epoch belong to a finished measurement period.
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: State,
    to: State,
}

type Transitions = SmallVec<[Transition; 2]>;

/// Proof of admission returned by [`Breaker::try_acquire`].
///
/// Hand it back to [`Breaker::on_result`] once the call completed. A permit
/// dropped without an outcome (a cancelled future, a panicking closure) gives
/// its half-open trial slot back and records nothing.
#[must_use = "a permit must be completed with Breaker::on_result"]
pub struct Permit<'a> {
    breaker: &'a Breaker,
    epoch: u64,
    started: Instant,
    settled: bool,
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("circuit", &self.breaker.name)
            .field("epoch", &self.epoch)
            .field("started", &self.started)
            .finish()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.epoch);
        }
    }
}

/// A named OPEN / CLOSED / HALF_OPEN state machine over a count-based window.
///
/// Breakers are meant to be shared: wrap one in an [`Arc`] (the
/// [`CircuitRegistry`](crate::CircuitRegistry) does) and use it from every task
/// that talks to the same backend.
pub struct Breaker {
    name: String,
    config: BreakerConfig,
    policy: Arc<dyn BreakerPolicy>,
    clock: Arc<dyn Clock>,
    core: Mutex<BreakerCore>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Breaker {
    /// Creates a breaker with the default policy, system clock and no metrics.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::builder(name).config(config).build()
    }

    /// Creates a new builder for customizing a breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    /// Name of the breaker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the breaker was built with.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Gets the current state without evaluating pending timers.
    pub fn state(&self) -> State {
        self.core.lock().state
    }

    /// Time elapsed since the last transition.
    pub fn time_in_state(&self) -> Duration {
        let since = self.core.lock().last_transition;
        elapsed_between(since, self.clock.now())
    }

    /// Aggregates of the current measurement period.
    pub fn window_snapshot(&self) -> WindowSnapshot {
        self.core.lock().window.snapshot()
    }

    pub(crate) fn metric_sink(&self) -> &dyn MetricSink {
        self.metric_sink.as_ref()
    }

    /// Asks for admission of one call.
    ///
    /// An open breaker whose cool-down elapsed moves to half-open here and
    /// admits the call as its first trial.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Refusal> {
        self.acquire_for(&self.name)
    }

    /// Records the outcome of an admitted call and returns it.
    ///
    /// The duration is measured from admission to now.
    pub fn on_result(&self, permit: Permit<'_>, succeeded: bool) -> CallOutcome {
        self.complete_for(&self.name, permit, succeeded)
    }

    pub(crate) fn acquire_for(&self, key: &str) -> Result<Permit<'_>, Refusal> {
        let now = self.clock.now();
        let mut transitions = Transitions::new();

        let verdict = {
            let mut core = self.core.lock();
            self.admit(&mut core, now, &mut transitions)
        };

        self.emit(&transitions);

        match verdict {
            Ok(epoch) => Ok(Permit {
                breaker: self,
                epoch,
                started: now,
                settled: false,
            }),
            Err(state) => {
                debug!(circuit = %self.name, state = %state, "call refused");
                self.metric_sink.record_rejection(key, state);
                self.hooks.execute_rejected_hook(&self.name);
                let circuit = self.name.clone();
                Err(match state {
                    State::HalfOpen => Refusal::HalfOpenQuotaExhausted { circuit },
                    State::Open | State::Closed => Refusal::Open { circuit },
                })
            }
        }
    }

    /// Admission decision under the lock. Returns the admitting epoch, or the
    /// state that refused the call.
    fn admit(
        &self,
        core: &mut BreakerCore,
        now: Instant,
        transitions: &mut Transitions,
    ) -> Result<u64, State> {
        if core.state == State::Open {
            if elapsed_between(core.last_transition, now) < self.config.open_state_delay {
                return Err(State::Open);
            }
            transitions.push(self.transition(core, State::HalfOpen, now));
        }

        match core.state {
            State::Closed => Ok(core.epoch),
            State::HalfOpen => {
                if self.half_open_expired(core, now) {
                    transitions.push(self.transition(core, State::Open, now));
                    return Err(State::Open);
                }
                if core.half_open_admitted
                    >= self.config.permitted_number_of_calls_in_half_open_state
                {
                    return Err(State::HalfOpen);
                }
                core.half_open_admitted += 1;
                Ok(core.epoch)
            }
            State::Open => Err(State::Open),
        }
    }

    pub(crate) fn complete_for(
        &self,
        key: &str,
        mut permit: Permit<'_>,
        succeeded: bool,
    ) -> CallOutcome {
        permit.settled = true;
        let now = self.clock.now();
        let outcome = CallOutcome {
            succeeded,
            duration: elapsed_between(permit.started, now),
            timestamp: now,
        };
        let mut transitions = Transitions::new();

        let slow = {
            let mut core = self.core.lock();
            let slow = core.window.is_slow(&outcome);
            if permit.epoch == core.epoch {
                self.record(&mut core, outcome, now, &mut transitions);
            } else {
                debug!(
                    circuit = %self.name,
                    succeeded,
                    "outcome belongs to a previous measurement period, not recorded"
                );
            }
            slow
        };

        debug!(
            circuit = %self.name,
            succeeded,
            slow,
            duration_ms = outcome.duration.as_millis() as u64,
            "call completed"
        );
        self.metric_sink.record_call(key, &outcome, slow);
        self.hooks
            .execute_call_hook(&self.name, succeeded, outcome.duration);
        self.emit(&transitions);

        outcome
    }

    fn record(
        &self,
        core: &mut BreakerCore,
        outcome: CallOutcome,
        now: Instant,
        transitions: &mut Transitions,
    ) {
        core.window.record(outcome);

        match core.state {
            State::Closed => {
                if self.policy.should_trip(&core.window.snapshot()) {
                    transitions.push(self.transition(core, State::Open, now));
                }
            }
            State::HalfOpen => {
                let permitted = self.config.permitted_number_of_calls_in_half_open_state;
                core.half_open_completed += 1;
                if !outcome.succeeded {
                    transitions.push(self.transition(core, State::Open, now));
                } else if core.half_open_completed >= permitted {
                    let to = if self.policy.should_reset(&core.window.snapshot()) {
                        State::Closed
                    } else {
                        State::Open
                    };
                    transitions.push(self.transition(core, to, now));
                } else if self.half_open_expired(core, now) {
                    transitions.push(self.transition(core, State::Open, now));
                }
            }
            // Every transition bumps the epoch, so an open breaker never sees
            // an outcome from its own period.
            State::Open => {}
        }
    }

    /// Returns the trial slot of a permit dropped without an outcome.
    fn abandon(&self, epoch: u64) {
        let mut core = self.core.lock();
        if core.epoch == epoch && core.state == State::HalfOpen {
            core.half_open_admitted = core.half_open_admitted.saturating_sub(1);
        }
        drop(core);
        debug!(circuit = %self.name, "call abandoned without an outcome");
    }

    fn half_open_expired(&self, core: &BreakerCore, now: Instant) -> bool {
        self.config
            .half_open_state_max_delay
            .is_some_and(|max| elapsed_between(core.last_transition, now) >= max)
    }

    fn transition(&self, core: &mut BreakerCore, to: State, now: Instant) -> Transition {
        let from = core.state;
        if to == State::Open {
            let window = core.window.snapshot();
            warn!(
                circuit = %self.name,
                from = %from,
                calls = window.size,
                failure_rate = window.failure_rate,
                slow_call_rate = window.slow_call_rate,
                "circuit opened"
            );
        }
        core.state = to;
        core.last_transition = now;
        core.half_open_admitted = 0;
        core.half_open_completed = 0;
        core.epoch = core.epoch.wrapping_add(1);
        core.window.clear();
        Transition { from, to }
    }

    /// Runs transition side effects. Must be called without holding the core lock.
    fn emit(&self, transitions: &[Transition]) {
        for t in transitions {
            if t.to != State::Open {
                info!(circuit = %self.name, from = %t.from, to = %t.to, "circuit state changed");
            }
            self.metric_sink
                .record_state_transition(&self.name, t.from, t.to);
            self.hooks
                .execute_state_transition_hook(&self.name, t.from, t.to);
        }
    }

    /// Forces the breaker to the open state. Returns false if it already was.
    pub fn force_open(&self) -> bool {
        self.force(State::Open)
    }

    /// Forces the breaker to the closed state. Returns false if it already was.
    pub fn force_closed(&self) -> bool {
        self.force(State::Closed)
    }

    fn force(&self, to: State) -> bool {
        let transition = {
            let mut core = self.core.lock();
            if core.state == to {
                return false;
            }
            self.transition(&mut core, to, self.clock.now())
        };
        warn!(circuit = %self.name, to = %to, "circuit state forced");
        self.emit(&[transition]);
        true
    }

    /// Drops the outcomes of the current measurement period.
    ///
    /// Half-open trial accounting is kept, so a half-open breaker still
    /// finishes after its remaining trials.
    pub fn reset_stats(&self) {
        self.core.lock().window.clear();
    }

    /// Executes a function wrapped by the breaker.
    pub fn call<F, T, E>(&self, f: F) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;
        let result = f();
        self.on_result(permit, result.is_ok());
        result.map_err(CircuitError::Operation)
    }

    /// Executes an async function wrapped by the breaker.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let result = f().await;
        self.on_result(permit, result.is_ok());
        result.map_err(CircuitError::Operation)
    }
}

/// Builder for [`Breaker`].
pub struct BreakerBuilder {
    name: String,
    config: BreakerConfig,
    policy: Option<Arc<dyn BreakerPolicy>>,
    clock: Arc<dyn Clock>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

impl BreakerBuilder {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig::default(),
            policy: None,
            clock: Arc::new(SystemClock),
            metric_sink: Arc::new(NullMetricSink),
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a custom policy. Defaults to [`RateThresholdPolicy`] over the configuration.
    pub fn policy<P: BreakerPolicy>(mut self, policy: P) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets a metric sink.
    pub fn metric_sink<M: MetricSink>(self, sink: M) -> Self {
        self.shared_metric_sink(Arc::new(sink))
    }

    /// Sets a metric sink shared with other breakers.
    pub fn shared_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Sets the hook registry.
    pub fn hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builds the breaker, starting closed.
    pub fn build(self) -> Breaker {
        let policy: Arc<dyn BreakerPolicy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(RateThresholdPolicy::from_config(&self.config)),
        };
        let window = SlidingWindow::new(
            self.config.sliding_window_size,
            self.config.slow_call_duration_threshold,
        );
        let core = BreakerCore {
            state: State::Closed,
            window,
            last_transition: self.clock.now(),
            half_open_admitted: 0,
            half_open_completed: 0,
            epoch: 0,
        };

        debug!(
            circuit = %self.name,
            window = self.config.sliding_window_size,
            minimum_calls = self.config.minimum_number_of_calls,
            failure_rate_threshold = self.config.failure_rate_threshold,
            slow_call_rate_threshold = self.config.slow_call_rate_threshold,
            "breaker created"
        );

        Breaker {
            name: self.name,
            config: self.config,
            policy,
            clock: self.clock,
            core: Mutex::new(core),
            metric_sink: self.metric_sink,
            hooks: self.hooks,
        }
    }
}
