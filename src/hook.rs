//! Hook registry for breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

type HookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type CallHookFn = Arc<dyn Fn(&str, Duration) + Send + Sync + 'static>;
type TransitionHookFn = Arc<dyn Fn(&str, State, State) + Send + Sync + 'static>;

/// Callbacks fired by a breaker. Every hook receives the breaker name.
///
/// Hooks run after the breaker released its internal lock, so they may query
/// the breaker but should stay cheap: they run on the caller's task.
#[derive(Default)]
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_state_change: RwLock<Option<TransitionHookFn>>,
    on_success: RwLock<Option<CallHookFn>>,
    on_failure: RwLock<Option<CallHookFn>>,
    on_rejected: RwLock<Option<HookFn>>,
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook to call when the breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call on every transition, with the old and new state.
    pub fn set_on_state_change<F>(&self, f: F)
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        *self.on_state_change.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when an admitted call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when an admitted call fails.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call is refused.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    pub(crate) fn execute_state_transition_hook(&self, name: &str, from: State, to: State) {
        let specific = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        if let Some(hook) = specific.read().as_ref() {
            hook(name);
        }
        if let Some(hook) = self.on_state_change.read().as_ref() {
            hook(name, from, to);
        }
    }

    pub(crate) fn execute_call_hook(&self, name: &str, succeeded: bool, duration: Duration) {
        let slot = if succeeded {
            &self.on_success
        } else {
            &self.on_failure
        };
        if let Some(hook) = slot.read().as_ref() {
            hook(name, duration);
        }
    }

    pub(crate) fn execute_rejected_hook(&self, name: &str) {
        if let Some(hook) = self.on_rejected.read().as_ref() {
            hook(name);
        }
    }
}
