//! Reconnection policy: linear backoff bounded by an attempt ceiling.
//!
//! The decision is a pure function of [`ReconnectState`] so it can be
//! tested without timers; the session supervisor does the sleeping.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    #[serde(with = "crate::config::duration_ms")]
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts_so_far: u32,
    pub enabled: bool,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self {
            attempts_so_far: 0,
            enabled: true,
        }
    }
}

impl ReconnectState {
    /// Caller-initiated disconnect: no further attempts for this session.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// A reconnect succeeded.
    pub fn reset(&mut self) {
        self.attempts_so_far = 0;
    }
}

/// Why the link went away, as far as the policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Retryable: network drop, server close, timeout.
    Transient,
    /// Credentials rejected; retrying cannot help.
    AuthRejected,
}

/// Why the policy stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    Exhausted { attempts: u32 },
    NotRetryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep `delay`, then make attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    GiveUp(GiveUpReason),
    /// Reconnection is disabled; stop quietly.
    Suppressed,
}

impl ReconnectPolicy {
    /// Decide what to do after an unexpected close, recording the attempt.
    pub fn next_action(&self, state: &mut ReconnectState, loss: LossKind) -> ReconnectDecision {
        if !state.enabled {
            return ReconnectDecision::Suppressed;
        }
        if loss == LossKind::AuthRejected {
            return ReconnectDecision::GiveUp(GiveUpReason::NotRetryable);
        }
        if state.attempts_so_far >= self.max_attempts {
            return ReconnectDecision::GiveUp(GiveUpReason::Exhausted {
                attempts: state.attempts_so_far,
            });
        }
        let delay = self.delay_for(state.attempts_so_far);
        state.attempts_so_far += 1;
        ReconnectDecision::Retry {
            attempt: state.attempts_so_far,
            delay,
        }
    }

    /// `base_delay * (attempts_so_far + 1)`.
    pub fn delay_for(&self, attempts_so_far: u32) -> Duration {
        self.base_delay.saturating_mul(attempts_so_far.saturating_add(1))
    }
}
