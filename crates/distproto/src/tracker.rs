//! Call Tracker / State Machine (§4.E).
//!
//! Records the ordered state transitions of each call, the duration spent in
//! each state, and the total call duration. This is the component the rest
//! of the orchestrator feeds on every transition; it does not drive
//! behavior itself - §4.D owns that - it only observes and logs it.
//!
//! Generalized from per-entity health tracking (identity, activity/failure
//! counters, a `tracing` event per transition) to one call's state machine
//! per §3.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

/// Per-call state machine (§3). Heartbeat calls additionally use the
/// abbreviated `Heartbeat*` side-track states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Started,
    WaitingForConnection,
    RecreateConnection,
    CompletedWaitForConnection,
    Converting,
    Converted,
    InitiatedRequest,
    Succeeded,
    Failed,
    Canceled,

    HeartbeatBeforeCall,
    HeartbeatAfterCall,
    HeartbeatSuccess,
    HeartbeatAfterActivateConnection,
    HeartbeatTimerInactive,
    HeartbeatQueueTimer,
    HeartbeatDeactivateTimer,
    HeartbeatTimerShutdown,
}

impl CallState {
    /// §7: "state-change verbosity is filtered - by default only Started,
    /// Failed, Succeeded, Cancelled, HeartbeatSuccess,
    /// HeartbeatDeactivateTimer, RecreateConnection are emitted to keep logs
    /// from spamming." This is a pure function of the target state - it
    /// must not depend on verbosity configuration at the caller (Design
    /// Note, §9).
    pub fn is_logged_by_default(self) -> bool {
        matches!(
            self,
            CallState::Started
                | CallState::Failed
                | CallState::Succeeded
                | CallState::Canceled
                | CallState::HeartbeatSuccess
                | CallState::HeartbeatDeactivateTimer
                | CallState::RecreateConnection
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Succeeded
                | CallState::Failed
                | CallState::Canceled
                | CallState::HeartbeatSuccess
                | CallState::HeartbeatTimerInactive
                | CallState::HeartbeatTimerShutdown
        )
    }

    fn label(self) -> &'static str {
        match self {
            CallState::Started => "Started",
            CallState::WaitingForConnection => "WaitingForConnection",
            CallState::RecreateConnection => "RecreateConnection",
            CallState::CompletedWaitForConnection => "CompletedWaitForConnection",
            CallState::Converting => "Converting",
            CallState::Converted => "Converted",
            CallState::InitiatedRequest => "InitiatedRequest",
            CallState::Succeeded => "Succeeded",
            CallState::Failed => "Failed",
            CallState::Canceled => "Canceled",
            CallState::HeartbeatBeforeCall => "HeartbeatBeforeCall",
            CallState::HeartbeatAfterCall => "HeartbeatAfterCall",
            CallState::HeartbeatSuccess => "HeartbeatSuccess",
            CallState::HeartbeatAfterActivateConnection => "HeartbeatAfterActivateConnection",
            CallState::HeartbeatTimerInactive => "HeartbeatTimerInactive",
            CallState::HeartbeatQueueTimer => "HeartbeatQueueTimer",
            CallState::HeartbeatDeactivateTimer => "HeartbeatDeactivateTimer",
            CallState::HeartbeatTimerShutdown => "HeartbeatTimerShutdown",
        }
    }
}

/// One recorded transition: the state entered, when, and how long the
/// previous state lasted.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub state: CallState,
    pub entered_at: Instant,
    pub duration_in_previous_state: Duration,
}

/// Tracks the ordered state transitions of a single call, the call
/// identifier, and the method name - the join key for logs across sender
/// and receiver (§3).
#[derive(Debug)]
pub struct CallTracker {
    call_id: Uuid,
    method: String,
    started_at: Instant,
    last_transition_at: Instant,
    transitions: Vec<Transition>,
}

impl CallTracker {
    pub fn start(call_id: Uuid, method: impl Into<String>) -> Self {
        let now = Instant::now();
        let mut tracker = Self {
            call_id,
            method: method.into(),
            started_at: now,
            last_transition_at: now,
            transitions: Vec::with_capacity(8),
        };
        tracker.record(CallState::Started);
        tracker
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Record a transition into `state`, computing the duration spent in
    /// whatever state preceded it, and emit a structured event keyed by the
    /// call identifier and method name (§7).
    pub fn record(&mut self, state: CallState) {
        let now = Instant::now();
        let duration_in_previous_state = now.duration_since(self.last_transition_at);
        self.last_transition_at = now;
        self.transitions.push(Transition {
            state,
            entered_at: now,
            duration_in_previous_state,
        });

        if state.is_logged_by_default() {
            info!(
                call_id = %self.call_id,
                method = %self.method,
                state = state.label(),
                prior_state_duration_us = duration_in_previous_state.as_micros() as u64,
                "call state transition",
            );
        } else {
            debug!(
                call_id = %self.call_id,
                method = %self.method,
                state = state.label(),
                prior_state_duration_us = duration_in_previous_state.as_micros() as u64,
                "call state transition",
            );
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.last_transition_at.duration_since(self.started_at)
    }

    /// Cumulative time spent between `WaitingForConnection` and
    /// `CompletedWaitForConnection` across all attempts - the
    /// `wait_for_connection` duration surfaced on `CallOutcome::Succeeded`.
    pub fn wait_for_connection_duration(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut waiting_since: Option<Instant> = None;

        for t in &self.transitions {
            match t.state {
                CallState::WaitingForConnection => waiting_since = Some(t.entered_at),
                CallState::CompletedWaitForConnection => {
                    if let Some(start) = waiting_since.take() {
                        total += t.entered_at.duration_since(start);
                    }
                }
                _ => {}
            }
        }
        total
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The ordered sequence of state labels this call passed through - used
    /// by tests asserting event ordering (spec §8 scenario 1).
    pub fn state_sequence(&self) -> Vec<&'static str> {
        self.transitions.iter().map(|t| t.state.label()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence() {
        let mut tracker = CallTracker::start(Uuid::new_v4(), "Echo");
        tracker.record(CallState::WaitingForConnection);
        tracker.record(CallState::CompletedWaitForConnection);
        tracker.record(CallState::InitiatedRequest);
        tracker.record(CallState::Succeeded);

        assert_eq!(
            tracker.state_sequence(),
            vec![
                "Started",
                "WaitingForConnection",
                "CompletedWaitForConnection",
                "InitiatedRequest",
                "Succeeded",
            ]
        );
        assert!(tracker.total_duration() >= Duration::ZERO);
    }

    #[test]
    fn wait_for_connection_is_cumulative_across_retries() {
        let mut tracker = CallTracker::start(Uuid::new_v4(), "Echo");
        tracker.record(CallState::WaitingForConnection);
        std::thread::sleep(Duration::from_millis(2));
        tracker.record(CallState::CompletedWaitForConnection);
        tracker.record(CallState::Started); // retry
        tracker.record(CallState::WaitingForConnection);
        std::thread::sleep(Duration::from_millis(2));
        tracker.record(CallState::CompletedWaitForConnection);

        assert!(tracker.wait_for_connection_duration() >= Duration::from_millis(4));
    }

    #[test]
    fn default_verbosity_filter_matches_spec() {
        assert!(CallState::Started.is_logged_by_default());
        assert!(CallState::Failed.is_logged_by_default());
        assert!(CallState::Succeeded.is_logged_by_default());
        assert!(CallState::Canceled.is_logged_by_default());
        assert!(CallState::HeartbeatSuccess.is_logged_by_default());
        assert!(CallState::HeartbeatDeactivateTimer.is_logged_by_default());
        assert!(CallState::RecreateConnection.is_logged_by_default());

        assert!(!CallState::WaitingForConnection.is_logged_by_default());
        assert!(!CallState::CompletedWaitForConnection.is_logged_by_default());
        assert!(!CallState::Converting.is_logged_by_default());
        assert!(!CallState::InitiatedRequest.is_logged_by_default());
        assert!(!CallState::HeartbeatBeforeCall.is_logged_by_default());
    }

    #[test]
    fn terminal_states() {
        assert!(CallState::Succeeded.is_terminal());
        assert!(CallState::Failed.is_terminal());
        assert!(CallState::Canceled.is_terminal());
        assert!(!CallState::WaitingForConnection.is_terminal());
        assert!(!CallState::Started.is_terminal());
    }
}
