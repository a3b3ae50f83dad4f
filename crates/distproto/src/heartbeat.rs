//! Heartbeat Supervisor (§4.C) and the Liveness Latch (§3, GLOSSARY).
//!
//! The supervisor is a dedicated timer task firing one probe call per tick
//! against a reserved method name; the latch is the single-shot signal that
//! gates every non-heartbeat call until at least one probe has succeeded
//! since the manager last deactivated.
//!
//! Generalized from a simple `is_active`/timestamp pair guarded by a mutex
//! into the formal latch + supervisor split §4 calls for, and the Design
//! Note "Shared latch pattern" (§9): a mutex-protected flag plus a wake-all
//! primitive, never exposed directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::manager::HEARTBEAT_METHOD;
use crate::tracker::{CallState, CallTracker};

/// Events fired from internal tasks (§6); handlers must not block, so these
/// are delivered over a `broadcast` channel rather than invoked as callbacks
/// (teacher precedent: `zmq/manager.rs`'s `mpsc` event channel, generalized
/// to broadcast since §6 allows multiple subscribers).
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    ActivateConnection,
    DeactivateConnection,
    ConnectionTimeout,
}

/// A single-shot broadcast signal (GLOSSARY: "Liveness Latch"). Reset when
/// the manager deactivates, fulfilled when a heartbeat succeeds. Internal
/// representation only - never exposed outside this module (Design Note
/// "Shared latch pattern").
pub struct LivenessLatch {
    active: AtomicBool,
    notify: Notify,
}

impl LivenessLatch {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn fulfill(&self) {
        self.active.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn reset(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Exposes the raw `Notify` wait for callers (namely
    /// `ConnectionManager::wait_for_liveness`) that need to race the latch
    /// against other futures directly rather than through
    /// [`Self::wait_for_active`]'s self-contained loop.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// §3: "Callers for non-heartbeat methods must observe it fulfilled
    /// before proceeding." Returns `true` once fulfilled, `false` if
    /// `cancel` fires first (§5: "modeled as a race between the latch and a
    /// cancel-delay").
    pub async fn wait_for_active(&self, cancel: &CancellationToken) -> bool {
        if self.is_active() {
            return true;
        }
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = &mut notified => {
                    if self.is_active() {
                        return true;
                    }
                    // Spurious wake (e.g. a reset raced the notify) - loop again.
                }
            }
        }
    }
}

impl Default for LivenessLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutex-guarded heartbeat bookkeeping (§5: "guarded by a single
/// manager-level mutex; reads that only matter for fast-path checks... may
/// be unsynchronized, but all latch resets, signals, and timer reschedules
/// happen under the mutex").
pub struct HeartbeatState {
    pub last_successful_heartbeat: Instant,
    pub exceeded_inactivity_timeout: bool,
    pub is_shutting_down: bool,
}

impl HeartbeatState {
    fn new() -> Self {
        Self {
            last_successful_heartbeat: Instant::now(),
            exceeded_inactivity_timeout: false,
            is_shutting_down: false,
        }
    }
}

/// Capability the supervisor dispatches its probe through - implemented by
/// `ConnectionManager` in `manager.rs`. Kept as a trait here (rather than
/// importing `ConnectionManager` directly) to avoid a dependency cycle
/// between `heartbeat` and `manager`.
#[async_trait]
pub trait HeartbeatProbe: Send + Sync {
    /// Dispatch one probe call against the reserved heartbeat method,
    /// `allow_inactive=true`, `max_try_count=1` (§4.C) - the supervisor
    /// alone governs retry cadence for the probe, so the orchestrator must
    /// not retry it internally.
    async fn probe(&self, cancel: CancellationToken) -> bool;
}

/// Outcome of a single tick, reported back to the supervisor loop for
/// rescheduling decisions.
enum TickOutcome {
    Rescheduled,
    TimedOut,
    ShuttingDown,
}

pub struct HeartbeatSupervisor {
    interval: Duration,
    inactivity_timeout: Duration,
    state: Mutex<HeartbeatState>,
    latch: Arc<LivenessLatch>,
    events: broadcast::Sender<ManagerEvent>,
}

impl HeartbeatSupervisor {
    pub fn new(interval: Duration, inactivity_timeout: Duration, latch: Arc<LivenessLatch>) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(64);
        Arc::new(Self {
            interval,
            inactivity_timeout,
            state: Mutex::new(HeartbeatState::new()),
            latch,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.is_shutting_down
    }

    pub async fn exceeded_inactivity_timeout(&self) -> bool {
        self.state.lock().await.exceeded_inactivity_timeout
    }

    /// Inject an event from outside the timer loop - the orchestrator uses
    /// this to report a transport-observed failure (§4.D) immediately,
    /// rather than waiting for the next scheduled tick to notice it.
    pub fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    /// §4.C: the supervisor loop. Runs until `shutdown_token` fires or the
    /// manager declares `TimedOut` (terminal - no reschedule, per the Open
    /// Question decision in DESIGN.md: "once TimedOut is entered, stay
    /// terminal").
    pub async fn run(
        self: Arc<Self>,
        probe: Arc<dyn HeartbeatProbe>,
        shutdown_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => {
                    let mut state = self.state.lock().await;
                    state.is_shutting_down = true;
                    drop(state);
                    let mut tracker = CallTracker::start(Uuid::new_v4(), HEARTBEAT_METHOD);
                    tracker.record(CallState::HeartbeatTimerShutdown);
                    debug!("heartbeat supervisor observed shutdown");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.tick(probe.clone(), shutdown_token.clone()).await {
                        TickOutcome::Rescheduled => continue,
                        TickOutcome::TimedOut | TickOutcome::ShuttingDown => return,
                    }
                }
            }
        }
    }

    async fn tick(&self, probe: Arc<dyn HeartbeatProbe>, shutdown_token: CancellationToken) -> TickOutcome {
        let mut tracker = CallTracker::start(Uuid::new_v4(), HEARTBEAT_METHOD);
        tracker.record(CallState::HeartbeatBeforeCall);
        let succeeded = probe.probe(shutdown_token.child_token()).await;
        tracker.record(CallState::HeartbeatAfterCall);

        if succeeded {
            let mut state = self.state.lock().await;
            state.last_successful_heartbeat = Instant::now();
            // §9 Open Question: heartbeat success sets the latch even when
            // `exceeded_inactivity_timeout` was already set, but per the
            // spec's own recommendation we treat `TimedOut` as terminal -
            // a supervisor that already declared timeout never ticks again
            // (this branch only runs pre-timeout), so this assignment is
            // reachable only on the non-terminal path.
            state.exceeded_inactivity_timeout = false;
            drop(state);

            self.latch.fulfill();
            let _ = self.events.send(ManagerEvent::ActivateConnection);
            tracker.record(CallState::HeartbeatSuccess);
            tracker.record(CallState::HeartbeatAfterActivateConnection);
            tracker.record(CallState::HeartbeatQueueTimer);
            TickOutcome::Rescheduled
        } else {
            let elapsed_since_success = {
                let state = self.state.lock().await;
                state.last_successful_heartbeat.elapsed()
            };
            tracker.record(CallState::HeartbeatTimerInactive);

            if elapsed_since_success > self.inactivity_timeout {
                let mut state = self.state.lock().await;
                state.exceeded_inactivity_timeout = true;
                drop(state);

                self.latch.reset();
                let _ = self.events.send(ManagerEvent::ConnectionTimeout);
                warn!(
                    elapsed_secs = elapsed_since_success.as_secs(),
                    "inactivity timeout exceeded, declaring peer unreachable",
                );
                tracker.record(CallState::HeartbeatDeactivateTimer);
                TickOutcome::TimedOut
            } else {
                debug!("heartbeat probe failed, rescheduling");
                tracker.record(CallState::HeartbeatQueueTimer);
                TickOutcome::Rescheduled
            }
        }
    }
}
