//! Call Orchestrator (§4.D) and the manager lifecycle (§3, §6).
//!
//! `ConnectionManager` is the public entry point: `start`/`terminate`/
//! `dispose`/`call`. It owns the connection pool (§4.B), the heartbeat
//! supervisor and liveness latch (§4.C), and drives every call through the
//! retry algorithm in §4.D, recording each transition on a [`CallTracker`]
//! (§4.E).
//!
//! A single struct owns connection state, an event channel, and a
//! background task per managed peer; the retry/heartbeat/cancellation state
//! machine in §4.C/D/E is required to share a single manager-level mutex -
//! here realized as the `watch::Sender<ManagerState>` plus the heartbeat
//! module's own internal mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, RequestHeader, SenderId};
use crate::heartbeat::{HeartbeatProbe, HeartbeatSupervisor, LivenessLatch, ManagerEvent};
use crate::pool::ConnectionPool;
use crate::tracker::{CallState, CallTracker};
use crate::transport::{ProxyTransport, TransportError};

/// §4.F step 2: the well-known exception message the dispatcher raises on a
/// `build_id` mismatch, and the caller-side classification key for it
/// (§4.D: "non-retryable by design").
pub const BUILD_ID_MISMATCH_MARKER: &str = "distbuild.build_id_mismatch";

/// §4.F step 3: the well-known exception message for a checksum mismatch,
/// classified transient at the caller (§4.D: "so the sender retries").
pub const CHECKSUM_MISMATCH_MARKER: &str = "distbuild.checksum_mismatch";

/// Reserved method name the Heartbeat Supervisor (§4.C) dispatches its
/// probe against.
pub const HEARTBEAT_METHOD: &str = "Heartbeat";

/// `Constructed → Started(server,port) → (Active ↔ Inactive)* →
/// {Terminated | TimedOut} → Disposed` (§3). A terminated or timed-out
/// manager fails all subsequent calls with a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Constructed,
    Started,
    Active,
    Inactive,
    Terminated,
    TimedOut,
    Disposed,
}

/// Options for one `call` invocation (§4.D).
pub struct CallOptions {
    pub cancellation_token: CancellationToken,
    /// 0 means "use the manager's configured default" (§4.D).
    pub max_try_count: u32,
    /// `false` for application calls, `true` for the heartbeat probe itself.
    pub allow_inactive: bool,
    /// Application-level retry predicate over the raw reply bytes (e.g. "is
    /// this a checksum-mismatch-shaped response I should treat as
    /// transient").
    pub should_retry: Option<Box<dyn Fn(&[u8]) -> bool + Send + Sync>>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            cancellation_token: CancellationToken::new(),
            max_try_count: 0,
            allow_inactive: false,
            should_retry: None,
        }
    }
}

/// §7 taxonomy, realized as a Rust enum.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Succeeded {
        response: T,
        attempts: u32,
        total_duration: Duration,
        wait_for_connection: Duration,
    },
    Cancelled {
        attempts: u32,
    },
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Shutdown,
    PeerTimedOut,
    BuildIdMismatch,
    ExhaustedRetries(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Shutdown => write!(f, "shutdown"),
            FailureReason::PeerTimedOut => write!(f, "peer timed out"),
            FailureReason::BuildIdMismatch => write!(f, "build-id mismatch"),
            FailureReason::ExhaustedRetries(desc) => write!(f, "exhausted retries: {desc}"),
        }
    }
}

enum LivenessWait {
    Active,
    TimedOut,
    Shutdown,
    Cancelled,
}

/// The Call Orchestrator. See module docs.
pub struct ConnectionManager {
    pool: ConnectionPool,
    latch: Arc<LivenessLatch>,
    supervisor: Arc<HeartbeatSupervisor>,
    shutdown_token: CancellationToken,
    state_tx: watch::Sender<ManagerState>,
    state_rx: watch::Receiver<ManagerState>,
    sender_name: String,
    sender_id: OnceLock<SenderId>,
    build_id: String,
    default_max_try_count: u32,
    outstanding: DashMap<String, AtomicU64>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
    forwarder_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        sender_name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        runtime: &distconf::RuntimeConfig,
    ) -> Arc<Self> {
        let pool = ConnectionPool::new(
            host,
            port,
            runtime.pool_size,
            runtime.connect_timeout(),
            runtime.connection_refresh_timeout(),
        );
        Self::from_pool(sender_name, pool, runtime)
    }

    /// Build a manager around an already-connected transport instead of
    /// dialing one out. `ProxyTransport`'s Design Note calls it a "dynamic
    /// proxy adapter" precisely so a manager doesn't care what's behind it;
    /// this is that seam, used to back a manager with an in-process fake
    /// for the end-to-end scenario tests in `tests/`.
    pub fn new_with_transport(
        sender_name: impl Into<String>,
        transport: Arc<dyn ProxyTransport>,
        runtime: &distconf::RuntimeConfig,
    ) -> Arc<Self> {
        Self::from_pool(sender_name, ConnectionPool::with_transport(transport), runtime)
    }

    fn from_pool(
        sender_name: impl Into<String>,
        pool: ConnectionPool,
        runtime: &distconf::RuntimeConfig,
    ) -> Arc<Self> {
        let latch = Arc::new(LivenessLatch::new());
        let supervisor = HeartbeatSupervisor::new(
            runtime.heartbeat_interval(),
            runtime.inactivity_timeout(),
            latch.clone(),
        );
        let (state_tx, state_rx) = watch::channel(ManagerState::Constructed);

        Arc::new(Self {
            pool,
            latch,
            supervisor,
            shutdown_token: CancellationToken::new(),
            state_tx,
            state_rx,
            sender_name: sender_name.into(),
            sender_id: OnceLock::new(),
            build_id: runtime.build_id.clone(),
            default_max_try_count: runtime.max_try_count,
            outstanding: DashMap::new(),
            heartbeat_handle: Mutex::new(None),
            forwarder_handle: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.supervisor.subscribe()
    }

    /// §6: "must be called exactly once after construction; triggers the
    /// first heartbeat."
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _ = self.state_tx.send(ManagerState::Started);

        let forwarder_events = self.supervisor.subscribe();
        let state_tx = self.state_tx.clone();
        let forwarder = tokio::spawn(forward_events(state_tx, forwarder_events));
        *self.forwarder_handle.lock().await = Some(forwarder);

        let probe: Arc<dyn HeartbeatProbe> = self.clone();
        let supervisor = self.supervisor.clone();
        let shutdown_token = self.shutdown_token.clone();
        let heartbeat = tokio::spawn(async move {
            supervisor.run(probe, shutdown_token).await;
        });
        *self.heartbeat_handle.lock().await = Some(heartbeat);

        Ok(())
    }

    /// §6: "cancels outstanding calls; subsequent calls fail." Idempotent.
    pub fn terminate(&self) {
        if self.state() == ManagerState::TimedOut {
            // Open Question decision (DESIGN.md): TimedOut is terminal,
            // never downgraded back to Terminated.
            self.shutdown_token.cancel();
            return;
        }
        let _ = self.state_tx.send(ManagerState::Terminated);
        self.shutdown_token.cancel();
    }

    /// §6 `dispose()`: terminate + release resources. §8: "Re-dispose of
    /// the manager is a no-op."
    pub async fn dispose(self: Arc<Self>) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.terminate();

        if let Some(handle) = self.heartbeat_handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.forwarder_handle.lock().await.take() {
            handle.abort();
        }
        self.pool.dispose().await;
        let _ = self.state_tx.send(ManagerState::Disposed);
    }

    fn bump_outstanding(&self, method: &str, delta: i64) {
        let counter = self
            .outstanding
            .entry(method.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        if delta >= 0 {
            counter.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            counter.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    /// §8 invariant 1: outstanding-call counts per method converge to zero.
    pub fn outstanding_count(&self, method: &str) -> u64 {
        self.outstanding
            .get(method)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// §3: "Callers for non-heartbeat methods must observe it fulfilled
    /// before proceeding" raced against the manager declaring a terminal
    /// state or the caller cancelling.
    async fn wait_for_liveness(&self, cancel: &CancellationToken) -> LivenessWait {
        let mut state_rx = self.state_rx.clone();
        loop {
            if self.latch.is_active() {
                return LivenessWait::Active;
            }
            match *state_rx.borrow() {
                ManagerState::TimedOut => return LivenessWait::TimedOut,
                ManagerState::Terminated | ManagerState::Disposed => return LivenessWait::Shutdown,
                _ => {}
            }

            let notified = self.latch.notified();
            tokio::pin!(notified);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return LivenessWait::Cancelled,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return LivenessWait::Shutdown;
                    }
                }
                _ = &mut notified => {}
            }
        }
    }

    /// §4.D `call(method, payload, opts) → CallResult`.
    pub async fn call<Req, Resp>(
        &self,
        method: &str,
        payload: Req,
        opts: CallOptions,
    ) -> Result<CallOutcome<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let call_id = Uuid::new_v4();
        let _ = self.sender_id.get_or_init(|| SenderId::derive_from(call_id));
        let mut tracker = CallTracker::start(call_id, method);

        // Step 1: linked cancellation source (caller's token + the
        // manager's shutdown token).
        let linked = self.shutdown_token.child_token();
        {
            let caller = opts.cancellation_token.clone();
            let linked_clone = linked.clone();
            tokio::spawn(async move {
                caller.cancelled().await;
                linked_clone.cancel();
            });
        }

        let max_try_count = if opts.max_try_count == 0 {
            self.default_max_try_count
        } else {
            opts.max_try_count
        };

        self.bump_outstanding(method, 1);
        let mut last_failure_description: Option<String> = None;

        for attempt in 0..max_try_count {
            if attempt > 0 {
                tracker.record(CallState::Started);
                tokio::task::yield_now().await;
            }
            tracker.record(CallState::WaitingForConnection);

            if !opts.allow_inactive {
                match self.wait_for_liveness(&linked).await {
                    LivenessWait::Active => {}
                    LivenessWait::TimedOut => {
                        self.bump_outstanding(method, -1);
                        return Ok(CallOutcome::Failed(FailureReason::PeerTimedOut));
                    }
                    LivenessWait::Shutdown => {
                        self.bump_outstanding(method, -1);
                        return Ok(CallOutcome::Failed(FailureReason::Shutdown));
                    }
                    LivenessWait::Cancelled => {
                        tracker.record(CallState::Canceled);
                        self.bump_outstanding(method, -1);
                        return Ok(CallOutcome::Cancelled { attempts: attempt + 1 });
                    }
                }
            }

            let slot = match self.pool.acquire().await {
                Ok(slot) => slot,
                Err(e) => {
                    if opts.allow_inactive {
                        // §4.D: "for a heartbeat-style allow-inactive call
                        // with no slot, continue the loop."
                        last_failure_description = Some(e.to_string());
                        continue;
                    }
                    self.bump_outstanding(method, -1);
                    tracker.record(CallState::Failed);
                    return Ok(CallOutcome::Failed(FailureReason::ExhaustedRetries(e.to_string())));
                }
            };

            tracker.record(CallState::CompletedWaitForConnection);
            tracker.record(CallState::InitiatedRequest);

            let sender_id = self
                .sender_id
                .get()
                .expect("sender_id initialized above")
                .to_string();
            let payload_bytes = rmp_serde::to_vec_named(&payload)?;
            let header = RequestHeader::new(
                self.sender_name.clone(),
                sender_id,
                self.build_id.clone(),
                &payload_bytes,
            );
            let body = Envelope { header, payload_bytes }.encode();
            let traceparent = call_id.hyphenated().to_string();

            let outcome = slot
                .transport
                .call(method, call_id, body, Some(traceparent), linked.clone())
                .await;

            match outcome {
                Ok(response_bytes) => {
                    let wants_retry = opts
                        .should_retry
                        .as_ref()
                        .map(|predicate| predicate(&response_bytes))
                        .unwrap_or(false);
                    if wants_retry {
                        last_failure_description = Some("should_retry predicate requested retry".to_string());
                        continue;
                    }

                    // The heartbeat probe's reply carries no body (§4.C: "a
                    // probe call" with nothing to decode) - msgpack has no
                    // zero-byte encoding for `()`, so substitute the nil
                    // marker a real `rmp_serde::to_vec_named(&())` would have
                    // produced before decoding.
                    let response: Resp = if response_bytes.is_empty() {
                        rmp_serde::from_slice(&[0xc0])?
                    } else {
                        rmp_serde::from_slice(&response_bytes)?
                    };
                    slot.mark_success().await;
                    self.latch.fulfill();
                    tracker.record(CallState::Succeeded);
                    self.bump_outstanding(method, -1);
                    return Ok(CallOutcome::Succeeded {
                        response,
                        attempts: attempt + 1,
                        total_duration: tracker.total_duration(),
                        wait_for_connection: tracker.wait_for_connection_duration(),
                    });
                }
                Err(TransportError::Cancelled) => {
                    tracker.record(CallState::Canceled);
                    self.bump_outstanding(method, -1);
                    return Ok(CallOutcome::Cancelled { attempts: attempt + 1 });
                }
                Err(TransportError::ShuttingDown) => {
                    tracker.record(CallState::Failed);
                    self.bump_outstanding(method, -1);
                    return Ok(CallOutcome::Failed(FailureReason::Shutdown));
                }
                Err(TransportError::PeerException(message)) if message == BUILD_ID_MISMATCH_MARKER => {
                    self.supervisor.emit(ManagerEvent::ConnectionTimeout);
                    tracker.record(CallState::Failed);
                    self.bump_outstanding(method, -1);
                    return Ok(CallOutcome::Failed(FailureReason::BuildIdMismatch));
                }
                Err(TransportError::PeerException(message)) if message == CHECKSUM_MISMATCH_MARKER => {
                    slot.mark_dirty();
                    self.latch.reset();
                    self.supervisor.emit(ManagerEvent::DeactivateConnection);
                    warn!(call_id = %call_id, method, "Failed Bond RPC call (checksum mismatch)");
                    tracker.record(CallState::Failed);
                    last_failure_description = Some(message);
                    continue;
                }
                Err(e) if e.is_transient() => {
                    slot.mark_dirty();
                    self.latch.reset();
                    self.supervisor.emit(ManagerEvent::DeactivateConnection);
                    warn!(call_id = %call_id, method, error = %e, "Failed Bond RPC call");
                    tracker.record(CallState::Failed);
                    last_failure_description = Some(e.to_string());
                    continue;
                }
                Err(e) => {
                    // Fatal otherwise: propagate to the caller unchanged.
                    self.bump_outstanding(method, -1);
                    return Err(anyhow!(e));
                }
            }
        }

        self.bump_outstanding(method, -1);
        tracker.record(CallState::Failed);
        info!(call_id = %call_id, method, attempts = max_try_count, "exhausted retries");
        Ok(CallOutcome::Failed(FailureReason::ExhaustedRetries(
            last_failure_description.unwrap_or_else(|| "no attempts succeeded".to_string()),
        )))
    }
}

async fn forward_events(state_tx: watch::Sender<ManagerState>, mut events: broadcast::Receiver<ManagerEvent>) {
    loop {
        match events.recv().await {
            Ok(ManagerEvent::ActivateConnection) => {
                let _ = state_tx.send(ManagerState::Active);
            }
            Ok(ManagerEvent::DeactivateConnection) => {
                let _ = state_tx.send(ManagerState::Inactive);
            }
            Ok(ManagerEvent::ConnectionTimeout) => {
                let _ = state_tx.send(ManagerState::TimedOut);
                // §9 Open Question decision: TimedOut is terminal.
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "event forwarder lagged, continuing");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[async_trait]
impl HeartbeatProbe for ConnectionManager {
    async fn probe(&self, cancel: CancellationToken) -> bool {
        let opts = CallOptions {
            cancellation_token: cancel,
            max_try_count: 1,
            allow_inactive: true,
            should_retry: None,
        };
        matches!(
            self.call::<(), ()>(HEARTBEAT_METHOD, (), opts).await,
            Ok(CallOutcome::Succeeded { .. })
        )
    }
}
