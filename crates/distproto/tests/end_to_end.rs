//! End-to-end scenarios from spec §8, driven against an in-process fake
//! transport rather than a real ZMQ socket. `ConnectionManager::new_with_transport`
//! is the seam that makes this possible - see its doc comment in
//! `src/manager.rs`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use distproto::manager::{
    CallOptions, CallOutcome, ConnectionManager, FailureReason, BUILD_ID_MISMATCH_MARKER,
};
use distproto::transport::{ProxyTransport, TransportError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One scripted response for a single `call()` invocation against a given
/// method, as seen by the fake transport.
#[derive(Clone)]
enum Step {
    Success(Vec<u8>),
    /// §4.D's "well-defined network-transport class" - deactivates the slot
    /// and retries.
    Transient,
    BuildIdMismatch,
}

struct MethodPlan {
    queue: VecDeque<Step>,
    sticky: Step,
}

/// A fake [`ProxyTransport`] scripted per method name: each call to a method
/// pops the next queued [`Step`], repeating the last queued step forever
/// once the queue drains.
struct FakeTransport {
    plans: Mutex<HashMap<String, MethodPlan>>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(HashMap::new()),
        })
    }

    async fn plan(&self, method: &str, steps: Vec<Step>) {
        let sticky = steps.last().cloned().unwrap_or(Step::Success(Vec::new()));
        self.plans.lock().await.insert(
            method.to_string(),
            MethodPlan {
                queue: steps.into(),
                sticky,
            },
        );
    }
}

#[async_trait]
impl ProxyTransport for FakeTransport {
    async fn call(
        &self,
        method: &str,
        _request_id: Uuid,
        _body: Vec<u8>,
        _traceparent: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let step = {
            let mut plans = self.plans.lock().await;
            match plans.get_mut(method) {
                Some(plan) => plan.queue.pop_front().unwrap_or_else(|| plan.sticky.clone()),
                None => panic!("end-to-end test issued an unplanned call to {method}"),
            }
        };

        match step {
            Step::Success(bytes) => Ok(bytes),
            Step::Transient => Err(TransportError::ConnectTimeout {
                endpoint: "fake".to_string(),
                timeout: Duration::from_millis(1),
            }),
            Step::BuildIdMismatch => Err(TransportError::PeerException(
                BUILD_ID_MISMATCH_MARKER.to_string(),
            )),
        }
    }
}

fn unit_bytes() -> Vec<u8> {
    rmp_serde::to_vec_named(&()).unwrap()
}

fn string_bytes(s: &str) -> Vec<u8> {
    rmp_serde::to_vec_named(&s.to_string()).unwrap()
}

/// A `RuntimeConfig` with a zero-second heartbeat interval so the
/// supervisor's first tick fires essentially immediately - `RuntimeConfig`
/// only expresses these tunables at whole-second granularity, which is
/// coarse but sufficient since these tests only care about tick *ordering*,
/// not real elapsed time.
fn fast_runtime() -> distconf::RuntimeConfig {
    let mut runtime = distconf::RuntimeConfig::default();
    runtime.heartbeat_interval_secs = 0;
    runtime
}

/// Scenario 1 (§8): "Happy call." Heartbeat and the application method both
/// succeed; one call should return `Succeeded` on the first attempt.
#[tokio::test]
async fn happy_call_succeeds_on_first_attempt() {
    let transport = FakeTransport::new();
    transport.plan("Heartbeat", vec![Step::Success(unit_bytes())]).await;
    transport.plan("Echo", vec![Step::Success(string_bytes("hi"))]).await;

    let runtime = fast_runtime();
    let manager = ConnectionManager::new_with_transport("master-1", transport, &runtime);
    manager.start().await.unwrap();

    // Give the first heartbeat tick time to land and fulfill the latch.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = manager
        .call::<String, String>("Echo", "hi".to_string(), CallOptions::default())
        .await
        .unwrap();

    match outcome {
        CallOutcome::Succeeded {
            response,
            attempts,
            total_duration,
            wait_for_connection,
        } => {
            assert_eq!(response, "hi");
            assert_eq!(attempts, 1);
            assert!(total_duration > Duration::ZERO);
            // `wait_for_connection` may legitimately be very small once the
            // latch is already fulfilled, but it is always recorded.
            let _ = wait_for_connection;
        }
        other => panic!("expected Succeeded, got {other:?}"),
    }

    manager.dispose().await;
}

/// Scenario 2 (§8): "Transient then recover." Three transient failures then
/// a success; expect `Succeeded` with `attempts=4`.
#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let transport = FakeTransport::new();
    transport.plan("Heartbeat", vec![Step::Success(unit_bytes())]).await;
    transport
        .plan(
            "Echo",
            vec![
                Step::Transient,
                Step::Transient,
                Step::Transient,
                Step::Success(string_bytes("recovered")),
            ],
        )
        .await;

    let runtime = fast_runtime();
    let manager = ConnectionManager::new_with_transport("master-1", transport, &runtime);
    manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = manager
        .call::<String, String>("Echo", "hi".to_string(), CallOptions::default())
        .await
        .unwrap();

    match outcome {
        CallOutcome::Succeeded { response, attempts, .. } => {
            assert_eq!(response, "recovered");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected Succeeded after retries, got {other:?}"),
    }

    manager.dispose().await;
}

/// Scenario 3 (§8): "Inactivity timeout." Heartbeats fail continuously; once
/// `inactivity_timeout` elapses, an in-flight call unblocks with
/// `Failed(PeerTimedOut)` without ever touching the transport.
#[tokio::test]
async fn inactivity_timeout_fails_blocked_calls() {
    let transport = FakeTransport::new();
    transport.plan("Heartbeat", vec![Step::Transient]).await;

    let mut runtime = distconf::RuntimeConfig::default();
    runtime.heartbeat_interval_secs = 0;
    runtime.inactivity_timeout_secs = 0;
    let manager = ConnectionManager::new_with_transport("master-1", transport, &runtime);
    manager.start().await.unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        manager.call::<String, String>("Echo", "hi".to_string(), CallOptions::default()),
    )
    .await
    .expect("call should resolve once inactivity timeout fires")
    .unwrap();

    match outcome {
        CallOutcome::Failed(FailureReason::PeerTimedOut) => {}
        other => panic!("expected Failed(PeerTimedOut), got {other:?}"),
    }

    manager.dispose().await;
}

/// Scenario 4 (§8): "Build-id mismatch." The peer rejects the call with the
/// build-id-mismatch marker; expect a single non-retried `Failed`.
#[tokio::test]
async fn build_id_mismatch_fails_without_retry() {
    let transport = FakeTransport::new();
    transport.plan("Heartbeat", vec![Step::Success(unit_bytes())]).await;
    transport.plan("Echo", vec![Step::BuildIdMismatch]).await;

    let runtime = fast_runtime();
    let manager = ConnectionManager::new_with_transport("master-1", transport, &runtime);
    manager.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = manager
        .call::<String, String>("Echo", "hi".to_string(), CallOptions::default())
        .await
        .unwrap();

    match outcome {
        CallOutcome::Failed(FailureReason::BuildIdMismatch) => {}
        other => panic!("expected Failed(BuildIdMismatch), got {other:?}"),
    }

    manager.dispose().await;
}

/// Scenario 5 (§8): "Cancellation mid-wait." A caller cancels its token
/// while blocked on the liveness latch; expect `Cancelled` with no transport
/// call ever issued (the fake would panic on an unplanned "Echo" call).
#[tokio::test]
async fn cancellation_while_waiting_for_liveness_short_circuits() {
    let transport = FakeTransport::new();
    transport.plan("Heartbeat", vec![Step::Transient]).await;

    let mut runtime = fast_runtime();
    runtime.heartbeat_interval_secs = 1; // heartbeat tick won't land before the cancel below
    let manager = ConnectionManager::new_with_transport("master-1", transport, &runtime);
    manager.start().await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = manager
        .call::<String, String>(
            "Echo",
            "hi".to_string(),
            CallOptions {
                cancellation_token: cancel,
                ..CallOptions::default()
            },
        )
        .await
        .unwrap();

    match outcome {
        CallOutcome::Cancelled { attempts } => assert_eq!(attempts, 1),
        other => panic!("expected Cancelled, got {other:?}"),
    }

    manager.dispose().await;
}
