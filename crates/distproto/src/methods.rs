//! Thin service-method wrappers over [`crate::manager::ConnectionManager`].
//!
//! The orchestrator (§4.D) is generic over request/response payload types;
//! these wrappers just name the methods a distbuild master and worker
//! actually exchange and give them typed request/response shapes, one
//! payload type per method rather than a single message-catalog enum.

use serde::{Deserialize, Serialize};

use crate::manager::{CallOptions, CallOutcome, ConnectionManager};

/// Sent by a worker when it wants to begin participating in a build session
/// hosted by a master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    pub build_id: String,
    pub worker_name: String,
    pub worker_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachResponse {
    pub accepted: bool,
    pub worker_name: String,
}

/// One pip dispatched to a worker for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePipsRequest {
    pub pip_id: u64,
    pub step_index: u32,
    pub fingerprint: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePipsResponse {
    pub pip_id: u64,
    pub exit_code: i32,
    pub output_hashes: Vec<String>,
}

/// Fire-and-forget status notification (build progress, cache hit counts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub event: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyAck;

/// Request the master to begin tracking a newly attached worker (§4.D
/// `call`, method name `"Attach"`).
pub async fn attach(
    manager: &ConnectionManager,
    request: AttachRequest,
    options: CallOptions,
) -> anyhow::Result<CallOutcome<AttachResponse>> {
    manager.call("Attach", request, options).await
}

/// Dispatch one pip for execution on the attached worker.
pub async fn execute_pips(
    manager: &ConnectionManager,
    request: ExecutePipsRequest,
    options: CallOptions,
) -> anyhow::Result<CallOutcome<ExecutePipsResponse>> {
    manager.call("ExecutePips", request, options).await
}

/// Send a best-effort status notification; callers typically pass a small
/// `max_try_count` since notifications are not worth retrying indefinitely.
pub async fn notify(
    manager: &ConnectionManager,
    request: NotifyRequest,
    options: CallOptions,
) -> anyhow::Result<CallOutcome<NotifyAck>> {
    manager.call("Notify", request, options).await
}
