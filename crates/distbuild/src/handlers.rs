//! Demo method handlers registered with the master's [`ServerDispatcher`].
//!
//! These exist to exercise the dispatch path end-to-end; actual pip
//! execution and scheduling are out of scope here (still excluded by the
//! Non-goals this crate inherited), so `ExecutePips` below is a stand-in
//! that always reports success rather than a real executor.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use distproto::methods::{AttachResponse, ExecutePipsResponse, NotifyAck};
use distproto::methods::{AttachRequest, ExecutePipsRequest, NotifyRequest};
use distproto::server::MethodHandler;
use tracing::info;

pub struct AttachHandler {
    attached_workers: AtomicU64,
}

impl AttachHandler {
    pub fn new() -> Self {
        Self {
            attached_workers: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MethodHandler for AttachHandler {
    async fn handle(&self, payload_bytes: &[u8]) -> Result<Vec<u8>> {
        let request: AttachRequest = rmp_serde::from_slice(payload_bytes)?;
        let count = self.attached_workers.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            build_id = %request.build_id,
            worker_name = %request.worker_name,
            capabilities = ?request.worker_capabilities,
            total_attached = count,
            "worker attached",
        );
        let response = AttachResponse {
            accepted: true,
            worker_name: request.worker_name,
        };
        Ok(rmp_serde::to_vec_named(&response)?)
    }
}

/// Stand-in executor: reports every pip as succeeded without running
/// anything. A real scheduler belongs in a future module, not this proxy.
pub struct ExecutePipsHandler;

#[async_trait]
impl MethodHandler for ExecutePipsHandler {
    async fn handle(&self, payload_bytes: &[u8]) -> Result<Vec<u8>> {
        let request: ExecutePipsRequest = rmp_serde::from_slice(payload_bytes)?;
        info!(
            pip_id = request.pip_id,
            step_index = request.step_index,
            fingerprint = %request.fingerprint,
            "dispatched pip (stub executor)",
        );
        let response = ExecutePipsResponse {
            pip_id: request.pip_id,
            exit_code: 0,
            output_hashes: Vec::new(),
        };
        Ok(rmp_serde::to_vec_named(&response)?)
    }
}

pub struct NotifyHandler;

#[async_trait]
impl MethodHandler for NotifyHandler {
    async fn handle(&self, payload_bytes: &[u8]) -> Result<Vec<u8>> {
        let request: NotifyRequest = rmp_serde::from_slice(payload_bytes)?;
        info!(event = %request.event, detail = %request.detail, "worker notification");
        Ok(rmp_serde::to_vec_named(&NotifyAck)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_handler_accepts_and_counts() {
        let handler = AttachHandler::new();
        let request = AttachRequest {
            build_id: "build-1".to_string(),
            worker_name: "worker-a".to_string(),
            worker_capabilities: vec!["execute_pips".to_string()],
        };
        let body = rmp_serde::to_vec_named(&request).unwrap();

        let reply_bytes = handler.handle(&body).await.unwrap();
        let reply: AttachResponse = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert!(reply.accepted);
        assert_eq!(reply.worker_name, "worker-a");
        assert_eq!(handler.attached_workers.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn execute_pips_handler_reports_success() {
        let handler = ExecutePipsHandler;
        let request = ExecutePipsRequest {
            pip_id: 42,
            step_index: 0,
            fingerprint: "abc123".to_string(),
            arguments: vec!["--flag".to_string()],
        };
        let body = rmp_serde::to_vec_named(&request).unwrap();

        let reply_bytes = handler.handle(&body).await.unwrap();
        let reply: ExecutePipsResponse = rmp_serde::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply.pip_id, 42);
        assert_eq!(reply.exit_code, 0);
    }

    #[tokio::test]
    async fn notify_handler_acks() {
        let handler = NotifyHandler;
        let request = NotifyRequest {
            event: "heartbeat_demo".to_string(),
            detail: "still alive".to_string(),
        };
        let body = rmp_serde::to_vec_named(&request).unwrap();

        let reply_bytes = handler.handle(&body).await.unwrap();
        let _: NotifyAck = rmp_serde::from_slice(&reply_bytes).unwrap();
    }
}
