//! Server Dispatcher (§4.F).
//!
//! Binds a ROUTER socket, and for each inbound request: extracts the trace
//! identifier and sender header, verifies `build_id` then the payload
//! checksum, invokes the registered application handler, and dispatches the
//! response (or the handler's exception) back to the caller.
//!
//! A receive/dispatch/reply loop over a ROUTER socket, generalized to the
//! two-stage build-id-then-checksum verification §4.F requires before
//! invoking the application handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::frame::Frame;
use crate::manager::{BUILD_ID_MISMATCH_MARKER, CHECKSUM_MISMATCH_MARKER};
use crate::socket_config::{self, ZmqContext};

/// The application-side handler for one registered method. `payload_bytes`
/// is the sender's payload with the header already stripped and verified;
/// the handler never sees `RequestHeader` directly (§4.F step 4: "invokes
/// the application handler").
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, payload_bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Inbound side of the RPC proxy. One dispatcher per bound ROUTER socket.
pub struct ServerDispatcher {
    build_id: String,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl ServerDispatcher {
    pub fn new(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    /// Bind and run the dispatch loop until the socket closes.
    pub async fn serve(self, endpoint: &str) -> Result<()> {
        let ctx = ZmqContext::new();
        let mut socket = socket_config::create_router_and_bind(&ctx, endpoint, "distbuild")?;

        loop {
            let multipart = match socket.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!(error = %e, "router recv error");
                    continue;
                }
                None => return Ok(()),
            };

            let parts: Vec<Bytes> = multipart.into_iter().collect();
            let (identity, frame) = match Frame::from_frames_with_identity(&parts) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "dropping malformed request");
                    continue;
                }
            };

            let reply = if frame.is_heartbeat() {
                Frame::heartbeat(&frame.method, frame.request_id)
            } else {
                self.dispatch_one(&frame).await
            };

            if let Err(e) = socket.send(reply.to_frames_with_identity(&identity).into()).await {
                warn!(error = %e, "router send error");
            }
        }
    }

    async fn dispatch_one(&self, frame: &Frame) -> Frame {
        info!(request_id = %frame.request_id, method = %frame.method, "Received call");
        let started = Instant::now();

        let envelope = match Envelope::decode(&frame.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(request_id = %frame.request_id, error = %e, "malformed request envelope");
                return Frame::exception(frame.request_id, CHECKSUM_MISMATCH_MARKER);
            }
        };

        // §4.F step 2.
        if !envelope.header.matches_build(&self.build_id) {
            warn!(
                request_id = %frame.request_id,
                sender_build_id = %envelope.header.build_id,
                "build-id mismatch",
            );
            return Frame::exception(frame.request_id, BUILD_ID_MISMATCH_MARKER);
        }

        // §4.F step 3.
        if !envelope.header.verify_checksum(&envelope.payload_bytes) {
            warn!(request_id = %frame.request_id, "checksum mismatch");
            return Frame::exception(frame.request_id, CHECKSUM_MISMATCH_MARKER);
        }

        let Some(handler) = self.handlers.get(&frame.method) else {
            warn!(request_id = %frame.request_id, method = %frame.method, "no handler registered");
            return Frame::exception(
                frame.request_id,
                &format!("no handler registered for method {}", frame.method),
            );
        };

        let reply = match handler.handle(&envelope.payload_bytes).await {
            Ok(response_body) => Frame::reply_with_body(frame.request_id, Bytes::from(response_body)),
            Err(e) => Frame::exception(frame.request_id, &e.to_string()),
        };

        info!(
            request_id = %frame.request_id,
            method = %frame.method,
            duration_us = started.elapsed().as_micros() as u64,
            "Handled call",
        );
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RequestHeader;

    struct Echo;
    #[async_trait]
    impl MethodHandler for Echo {
        async fn handle(&self, payload_bytes: &[u8]) -> Result<Vec<u8>> {
            Ok(payload_bytes.to_vec())
        }
    }

    fn make_request(build_id: &str, method: &str) -> Frame {
        let payload_bytes = rmp_serde::to_vec_named(&"hi").unwrap();
        let header = RequestHeader::new("master-1", "sender-a", build_id, &payload_bytes);
        let body = Envelope { header, payload_bytes }.encode();
        Frame::request_with_body(method, uuid::Uuid::new_v4(), bytes::Bytes::from(body))
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler_on_matching_build_id() {
        let mut dispatcher = ServerDispatcher::new("build-1");
        dispatcher.register("Echo", Arc::new(Echo));

        let frame = make_request("build-1", "Echo");
        let reply = dispatcher.dispatch_one(&frame).await;

        assert!(!reply.is_exception());
        let response: String = reply.payload().unwrap();
        assert_eq!(response, "hi");
    }

    #[tokio::test]
    async fn rejects_build_id_mismatch_before_invoking_handler() {
        let mut dispatcher = ServerDispatcher::new("build-1");
        dispatcher.register("Echo", Arc::new(Echo));

        let frame = make_request("build-other", "Echo");
        let reply = dispatcher.dispatch_one(&frame).await;

        assert!(reply.is_exception());
        assert_eq!(reply.exception_message(), Some(BUILD_ID_MISMATCH_MARKER));
    }

    #[tokio::test]
    async fn rejects_checksum_tampering() {
        let mut dispatcher = ServerDispatcher::new("build-1");
        dispatcher.register("Echo", Arc::new(Echo));

        let mut frame = make_request("build-1", "Echo");
        let mut envelope = Envelope::decode(&frame.body).unwrap();
        envelope.payload_bytes = rmp_serde::to_vec_named(&"tampered").unwrap();
        frame.body = bytes::Bytes::from(envelope.encode());

        let reply = dispatcher.dispatch_one(&frame).await;
        assert!(reply.is_exception());
        assert_eq!(reply.exception_message(), Some(CHECKSUM_MISMATCH_MARKER));
    }

    #[tokio::test]
    async fn unregistered_method_returns_exception() {
        let dispatcher = ServerDispatcher::new("build-1");
        let frame = make_request("build-1", "Missing");
        let reply = dispatcher.dispatch_one(&frame).await;
        assert!(reply.is_exception());
    }
}
