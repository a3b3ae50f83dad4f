//! Transport Facade (§4.A).
//!
//! Owns one outgoing connection and the typed proxy bound to it. The spec
//! describes `begin_request`/`end_request`/`cancel_request` as a
//! split-phase, non-blocking triple; the idiomatic async-Rust shape of that
//! same contract is a single cancel-aware `async fn call`, since `.await`
//! already gives us the suspend/resume the split-phase API was modeling and
//! `tokio_util::sync::CancellationToken` already gives us best-effort abort.
//! `ProxyTransport` is the "dynamic proxy adapter" Design Note: a narrow
//! capability the orchestrator depends on without knowing the transport type.
//!
//! `TmqTransport` below follows the same reactor shape used throughout this
//! codebase for owning a socket: one dedicated task, requests flowing in
//! over an `mpsc` channel, responses routed back through `oneshot` channels
//! keyed by request id, generalized to the wire shape in [`crate::frame`];
//! `socket_config::create_dealer_and_connect` supplies the configured
//! socket.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::frame::Frame;
use crate::socket_config::{self, ZmqContext};

/// Transport-level failures the orchestrator (§4.D) classifies into
/// transient/fatal/cancellation buckets.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("request cancelled")]
    Cancelled,
    #[error("transport is shutting down")]
    ShuttingDown,
    #[error("peer returned an exception: {0}")]
    PeerException(String),
    #[error("malformed reply: {0}")]
    Malformed(#[from] crate::frame::FrameError),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl TransportError {
    /// §4.D step 2's "well-defined network-transport class" - the bucket
    /// that gets deactivate-and-retry rather than propagation to the
    /// caller. Peer exceptions and malformed replies are protocol-level and
    /// not retried here (build-id/checksum mismatches are classified by the
    /// orchestrator from the typed `Frame::Exception`, not by this enum).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout { .. } | TransportError::ShuttingDown
        )
    }
}

/// One in-flight request handed to the reactor task.
struct PendingCall {
    method: String,
    body: Vec<u8>,
    request_id: Uuid,
    traceparent: Option<String>,
    reply_tx: oneshot::Sender<Result<Frame, TransportError>>,
}

enum ReactorCommand {
    Call(PendingCall),
    Shutdown,
}

/// The capability the Call Orchestrator (§4.D) depends on. Implemented by
/// [`TmqTransport`] for production use and by a fake in-process stub in
/// integration tests (spec §8's six end-to-end scenarios).
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// Issue one request and await its reply, honoring `cancel` as a
    /// best-effort abort signal. `method == "Heartbeat"` is the reserved
    /// probe name the Heartbeat Supervisor (§4.C) dispatches against.
    async fn call(
        &self,
        method: &str,
        request_id: Uuid,
        body: Vec<u8>,
        traceparent: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, TransportError>;
}

/// One outgoing DEALER connection, reactor-task-owned per §4.A/§5's "no
/// suspension holds a slot's mutex across I/O other than the (re)connect it
/// guards" - the pool's slot mutex guards only `connect`, never the
/// steady-state request path, because the reactor already serializes
/// socket access internally.
pub struct TmqTransport {
    cmd_tx: mpsc::Sender<ReactorCommand>,
}

impl TmqTransport {
    /// §4.A `connect(host, port)`: dial a DEALER socket and spawn the
    /// reactor task that owns it for the connection's lifetime.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let endpoint = format!("tcp://{host}:{port}");
        let ctx = ZmqContext::new();
        let identity = Uuid::new_v4().simple().to_string();

        let socket = tokio::time::timeout(connect_timeout, async {
            socket_config::create_dealer_and_connect(&ctx, &endpoint, identity.as_bytes(), "distbuild")
        })
        .await
        .map_err(|_| {
            anyhow!(TransportError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout: connect_timeout,
            })
        })?
        .with_context(|| format!("failed to connect to {endpoint}"))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(reactor_task(socket, cmd_rx));

        Ok(Self { cmd_tx })
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ReactorCommand::Shutdown).await;
    }
}

#[async_trait]
impl ProxyTransport for TmqTransport {
    async fn call(
        &self,
        method: &str,
        request_id: Uuid,
        body: Vec<u8>,
        traceparent: Option<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingCall {
            method: method.to_string(),
            body,
            request_id,
            traceparent,
            reply_tx,
        };

        if self.cmd_tx.send(ReactorCommand::Call(pending)).await.is_err() {
            return Err(TransportError::ShuttingDown);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = reply_rx => match result {
                Ok(Ok(frame)) => Ok(frame.body.to_vec()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(TransportError::ShuttingDown),
            },
        }
    }
}

async fn reactor_task<S>(mut socket: S, mut cmd_rx: mpsc::Receiver<ReactorCommand>)
where
    S: socket_config::DealerSocket,
{
    use std::collections::HashMap;

    let mut pending: HashMap<Uuid, oneshot::Sender<Result<Frame, TransportError>>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Call(call)) => {
                        let mut frame = if call.method == crate::manager::HEARTBEAT_METHOD {
                            Frame::heartbeat(&call.method, call.request_id)
                        } else {
                            Frame::request_with_body(
                                &call.method,
                                call.request_id,
                                bytes::Bytes::from(call.body),
                            )
                        };
                        if let Some(tp) = call.traceparent {
                            frame = frame.with_traceparent(tp);
                        }
                        match socket.send(frame.to_frames().into()).await {
                            Ok(()) => {
                                pending.insert(call.request_id, call.reply_tx);
                            }
                            Err(e) => {
                                let _ = call.reply_tx.send(Err(TransportError::Io(anyhow!(e))));
                            }
                        }
                    }
                    Some(ReactorCommand::Shutdown) | None => {
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(TransportError::ShuttingDown));
                        }
                        return;
                    }
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(multipart)) => {
                        let parts: Vec<bytes::Bytes> = multipart.into_iter().collect();
                        match Frame::from_frames(&parts) {
                            Ok(frame) => {
                                if let Some(tx) = pending.remove(&frame.request_id) {
                                    let outcome = if frame.is_exception() {
                                        Err(TransportError::PeerException(
                                            frame.exception_message().unwrap_or("unknown").to_string(),
                                        ))
                                    } else {
                                        Ok(frame)
                                    };
                                    let _ = tx.send(outcome);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed reply frame");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "transport recv error");
                    }
                    None => {
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(TransportError::ShuttingDown));
                        }
                        return;
                    }
                }
            }
        }
    }
}
