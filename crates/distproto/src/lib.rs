//! distproto - the heartbeat-driven RPC proxy between a distbuild master and
//! its workers.
//!
//! A caller builds a [`manager::ConnectionManager`], calls `start()` once,
//! then issues calls through [`methods`] (or directly through
//! `ConnectionManager::call`). Each call is retried against the connection
//! pool (§4.B) under the heartbeat supervisor's liveness latch (§4.C) until
//! it succeeds, is cancelled, or the manager declares itself shut down or
//! timed out (§4.D/§6). On the receiving side, a [`server::ServerDispatcher`]
//! binds a ROUTER socket and dispatches verified requests to registered
//! [`server::MethodHandler`]s (§4.F).
//!
//! Every call carries a [`envelope::RequestHeader`] (sender identity,
//! build id, payload checksum) wrapped in an [`envelope::Envelope`] and
//! framed on the wire per [`frame`]'s DISTB01 protocol.

pub mod envelope;
pub mod frame;
pub mod heartbeat;
pub mod manager;
pub mod methods;
pub mod pool;
pub mod server;
pub mod socket_config;
pub mod tracker;
pub mod transport;
