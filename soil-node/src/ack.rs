//! Ack handoff between the link's receive context and the sending task.
//!
//! The receive side holds an [`AckSignal`] (cheap, never blocks); the sender owns the
//! single [`AckWaiter`]. Signals travel over an unbounded queue, so an ack delivered
//! between `arm()` and the end of `wait()` is never lost.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use soil_core::MacAddress;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

/// Bit 48 marks "an address has been recorded"; the low 48 bits hold it.
const PRESENT: u64 = 1 << 48;

fn pack(mac: &MacAddress) -> u64 {
    let b = mac.as_bytes();
    let mut v = PRESENT;
    for (i, byte) in b.iter().enumerate() {
        v |= (*byte as u64) << (8 * (5 - i));
    }
    v
}

fn unpack(v: u64) -> Option<MacAddress> {
    if v & PRESENT == 0 {
        return None;
    }
    let mut b = [0u8; 6];
    for (i, byte) in b.iter_mut().enumerate() {
        *byte = (v >> (8 * (5 - i))) as u8;
    }
    Some(MacAddress::new(b))
}

struct AckShared {
    pending: AtomicBool,
    last_responder: AtomicU64,
}

/// Create the signal/waiter pair for one initialized sender.
pub fn ack_pair() -> (AckSignal, AckWaiter) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(AckShared {
        pending: AtomicBool::new(false),
        last_responder: AtomicU64::new(0),
    });
    (
        AckSignal {
            tx,
            shared: shared.clone(),
        },
        AckWaiter { rx, shared },
    )
}

/// Receive-side handle.
#[derive(Clone)]
pub struct AckSignal {
    tx: mpsc::UnboundedSender<MacAddress>,
    shared: Arc<AckShared>,
}

impl AckSignal {
    /// Record `source` as the last responder and release the waiter.
    pub fn on_ack_received(&self, source: MacAddress) {
        self.shared
            .last_responder
            .store(pack(&source), Ordering::Release);
        if !self.shared.pending.load(Ordering::Acquire) {
            trace!(%source, "ack while no send pending");
        }
        // Closed means the sender shut down; nothing is waiting.
        let _ = self.tx.send(source);
    }
}

/// Result of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    Acked(MacAddress),
    TimedOut,
}

/// Sender-side single-slot waiter.
pub struct AckWaiter {
    rx: mpsc::UnboundedReceiver<MacAddress>,
    shared: Arc<AckShared>,
}

impl AckWaiter {
    /// Forget any queued ack. Call right before each send.
    pub fn arm(&mut self) {
        self.shared.pending.store(false, Ordering::Release);
        while self.rx.try_recv().is_ok() {}
    }

    /// Mark the frame as sent; an ack is now expected.
    pub fn mark_pending(&self) {
        self.shared.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for any ack.
    pub async fn wait(&mut self, timeout: Duration) -> AckWait {
        self.wait_from(timeout, None).await
    }

    /// Wait up to `timeout` for an ack; with `expected` set, acks from other addresses are
    /// skipped (they still update the last responder). A closed queue counts as no ack.
    pub async fn wait_from(&mut self, timeout: Duration, expected: Option<MacAddress>) -> AckWait {
        self.mark_pending();
        let deadline = Instant::now() + timeout;
        let result = loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(source)) => match expected {
                    Some(want) if want != source => {
                        trace!(%source, expected = %want, "ack from unexpected peer");
                        continue;
                    }
                    _ => break AckWait::Acked(source),
                },
                Ok(None) | Err(_) => break AckWait::TimedOut,
            }
        };
        self.shared.pending.store(false, Ordering::Release);
        result
    }

    /// Address of the most recent ack, whether or not anything was waiting for it.
    pub fn last_responder(&self) -> Option<MacAddress> {
        unpack(self.shared.last_responder.load(Ordering::Acquire))
    }
}
