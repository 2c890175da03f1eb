use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use xrhub_core::envelope::Envelope;

/// One end of a bidirectional message channel.
///
/// Posting after either side closes is a no-op; while both ends are alive,
/// envelopes arrive exactly once, in send order.
pub struct Endpoint {
    outbound: mpsc::UnboundedSender<Envelope>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    closed: AtomicBool,
}

impl Endpoint {
    /// Build an endpoint from raw halves. Used by bridges (e.g. the
    /// debug-socket host) whose pump tasks own the remote side.
    pub fn from_parts(
        outbound: mpsc::UnboundedSender<Envelope>,
        inbound: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(Some(inbound)),
            closed: AtomicBool::new(false),
        }
    }

    /// Post an envelope toward the remote endpoint. Returns false once
    /// either side has closed.
    pub fn post(&self, envelope: Envelope) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.outbound.send(envelope).is_ok()
    }

    /// Take the inbound receiver. The owning port's dispatch loop calls
    /// this exactly once.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.inbound.lock().take()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping our receiver makes the remote's posts no-ops.
        self.inbound.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// An in-process transport channel: two paired endpoints.
pub struct MessageChannel;

impl MessageChannel {
    pub fn pair() -> (Endpoint, Endpoint) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Endpoint::from_parts(tx_a, rx_b), Endpoint::from_parts(tx_b, rx_a))
    }
}
