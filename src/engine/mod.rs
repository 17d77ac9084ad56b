//! The protocol engine: cooperating tasks sharing one duplex stream.
//!
//! - `outgoing` - sole writer; drains the priority queue first
//! - `incoming` - sole reader; feeds decoded packets to the logic core
//! - `logic` - single serializer for QoS state, persistence and receipts
//! - `keepalive` - PINGREQ emission and PINGRESP liveness
//!
//! The facade wires these together at Start. Two shutdown signals exist:
//! `stop` lets the outgoing pump flush the priority queue (so DISCONNECT is
//! the last frame written), `force` ends it immediately.

pub(crate) mod incoming;
pub(crate) mod keepalive;
pub(crate) mod logic;
pub(crate) mod outgoing;

use crate::protocol::{PublishPacket, TopicFilter};
use crate::session::CompletionHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An operation accepted by the facade, awaiting the serializer.
pub(crate) enum Submission {
    Publish {
        packet: PublishPacket,
        handle: CompletionHandle,
    },
    Subscribe {
        filters: Vec<TopicFilter>,
        handle: CompletionHandle,
    },
    Unsubscribe {
        topics: Vec<String>,
        handle: CompletionHandle,
    },
}

/// A frame queued for the writer at normal priority.
pub(crate) struct OutboundFrame {
    pub bytes: Vec<u8>,
    /// QoS 0 publishes complete as soon as the bytes are written.
    pub complete_on_write: Option<CompletionHandle>,
}

/// Protocol frames that jump the publish queue.
pub(crate) enum PriorityFrame {
    Frame(Vec<u8>),
    /// Written like any frame, then the writer exits.
    Disconnect(Vec<u8>),
}

/// Last-activity bookkeeping shared between the pumps and keep-alive.
pub(crate) struct Activity {
    last_outbound: Mutex<Instant>,
    last_inbound: Mutex<Instant>,
    ping_outstanding: AtomicBool,
    ping_sent_at: Mutex<Instant>,
}

impl Activity {
    pub(crate) fn new() -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            last_outbound: Mutex::new(now),
            last_inbound: Mutex::new(now),
            ping_outstanding: AtomicBool::new(false),
            ping_sent_at: Mutex::new(now),
        })
    }

    pub(crate) fn touch_outbound(&self) {
        *self.last_outbound.lock() = Instant::now();
    }

    pub(crate) fn touch_inbound(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    pub(crate) fn outbound_idle(&self) -> Duration {
        self.last_outbound.lock().elapsed()
    }

    pub(crate) fn inbound_idle(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }

    pub(crate) fn mark_ping_sent(&self) {
        *self.ping_sent_at.lock() = Instant::now();
        self.ping_outstanding.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_ping(&self) {
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }

    pub(crate) fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn ping_age(&self) -> Duration {
        self.ping_sent_at.lock().elapsed()
    }
}

/// Depth of the normal outbound queue, polled by the drain-aware quiesce.
#[derive(Debug, Default)]
pub(crate) struct QueueDepth(AtomicUsize);

impl QueueDepth {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn incr(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decr(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
