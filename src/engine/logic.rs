//! The logic core: single serializer of protocol state.
//!
//! Every mutation of the in-flight tables, the store, the receipt registry
//! and the identifier allocator happens on this task. It consumes decoded
//! inbound packets, outbound submissions from the facade, and errors from
//! the other activities; handling order is first-come.
//!
//! Outbound phase is persisted through the stored packet type: a QoS 2
//! publish waiting for PUBCOMP has its PUBLISH frame replaced by the PUBREL
//! frame under the same `o:<id>` key, which is what resume replays.

use super::{OutboundFrame, PriorityFrame, Submission};
use crate::error::ClientError;
use crate::protocol::{ControlPacket, PublishPacket, Qos, SubscribePacket, UnsubscribePacket};
use crate::routing::TopicRouter;
use crate::session::{CompletionHandle, MsgIdAllocator, Receipt, ReceiptRegistry};
use crate::store::{self, Store};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Delivery phase of an outbound QoS >= 1 publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboundPhase {
    WaitPubAck,
    WaitPubRec,
    WaitPubComp,
}

pub(crate) struct LogicCore {
    store: Arc<dyn Store>,
    allocator: MsgIdAllocator,
    receipts: ReceiptRegistry,
    /// Outbound QoS >= 1 publishes by packet id.
    outbound: HashMap<u16, OutboundPhase>,
    /// SUBSCRIBE/UNSUBSCRIBE exchanges by packet id.
    pending_control: HashSet<u16>,
    /// Inbound QoS 2 ids between PUBLISH and PUBREL.
    inbound: HashSet<u16>,
    router: Arc<TopicRouter>,
    out_tx: mpsc::UnboundedSender<OutboundFrame>,
    prio_tx: mpsc::UnboundedSender<PriorityFrame>,
    depth: Arc<super::QueueDepth>,
    activity: Arc<super::Activity>,
    connected: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    force_tx: watch::Sender<bool>,
}

impl LogicCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn Store>,
        router: Arc<TopicRouter>,
        out_tx: mpsc::UnboundedSender<OutboundFrame>,
        prio_tx: mpsc::UnboundedSender<PriorityFrame>,
        depth: Arc<super::QueueDepth>,
        activity: Arc<super::Activity>,
        connected: Arc<AtomicBool>,
        stop_tx: watch::Sender<bool>,
        force_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            store,
            allocator: MsgIdAllocator::new(),
            receipts: ReceiptRegistry::new(),
            outbound: HashMap::new(),
            pending_control: HashSet::new(),
            inbound: HashSet::new(),
            router,
            out_tx,
            prio_tx,
            depth,
            activity,
            connected,
            stop_tx,
            force_tx,
        }
    }

    /// Replay persisted in-flight state. Runs before the incoming pump
    /// starts, so resumed frames are queued ahead of any new inbound.
    pub(crate) fn resume(&mut self) -> Vec<Receipt> {
        let keys = match self.store.all() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "store enumeration failed; resuming empty");
                return Vec::new();
            }
        };

        let mut receipts = Vec::new();
        for key in keys {
            let Some((direction, packet_id)) = store::parse_key(&key) else {
                tracing::warn!(key = %key, "ignoring unrecognized store key");
                continue;
            };
            match direction {
                store::Direction::Inbound => {
                    // Still waiting for the broker's PUBREL; nothing to
                    // send. Inbound ids live in the broker's id space and
                    // never touch the outbound allocator.
                    self.inbound.insert(packet_id);
                }
                store::Direction::Outbound => {
                    let frame = match self.store.get(&key) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::error!(key = %key, error = %err, "store read failed at resume");
                            continue;
                        }
                    };
                    match ControlPacket::decode(&frame) {
                        Ok(ControlPacket::Publish(mut publish)) => {
                            publish.dup = true;
                            let phase = match publish.qos {
                                Qos::AtLeastOnce => OutboundPhase::WaitPubAck,
                                Qos::ExactlyOnce => OutboundPhase::WaitPubRec,
                                Qos::AtMostOnce => {
                                    tracing::warn!(key = %key, "dropping persisted QoS 0 publish");
                                    self.store_del(&key);
                                    continue;
                                }
                            };
                            self.allocator.rehydrate([packet_id]);
                            self.outbound.insert(packet_id, phase);
                            let (receipt, handle) = Receipt::pair();
                            self.receipts.register(packet_id, handle);
                            self.send_frame(ControlPacket::Publish(publish).encode(), None);
                            receipts.push(receipt);
                        }
                        Ok(ControlPacket::PubRel(id)) => {
                            self.allocator.rehydrate([id]);
                            self.outbound.insert(id, OutboundPhase::WaitPubComp);
                            let (receipt, handle) = Receipt::pair();
                            self.receipts.register(id, handle);
                            // PUBREL is a priority packet wherever it is
                            // emitted; the resend must not queue behind
                            // publishes or a racing DISCONNECT.
                            self.send_priority(ControlPacket::PubRel(id));
                            receipts.push(receipt);
                        }
                        Ok(other) => {
                            tracing::warn!(key = %key, packet = other.label(), "unexpected persisted packet");
                            self.store_del(&key);
                        }
                        Err(err) => {
                            tracing::warn!(key = %key, error = %err, "corrupt persisted frame dropped");
                            self.store_del(&key);
                        }
                    }
                }
            }
        }
        if !receipts.is_empty() {
            tracing::info!(count = receipts.len(), "resumed in-flight messages");
        }
        receipts
    }

    pub(crate) async fn run(
        mut self,
        mut submit_rx: mpsc::Receiver<Submission>,
        mut ibound_rx: mpsc::Receiver<ControlPacket>,
        mut err_rx: mpsc::UnboundedReceiver<ClientError>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *stop_rx.borrow() {
                self.receipts.cancel_all(&ClientError::NotConnected);
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => {}
                Some(err) = err_rx.recv() => {
                    self.fatal(err);
                    break;
                }
                Some(packet) = ibound_rx.recv() => self.handle_inbound(packet),
                Some(submission) = submit_rx.recv() => self.handle_submission(submission),
                else => break,
            }
        }
        tracing::debug!("logic core stopped");
    }

    // -----------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------

    fn handle_inbound(&mut self, packet: ControlPacket) {
        match packet {
            ControlPacket::Publish(publish) => self.handle_inbound_publish(publish),
            ControlPacket::PubAck(id) => {
                if self.outbound.get(&id) == Some(&OutboundPhase::WaitPubAck) {
                    self.finish_outbound(id);
                } else {
                    tracing::warn!(packet_id = id, "PUBACK for unknown id ignored");
                }
            }
            ControlPacket::PubRec(id) => match self.outbound.get(&id) {
                Some(OutboundPhase::WaitPubRec) => {
                    self.outbound.insert(id, OutboundPhase::WaitPubComp);
                    self.store_put(
                        &store::outbound_key(id),
                        &ControlPacket::PubRel(id).encode(),
                    );
                    self.send_priority(ControlPacket::PubRel(id));
                }
                Some(OutboundPhase::WaitPubComp) => {
                    // Duplicate PUBREC: our PUBREL was lost, repeat it.
                    self.send_priority(ControlPacket::PubRel(id));
                }
                _ => tracing::warn!(packet_id = id, "PUBREC for unknown id ignored"),
            },
            ControlPacket::PubComp(id) => {
                if self.outbound.get(&id) == Some(&OutboundPhase::WaitPubComp) {
                    self.finish_outbound(id);
                } else {
                    tracing::warn!(packet_id = id, "PUBCOMP for unknown id ignored");
                }
            }
            ControlPacket::PubRel(id) => {
                // Tolerated even when unknown: the broker expects PUBCOMP.
                if !self.inbound.remove(&id) {
                    tracing::warn!(packet_id = id, "PUBREL for unknown id, answering anyway");
                }
                self.store_del(&store::inbound_key(id));
                self.send_priority(ControlPacket::PubComp(id));
            }
            ControlPacket::SubAck(ack) => self.finish_control(ack.packet_id, "SUBACK"),
            ControlPacket::UnsubAck(id) => self.finish_control(id, "UNSUBACK"),
            ControlPacket::PingResp => self.activity.clear_ping(),
            ControlPacket::ConnAck(ack) => {
                // The handshake window is over; a CONNACK here is noise.
                tracing::warn!(code = ack.return_code, "late CONNACK dropped");
            }
            other => {
                tracing::warn!(packet = other.label(), "unexpected inbound packet ignored");
            }
        }
    }

    fn handle_inbound_publish(&mut self, publish: PublishPacket) {
        match publish.qos {
            Qos::AtMostOnce => self.router.dispatch((&publish).into()),
            Qos::AtLeastOnce => {
                let Some(id) = publish.packet_id else {
                    tracing::warn!("QoS 1 PUBLISH without packet id ignored");
                    return;
                };
                // Dispatch before the ack so at-least-once holds.
                self.router.dispatch((&publish).into());
                self.send_priority(ControlPacket::PubAck(id));
            }
            Qos::ExactlyOnce => {
                let Some(id) = publish.packet_id else {
                    tracing::warn!("QoS 2 PUBLISH without packet id ignored");
                    return;
                };
                if self.inbound.insert(id) {
                    self.store_put(&store::inbound_key(id), &ControlPacket::Publish(publish.clone()).encode());
                    self.router.dispatch((&publish).into());
                } else {
                    tracing::debug!(packet_id = id, "duplicate QoS 2 PUBLISH suppressed");
                }
                self.send_priority(ControlPacket::PubRec(id));
            }
        }
    }

    fn finish_outbound(&mut self, id: u16) {
        self.outbound.remove(&id);
        self.store_del(&store::outbound_key(id));
        self.receipts.complete(id);
        self.allocator.release(id);
    }

    fn finish_control(&mut self, id: u16, label: &str) {
        if self.pending_control.remove(&id) {
            self.receipts.complete(id);
            self.allocator.release(id);
        } else {
            tracing::warn!(packet_id = id, "{label} for unknown id ignored");
        }
    }

    // -----------------------------------------------------------------
    // Submissions
    // -----------------------------------------------------------------

    fn handle_submission(&mut self, submission: Submission) {
        match submission {
            Submission::Publish { packet, handle } => self.submit_publish(packet, handle),
            Submission::Subscribe { filters, handle } => {
                let id = match self.allocator.acquire() {
                    Ok(id) => id,
                    Err(err) => return handle.fail(err),
                };
                self.pending_control.insert(id);
                self.receipts.register(id, handle);
                let frame = ControlPacket::Subscribe(SubscribePacket {
                    packet_id: id,
                    filters,
                })
                .encode();
                self.send_frame(frame, None);
            }
            Submission::Unsubscribe { topics, handle } => {
                let id = match self.allocator.acquire() {
                    Ok(id) => id,
                    Err(err) => return handle.fail(err),
                };
                self.pending_control.insert(id);
                self.receipts.register(id, handle);
                let frame = ControlPacket::Unsubscribe(UnsubscribePacket {
                    packet_id: id,
                    topics,
                })
                .encode();
                self.send_frame(frame, None);
            }
        }
    }

    fn submit_publish(&mut self, mut packet: PublishPacket, handle: CompletionHandle) {
        if packet.qos == Qos::AtMostOnce {
            // No id, no persistence: done once the bytes are written.
            let frame = ControlPacket::Publish(packet).encode();
            self.send_frame(frame, Some(handle));
            return;
        }

        let id = match self.allocator.acquire() {
            Ok(id) => id,
            Err(err) => return handle.fail(err),
        };
        packet.packet_id = Some(id);
        let phase = match packet.qos {
            Qos::AtLeastOnce => OutboundPhase::WaitPubAck,
            _ => OutboundPhase::WaitPubRec,
        };
        let frame = ControlPacket::Publish(packet).encode();
        // Persist and register before the frame can reach the wire.
        self.store_put(&store::outbound_key(id), &frame);
        self.outbound.insert(id, phase);
        self.receipts.register(id, handle);
        self.send_frame(frame, None);
    }

    // -----------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------

    fn send_frame(&mut self, bytes: Vec<u8>, complete_on_write: Option<CompletionHandle>) {
        self.depth.incr();
        if self
            .out_tx
            .send(OutboundFrame {
                bytes,
                complete_on_write,
            })
            .is_err()
        {
            self.depth.decr();
            tracing::warn!("outbound queue closed, frame dropped");
        }
    }

    fn send_priority(&self, packet: ControlPacket) {
        let _ = self.prio_tx.send(PriorityFrame::Frame(packet.encode()));
    }

    fn store_put(&self, key: &str, frame: &[u8]) {
        if let Err(err) = self.store.put(key, frame) {
            tracing::error!(key = %key, error = %err, "store write failed");
        }
    }

    fn store_del(&self, key: &str) {
        if let Err(err) = self.store.del(key) {
            tracing::error!(key = %key, error = %err, "store delete failed");
        }
    }

    fn fatal(&mut self, err: ClientError) {
        tracing::warn!(error = %err, "fatal error, tearing session down");
        self.connected.store(false, Ordering::SeqCst);
        self.receipts.cancel_all(&err);
        let _ = self.stop_tx.send(true);
        let _ = self.force_tx.send(true);
        self.store.close();
    }
}
