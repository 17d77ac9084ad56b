//! Keep-alive: PINGREQ on outbound inactivity, fatal on missing PINGRESP.
//!
//! The task ticks at half the configured interval. When the wire has been
//! outbound-idle for a full interval and no ping is outstanding, a PINGREQ
//! goes out through the priority queue. A ping left unanswered for a full
//! interval declares the connection dead. A zero interval means this task
//! is never started.

use super::{Activity, PriorityFrame};
use crate::error::ClientError;
use crate::protocol::ControlPacket;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub(crate) struct KeepAlive {
    pub interval: Duration,
    pub activity: Arc<Activity>,
    pub prio_tx: mpsc::UnboundedSender<PriorityFrame>,
    pub err_tx: mpsc::UnboundedSender<ClientError>,
    pub stop_rx: watch::Receiver<bool>,
}

impl KeepAlive {
    pub(crate) async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval / 2);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if self.activity.ping_outstanding() {
                        if self.activity.ping_age() >= self.interval {
                            tracing::warn!(
                                interval_secs = self.interval.as_secs(),
                                "no PINGRESP within keep-alive interval"
                            );
                            let _ = self.err_tx.send(ClientError::KeepAliveLost);
                            break;
                        }
                    } else if self.activity.outbound_idle() >= self.interval {
                        tracing::trace!(
                            inbound_idle_ms = self.activity.inbound_idle().as_millis() as u64,
                            "keep-alive sending PINGREQ"
                        );
                        self.activity.mark_ping_sent();
                        if self
                            .prio_tx
                            .send(PriorityFrame::Frame(ControlPacket::PingReq.encode()))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
}
