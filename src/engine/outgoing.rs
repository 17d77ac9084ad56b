//! The outgoing pump: sole writer of the transport.
//!
//! Two queues feed it. The priority queue (handshake, acks, pings,
//! disconnect) is drained ahead of the normal publish queue on every
//! scheduling opportunity. Once the stop signal is observed the normal
//! queue is abandoned and only priority frames are flushed, so a
//! DISCONNECT submitted during shutdown is always the last frame written.
//! The force signal ends the pump immediately.

use super::{Activity, OutboundFrame, PriorityFrame, QueueDepth};
use crate::error::ClientError;
use crate::net::TransportWriter;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};

pub(crate) struct OutgoingPump {
    pub writer: TransportWriter,
    pub prio_rx: mpsc::UnboundedReceiver<PriorityFrame>,
    pub out_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pub stop_rx: watch::Receiver<bool>,
    pub force_rx: watch::Receiver<bool>,
    pub activity: Arc<Activity>,
    pub depth: Arc<QueueDepth>,
    pub err_tx: mpsc::UnboundedSender<ClientError>,
}

impl OutgoingPump {
    pub(crate) async fn run(mut self) {
        let mut out_open = true;
        // A closed watch channel means its holders are gone; the arm is
        // disabled instead of spinning on the error.
        let mut force_open = true;
        let mut stop_open = true;
        loop {
            let stopping = *self.stop_rx.borrow();
            if *self.force_rx.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = self.force_rx.changed(), if force_open => {
                    if changed.is_err() {
                        force_open = false;
                    } else if *self.force_rx.borrow() {
                        tracing::debug!("outgoing pump force-stopped");
                        break;
                    }
                }

                frame = self.prio_rx.recv() => match frame {
                    Some(PriorityFrame::Frame(bytes)) => {
                        if self.write(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(PriorityFrame::Disconnect(bytes)) => {
                        let _ = self.write(&bytes).await;
                        tracing::debug!("outgoing pump wrote DISCONNECT, exiting");
                        break;
                    }
                    None => break,
                },

                changed = self.stop_rx.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                    }
                }

                frame = self.out_rx.recv(), if out_open && !stopping => match frame {
                    Some(frame) => {
                        let written = self.write(&frame.bytes).await;
                        self.depth.decr();
                        match written {
                            Ok(()) => {
                                if let Some(handle) = frame.complete_on_write {
                                    handle.complete();
                                }
                            }
                            Err(()) => {
                                if let Some(handle) = frame.complete_on_write {
                                    handle.fail(ClientError::Transport(
                                        "write failed before delivery".into(),
                                    ));
                                }
                                break;
                            }
                        }
                    }
                    None => out_open = false,
                },
            }
        }
        let _ = self.writer.shutdown().await;
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ()> {
        let outcome = async {
            self.writer.write_all(bytes).await?;
            // One flush per packet keeps the wire current with the state
            // machine; the QoS tables assume a persisted packet is on its
            // way out.
            self.writer.flush().await
        }
        .await;
        match outcome {
            Ok(()) => {
                self.activity.touch_outbound();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "transport write failed");
                let _ = self
                    .err_tx
                    .send(ClientError::Transport(format!("write: {err}")));
                Err(())
            }
        }
    }
}
