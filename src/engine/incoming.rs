//! The incoming pump: sole reader of the transport.
//!
//! Decodes one control packet at a time and forwards it to the logic core.
//! Any read or decode failure, including a clean EOF, ends the session:
//! the error is published and the pump exits; the logic core treats that
//! as a fatal disconnect.

use super::Activity;
use crate::error::ClientError;
use crate::net::TransportReader;
use crate::protocol::{read_packet, CodecError, ControlPacket};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

pub(crate) struct IncomingPump {
    pub reader: TransportReader,
    pub ibound_tx: mpsc::Sender<ControlPacket>,
    pub stop_rx: watch::Receiver<bool>,
    pub activity: Arc<Activity>,
    pub err_tx: mpsc::UnboundedSender<ClientError>,
}

impl IncomingPump {
    pub(crate) async fn run(mut self) {
        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    // A closed stop channel means the client is gone.
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
                result = read_packet(&mut self.reader) => match result {
                    Ok(packet) => {
                        self.activity.touch_inbound();
                        tracing::trace!(packet = packet.label(), "inbound packet");
                        if self.ibound_tx.send(packet).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let detail = classify(&err);
                        tracing::debug!(error = %err, "incoming pump stopping: {detail}");
                        let _ = self.err_tx.send(ClientError::Transport(detail));
                        break;
                    }
                },
            }
        }
    }
}

fn classify(err: &CodecError) -> String {
    match err {
        CodecError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ) =>
        {
            "connection closed by broker".into()
        }
        CodecError::Io(io_err) => format!("read: {io_err}"),
        other => format!("decode: {other}"),
    }
}
