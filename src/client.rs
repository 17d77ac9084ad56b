//! The public client facade.
//!
//! `Client` owns the engine lifecycle: Start opens a transport, performs
//! the handshake, replays persisted state, then spawns the pumps, logic
//! core and keep-alive. Public operations hand submissions to the logic
//! core; nothing here touches protocol state directly.

use crate::core::config::ClientOptions;
use crate::engine::incoming::IncomingPump;
use crate::engine::keepalive::KeepAlive;
use crate::engine::logic::LogicCore;
use crate::engine::outgoing::OutgoingPump;
use crate::engine::{Activity, PriorityFrame, QueueDepth, Submission};
use crate::error::{ClientError, ConnectReturnCode};
use crate::net::transport::open_connection;
use crate::net::TransportReader;
use crate::protocol::{read_packet, ConnectPacket, ControlPacket, PublishPacket, Qos, TopicFilter};
use crate::routing::{MessageHandler, TopicRouter};
use crate::session::Receipt;
use crate::store::{MemoryStore, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Capacity of the inbound packet channel between the pumps.
const INBOUND_CHANNEL_CAPACITY: usize = 64;
/// How long shutdown waits for the writer to flush DISCONNECT.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

struct Engine {
    submit_tx: mpsc::Sender<Submission>,
    prio_tx: mpsc::UnboundedSender<PriorityFrame>,
    stop_tx: watch::Sender<bool>,
    depth: Arc<QueueDepth>,
    router: Arc<TopicRouter>,
    store: Arc<dyn Store>,
    outgoing_task: JoinHandle<()>,
}

/// An MQTT v3.1 client.
///
/// A dead connection is never retried automatically: after a transport or
/// keep-alive failure the client must be started again.
pub struct Client {
    options: ClientOptions,
    connected: Arc<AtomicBool>,
    engine: Option<Engine>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            connected: Arc::new(AtomicBool::new(false)),
            engine: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect to the first reachable broker, run the handshake, and bring
    /// the engine up.
    ///
    /// With `clean_session` off, the returned receipts track the persisted
    /// in-flight messages now being retransmitted; with it on, the list is
    /// empty and the store is wiped first.
    pub async fn start(&mut self) -> Result<Vec<Receipt>, ClientError> {
        if self.is_connected() {
            return Err(ClientError::Transport("client already started".into()));
        }
        // A previous session that died fatally leaves finished tasks behind.
        self.engine = None;

        let tag = self.options.trace_tag().to_string();
        let mut transport = None;
        for url in &self.options.servers {
            match open_connection(url, self.options.tls.as_ref()).await {
                Ok(halves) => {
                    tracing::info!(client = %tag, broker = %url, "connected to broker");
                    transport = Some(halves);
                    break;
                }
                Err(err) => {
                    tracing::warn!(client = %tag, broker = %url, error = %err, "broker unreachable, trying next");
                }
            }
        }
        let Some((mut reader, writer)) = transport else {
            tracing::error!(client = %tag, "no broker accepted the connection");
            return Err(ClientError::ConnectFailed);
        };

        let store: Arc<dyn Store> = self
            .options
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        store
            .open()
            .map_err(|err| ClientError::Transport(format!("store open: {err}")))?;

        let activity = Activity::new();
        let depth = QueueDepth::new();
        let router = Arc::new(TopicRouter::new(self.options.dispatch));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (prio_tx, prio_rx) = mpsc::unbounded_channel();
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (ibound_tx, ibound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (force_tx, force_rx) = watch::channel(false);

        let outgoing_task = tokio::spawn(
            OutgoingPump {
                writer,
                prio_rx,
                out_rx,
                stop_rx: stop_rx.clone(),
                force_rx,
                activity: Arc::clone(&activity),
                depth: Arc::clone(&depth),
                err_tx: err_tx.clone(),
            }
            .run(),
        );

        let connect = ControlPacket::Connect(ConnectPacket {
            client_id: self.options.client_id.clone(),
            keep_alive: self.options.keep_alive_secs,
            clean_session: self.options.clean_session,
            will: self.options.will.clone(),
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        });
        let _ = prio_tx.send(PriorityFrame::Frame(connect.encode()));

        if let Err(err) = await_connack(&mut reader, self.options.connect_timeout).await {
            tracing::error!(client = %tag, error = %err, "handshake failed");
            let _ = force_tx.send(true);
            let _ = stop_tx.send(true);
            store.close();
            return Err(err);
        }

        let mut logic = LogicCore::new(
            Arc::clone(&store),
            Arc::clone(&router),
            out_tx,
            prio_tx.clone(),
            Arc::clone(&depth),
            Arc::clone(&activity),
            Arc::clone(&self.connected),
            stop_tx.clone(),
            force_tx,
        );

        let receipts = if self.options.clean_session {
            if let Err(err) = store.reset() {
                tracing::warn!(client = %tag, error = %err, "clean-session store reset failed");
            }
            Vec::new()
        } else {
            logic.resume()
        };

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(client = %tag, resumed = receipts.len(), "client is connected");

        if self.options.keep_alive_secs > 0 {
            tokio::spawn(
                KeepAlive {
                    interval: Duration::from_secs(u64::from(self.options.keep_alive_secs)),
                    activity: Arc::clone(&activity),
                    prio_tx: prio_tx.clone(),
                    err_tx: err_tx.clone(),
                    stop_rx: stop_rx.clone(),
                }
                .run(),
            );
        }

        tokio::spawn(logic.run(submit_rx, ibound_rx, err_rx, stop_rx.clone()));

        // Started last so resumed state is in place before new inbound.
        tokio::spawn(
            IncomingPump {
                reader,
                ibound_tx,
                stop_rx,
                activity,
                err_tx,
            }
            .run(),
        );

        self.engine = Some(Engine {
            submit_tx,
            prio_tx,
            stop_tx,
            depth,
            router,
            store,
            outgoing_task,
        });
        Ok(receipts)
    }

    /// Publish `payload` on `topic` at the given QoS.
    ///
    /// The receipt completes when the QoS exchange reaches its terminal
    /// phase; failure to even enqueue within the submit timeout completes
    /// it with [`ClientError::SubmitTimeout`].
    pub async fn publish(
        &self,
        qos: Qos,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Receipt {
        self.publish_packet(qos, topic.into(), payload.into(), false)
            .await
    }

    /// Publish with the retain flag set.
    pub async fn publish_retained(
        &self,
        qos: Qos,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Receipt {
        self.publish_packet(qos, topic.into(), payload.into(), true)
            .await
    }

    async fn publish_packet(
        &self,
        qos: Qos,
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    ) -> Receipt {
        let (receipt, handle) = Receipt::pair();
        let Some(engine) = self.engine_if_connected() else {
            handle.fail(ClientError::NotConnected);
            return receipt;
        };
        tracing::debug!(topic = %topic, qos = qos.as_byte(), "sending publish message");
        let submission = Submission::Publish {
            packet: PublishPacket {
                topic,
                payload,
                qos,
                packet_id: None,
                dup: false,
                retain,
            },
            handle,
        };
        self.submit(engine, submission).await;
        receipt
    }

    /// Register `handler` for the filters and subscribe to them.
    ///
    /// Routes are live before the SUBSCRIBE is written, so a publication
    /// racing the SUBACK still finds its handler.
    pub async fn subscribe(
        &self,
        handler: MessageHandler,
        filters: Vec<TopicFilter>,
    ) -> Result<Receipt, ClientError> {
        let Some(engine) = self.engine_if_connected() else {
            return Err(ClientError::NotConnected);
        };
        if filters.is_empty() {
            return Err(ClientError::Transport("subscribe needs at least one filter".into()));
        }
        for filter in &filters {
            engine.router.add_route(filter.filter.clone(), Arc::clone(&handler));
        }
        let (receipt, handle) = Receipt::pair();
        self.submit(engine, Submission::Subscribe { filters, handle })
            .await;
        Ok(receipt)
    }

    /// Unsubscribe from the topics; their routes are removed once the
    /// UNSUBSCRIBE is submitted.
    pub async fn unsubscribe(
        &self,
        topics: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Receipt, ClientError> {
        let Some(engine) = self.engine_if_connected() else {
            return Err(ClientError::NotConnected);
        };
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        if topics.is_empty() {
            return Err(ClientError::Transport("unsubscribe needs at least one topic".into()));
        }
        let (receipt, handle) = Receipt::pair();
        let submitted = self
            .submit(
                engine,
                Submission::Unsubscribe {
                    topics: topics.clone(),
                    handle,
                },
            )
            .await;
        if submitted {
            for topic in &topics {
                engine.router.remove_route(topic);
            }
        }
        Ok(receipt)
    }

    /// Disconnect gracefully, waiting up to `quiesce` for queued outbound
    /// work to drain (returning early once it has).
    pub async fn disconnect(&mut self, quiesce: Duration) {
        if !self.is_connected() {
            tracing::warn!("already disconnected");
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some(engine) = &self.engine {
            let deadline = tokio::time::Instant::now() + quiesce;
            while engine.depth.get() > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if engine.depth.get() > 0 {
                tracing::debug!(pending = engine.depth.get(), "quiesce expired with work pending");
            }
        }
        self.shutdown().await;
    }

    /// Disconnect immediately without draining queued work.
    pub async fn force_disconnect(&mut self) {
        if !self.is_connected() {
            tracing::warn!("already disconnected");
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        // Stop every activity; the outgoing pump keeps draining the
        // priority queue so DISCONNECT is the last frame written.
        let _ = engine.stop_tx.send(true);
        let _ = engine
            .prio_tx
            .send(PriorityFrame::Disconnect(ControlPacket::Disconnect.encode()));
        if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, engine.outgoing_task)
            .await
            .is_err()
        {
            tracing::warn!("outgoing pump did not flush in time");
        }
        engine.store.close();
        tracing::info!("disconnected");
    }

    fn engine_if_connected(&self) -> Option<&Engine> {
        if self.is_connected() {
            self.engine.as_ref()
        } else {
            None
        }
    }

    /// Enqueue a submission, honoring the configured timeout. Failing the
    /// receipt is done here so callers can fire and forget.
    async fn submit(&self, engine: &Engine, submission: Submission) -> bool {
        match engine
            .submit_tx
            .send_timeout(submission, self.options.submit_timeout)
            .await
        {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(submission)) => {
                tracing::warn!("submission timed out before reaching the engine");
                fail_submission(submission, ClientError::SubmitTimeout);
                false
            }
            Err(SendTimeoutError::Closed(submission)) => {
                fail_submission(submission, ClientError::NotConnected);
                false
            }
        }
    }
}

fn fail_submission(submission: Submission, err: ClientError) {
    match submission {
        Submission::Publish { handle, .. }
        | Submission::Subscribe { handle, .. }
        | Submission::Unsubscribe { handle, .. } => handle.fail(err),
    }
}

async fn await_connack(
    reader: &mut TransportReader,
    timeout: Duration,
) -> Result<(), ClientError> {
    let packet = tokio::time::timeout(timeout, read_packet(reader))
        .await
        .map_err(|_| ClientError::Transport("timed out waiting for CONNACK".into()))?
        .map_err(|err| ClientError::Transport(format!("handshake read: {err}")))?;
    match packet {
        ControlPacket::ConnAck(ack) => match ConnectReturnCode::from_byte(ack.return_code) {
            Some(code) if code.is_accepted() => Ok(()),
            Some(code) => Err(ClientError::ConnAckRefused(code)),
            None => Err(ClientError::Transport(format!(
                "unknown CONNACK return code {:#04x}",
                ack.return_code
            ))),
        },
        other => Err(ClientError::Transport(format!(
            "expected CONNACK, got {}",
            other.label()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = Client::new(ClientOptions::new("c1").add_server("tcp://127.0.0.1:1"));

        let receipt = client.publish(Qos::AtMostOnce, "t", "p").await;
        assert_eq!(receipt.wait().await, Err(ClientError::NotConnected));

        let handler: MessageHandler = Arc::new(|_| {});
        assert!(matches!(
            client
                .subscribe(handler, vec![TopicFilter::new("t", Qos::AtMostOnce)])
                .await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.unsubscribe(["t"]).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_no_broker_reachable() {
        // Port 1 refuses connections on loopback.
        let mut client = Client::new(ClientOptions::new("c2").add_server("tcp://127.0.0.1:1"));
        assert_eq!(client.start().await.unwrap_err(), ClientError::ConnectFailed);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_when_never_started_is_noop() {
        let mut client = Client::new(ClientOptions::new("c3"));
        client.disconnect(Duration::from_millis(10)).await;
        client.force_disconnect().await;
    }
}
