//! Topic filter matching and dispatch of inbound publications.
//!
//! The route table is written by the client facade (subscribe/unsubscribe)
//! and read by the logic core on every inbound PUBLISH. Dispatch never
//! blocks protocol progress: unordered mode spawns a task per handler
//! invocation; ordered mode feeds three per-QoS FIFO queues, each drained
//! by its own dispatcher task, so a slow QoS 2 handler cannot delay QoS 0
//! traffic. Handler panics are caught and traced; acknowledgement is
//! emitted regardless.

use crate::protocol::{PublishPacket, Qos};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How inbound publications are handed to subscriber callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Handlers run concurrently; no ordering between messages.
    #[default]
    Unordered,
    /// FIFO per QoS class; within a class, a handler finishes before the
    /// next message's handler starts. No ordering across classes.
    Ordered,
}

/// An inbound publication as seen by subscriber callbacks.
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
}

impl From<&PublishPacket> for Publication {
    fn from(packet: &PublishPacket) -> Self {
        Self {
            topic: packet.topic.clone(),
            payload: packet.payload.clone(),
            qos: packet.qos,
            retain: packet.retain,
            dup: packet.dup,
        }
    }
}

/// Subscriber callback. Invoked once per matching publication.
pub type MessageHandler = Arc<dyn Fn(Publication) + Send + Sync + 'static>;

struct Route {
    filter: String,
    handler: MessageHandler,
}

struct OrderedJob {
    publication: Publication,
    handlers: Vec<MessageHandler>,
}

pub struct TopicRouter {
    routes: RwLock<Vec<Route>>,
    ordered: Option<[mpsc::UnboundedSender<OrderedJob>; 3]>,
}

impl TopicRouter {
    /// Build a router; ordered mode spawns its three dispatcher tasks and
    /// must therefore run inside a tokio runtime.
    pub fn new(mode: DispatchMode) -> Self {
        let ordered = match mode {
            DispatchMode::Unordered => None,
            DispatchMode::Ordered => Some([
                spawn_ordered_dispatcher(Qos::AtMostOnce),
                spawn_ordered_dispatcher(Qos::AtLeastOnce),
                spawn_ordered_dispatcher(Qos::ExactlyOnce),
            ]),
        };
        Self {
            routes: RwLock::new(Vec::new()),
            ordered,
        }
    }

    pub fn add_route(&self, filter: impl Into<String>, handler: MessageHandler) {
        self.routes.write().push(Route {
            filter: filter.into(),
            handler,
        });
    }

    /// Remove every route registered for `filter` (exact filter string).
    pub fn remove_route(&self, filter: &str) {
        self.routes.write().retain(|route| route.filter != filter);
    }

    /// Handlers whose filter matches `topic`.
    pub fn matches(&self, topic: &str) -> Vec<MessageHandler> {
        self.routes
            .read()
            .iter()
            .filter(|route| topic_matches(&route.filter, topic))
            .map(|route| Arc::clone(&route.handler))
            .collect()
    }

    /// Dispatch a publication to every matching handler.
    pub fn dispatch(&self, publication: Publication) {
        let handlers = self.matches(&publication.topic);
        if handlers.is_empty() {
            tracing::debug!(topic = %publication.topic, "no route for inbound publication");
            return;
        }
        match &self.ordered {
            None => {
                for handler in handlers {
                    let publication = publication.clone();
                    tokio::spawn(async move {
                        run_handler(&handler, publication);
                    });
                }
            }
            Some(queues) => {
                let queue = &queues[publication.qos.as_byte() as usize];
                let _ = queue.send(OrderedJob {
                    publication,
                    handlers,
                });
            }
        }
    }
}

fn spawn_ordered_dispatcher(class: Qos) -> mpsc::UnboundedSender<OrderedJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OrderedJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            for handler in &job.handlers {
                run_handler(handler, job.publication.clone());
            }
        }
        tracing::debug!(?class, "ordered dispatcher stopped");
    });
    tx
}

fn run_handler(handler: &MessageHandler, publication: Publication) {
    let topic = publication.topic.clone();
    if catch_unwind(AssertUnwindSafe(|| handler(publication))).is_err() {
        tracing::warn!(topic = %topic, "message handler panicked");
    }
}

/// MQTT wildcard matching: `+` matches one level, `#` zero or more trailing
/// levels (final token only), and wildcards never match a leading `$` level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut pos = 0usize;
    for (idx, part) in filter_parts.iter().enumerate() {
        match *part {
            "#" => return idx == filter_parts.len() - 1,
            "+" => {
                if pos >= topic_parts.len() {
                    return false;
                }
                pos += 1;
            }
            literal => {
                if topic_parts.get(pos) != Some(&literal) {
                    return false;
                }
                pos += 1;
            }
        }
    }
    pos == topic_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_literal_and_single_level_wildcard() {
        assert!(topic_matches("sport/tennis/score", "sport/tennis/score"));
        assert!(topic_matches("sport/+/score", "sport/tennis/score"));
        assert!(!topic_matches("sport/+/score", "sport/tennis/ranking"));
        assert!(!topic_matches("sport/+/score", "sport/score"));
        assert!(!topic_matches("sport/+", "sport/tennis/score"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("sport/#", "sport/tennis/score"));
        assert!(topic_matches("sport/#", "sport"));
        assert!(topic_matches("#", "anything/at/all"));
        // `#` is only valid as the final token.
        assert!(!topic_matches("sport/#/score", "sport/tennis/score"));
    }

    #[test]
    fn test_dollar_topics_escape_wildcards() {
        assert!(!topic_matches("#", "$SYS/broker/load"));
        assert!(!topic_matches("+/broker/load", "$SYS/broker/load"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/load"));
    }

    fn publication(topic: &str, qos: Qos) -> Publication {
        Publication {
            topic: topic.into(),
            payload: b"m".to_vec(),
            qos,
            retain: false,
            dup: false,
        }
    }

    #[tokio::test]
    async fn test_unordered_dispatch_reaches_all_matches() {
        let router = TopicRouter::new(DispatchMode::Unordered);
        let hits = Arc::new(AtomicUsize::new(0));

        for filter in ["sport/+/score", "sport/#"] {
            let hits = Arc::clone(&hits);
            router.add_route(
                filter,
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        router.dispatch(publication("sport/tennis/score", Qos::AtMostOnce));
        router.dispatch(publication("$SYS/x", Qos::AtMostOnce));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ordered_dispatch_is_fifo_within_class() {
        let router = TopicRouter::new(DispatchMode::Ordered);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        router.add_route(
            "seq/#",
            Arc::new(move |publication: Publication| {
                sink.lock().push(publication.payload[0]);
            }),
        );

        for byte in 0u8..16 {
            let mut publication = publication("seq/a", Qos::AtLeastOnce);
            publication.payload = vec![byte];
            router.dispatch(publication);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = seen.lock();
        assert_eq!(*seen, (0u8..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let router = TopicRouter::new(DispatchMode::Ordered);
        let hits = Arc::new(AtomicUsize::new(0));

        router.add_route("t", Arc::new(|_| panic!("boom")));
        let counter = Arc::clone(&hits);
        router.add_route(
            "t",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        router.dispatch(publication("t", Qos::AtMostOnce));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_route_only_drops_exact_filter() {
        let router = TopicRouter::new(DispatchMode::Unordered);
        router.add_route("a/+", Arc::new(|_| {}));
        router.add_route("a/#", Arc::new(|_| {}));
        router.remove_route("a/+");
        assert_eq!(router.matches("a/b").len(), 1);
    }
}
