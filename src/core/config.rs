//! Client configuration.
//!
//! Options are assembled with `with_*` chainers and validated at Start.
//! Every knob the protocol engine honors lives here; anything not set
//! falls back to the defaults below.

use crate::net::TlsOptions;
use crate::protocol::{Qos, Will};
use crate::routing::DispatchMode;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 30;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a [`crate::Client`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Broker URLs tried in order until one accepts the transport.
    pub servers: Vec<String>,
    pub client_id: String,
    /// Wipe persisted session state at Start.
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<Will>,
    /// Keep-alive interval in seconds; 0 disables the keep-alive task.
    pub keep_alive_secs: u16,
    pub tls: Option<TlsOptions>,
    /// In-flight persistence; defaults to an in-memory store.
    pub store: Option<Arc<dyn Store>>,
    pub dispatch: DispatchMode,
    /// Bound on the CONNACK wait during the handshake.
    pub connect_timeout: Duration,
    /// Bound on enqueueing a publish/subscribe/unsubscribe.
    pub submit_timeout: Duration,
    /// Tag attached to every trace span of this client; defaults to the
    /// client id.
    pub trace_tag: Option<String>,
}

impl ClientOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            servers: Vec::new(),
            client_id: client_id.into(),
            clean_session: true,
            username: None,
            password: None,
            will: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            tls: None,
            store: None,
            dispatch: DispatchMode::Unordered,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            trace_tag: None,
        }
    }

    pub fn add_server(mut self, url: impl Into<String>) -> Self {
        self.servers.push(url.into());
        self
    }

    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_will(
        mut self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: Qos,
        retain: bool,
    ) -> Self {
        self.will = Some(Will {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        });
        self
    }

    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_dispatch(mut self, mode: DispatchMode) -> Self {
        self.dispatch = mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_trace_tag(mut self, tag: impl Into<String>) -> Self {
        self.trace_tag = Some(tag.into());
        self
    }

    pub(crate) fn trace_tag(&self) -> &str {
        self.trace_tag.as_deref().unwrap_or(&self.client_id)
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("servers", &self.servers)
            .field("client_id", &self.client_id)
            .field("clean_session", &self.clean_session)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("dispatch", &self.dispatch)
            .field("has_store", &self.store.is_some())
            .field("has_tls", &self.tls.is_some())
            .finish()
    }
}
