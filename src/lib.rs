#![deny(unused, dead_code)]
#![deny(clippy::all)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]

//! Photon - Asynchronous MQTT v3.1 client.
//!
//! A lightweight client for communicating with an MQTT broker over plain
//! TCP, TLS, or WebSocket, with non-blocking operations that report
//! completion through one-shot [`Receipt`]s. Delivery guarantees at QoS 1
//! and 2 survive reconnects when a persistent [`Store`] is configured:
//! in-flight messages are replayed with DUP set on the next Start.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Client options and builder
//! - `core::telemetry` - Opt-in tracing bootstrap
//!
//! ## Protocol
//! - `protocol` - MQTT v3.1 packet model and wire codec
//!
//! ## Engine
//! - `engine` - Outgoing/incoming pumps, logic core, keep-alive
//! - `session` - Packet-identifier allocator and receipts
//! - `routing` - Topic filter matching and handler dispatch
//!
//! ## Persistence
//! - `store` - In-flight frame persistence (memory and file backed)
//!
//! ## Networking
//! - `net::transport` - tcp/ssl/ws/wss openers
//! - `net::tls` - Client TLS configuration
//!
//! # Example
//!
//! ```no_run
//! use photon::{Client, ClientOptions, Qos, TopicFilter};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), photon::ClientError> {
//! let mut client = Client::new(
//!     ClientOptions::new("sensor-42")
//!         .add_server("tcp://broker.example:1883")
//!         .with_keep_alive(30),
//! );
//! client.start().await?;
//!
//! client
//!     .subscribe(
//!         Arc::new(|publication| println!("{}", publication.topic)),
//!         vec![TopicFilter::new("metrics/#", Qos::AtLeastOnce)],
//!     )
//!     .await?
//!     .wait()
//!     .await?;
//!
//! client.publish(Qos::AtLeastOnce, "metrics/temp", "21.5").await.wait().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod engine;

pub mod core;
pub mod error;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use self::core::config::ClientOptions;
pub use self::core::telemetry;
pub use client::Client;
pub use error::{ClientError, ConnectReturnCode};
pub use net::tls::TlsOptions;
pub use protocol::{ControlPacket, Qos, TopicFilter, Will};
pub use routing::{DispatchMode, MessageHandler, Publication};
pub use session::Receipt;
pub use store::{FileStore, MemoryStore, Store};
