//! Byte transports between the client and a broker.
//!
//! - `tls` - client TLS configuration assembly from PEM material
//! - `transport` - scheme dispatch (`tcp://`, `ssl://`, `ws://`, `wss://`)
//!   returning independently owned read/write halves
//! - `ws` - byte-stream adapter over a message-framed WebSocket

pub mod tls;
pub mod transport;
pub(crate) mod ws;

pub use tls::TlsOptions;
pub use transport::{open_connection, TransportReader, TransportWriter};
