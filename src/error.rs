//! Client-facing error taxonomy.
//!
//! Fatal conditions (transport failure, keep-alive loss) tear the session
//! down and complete every pending receipt with the error; protocol
//! anomalies (unknown ids in acks, tolerated malformed input) are traced at
//! warn level and never surface here.

use thiserror::Error;

/// CONNACK return codes as defined in MQTT v3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted = 0x00,
    /// The server does not support the requested protocol level.
    UnacceptableProtocolVersion = 0x01,
    /// The client identifier was rejected.
    IdentifierRejected = 0x02,
    /// The server is unavailable.
    ServerUnavailable = 0x03,
    /// Malformed user name or password.
    BadCredentials = 0x04,
    /// The client is not authorized to connect.
    NotAuthorized = 0x05,
}

impl ConnectReturnCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::UnacceptableProtocolVersion),
            0x02 => Some(Self::IdentifierRejected),
            0x03 => Some(Self::ServerUnavailable),
            0x04 => Some(Self::BadCredentials),
            0x05 => Some(Self::NotAuthorized),
            _ => None,
        }
    }

    /// Get the protocol-defined reason for this return code.
    pub fn reason_string(&self) -> &'static str {
        match self {
            Self::Accepted => "connection accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadCredentials => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.reason_string(), *self as u8)
    }
}

/// Errors surfaced by client operations and receipts.
///
/// Variants carry string detail rather than source errors so that receipts
/// can hand the same failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No configured broker accepted the transport connection.
    #[error("no broker accepted the connection")]
    ConnectFailed,

    /// The broker refused the MQTT handshake.
    #[error("broker refused connection: {0}")]
    ConnAckRefused(ConnectReturnCode),

    /// A public operation was invoked while the client was disconnected.
    #[error("client is not connected")]
    NotConnected,

    /// The submission queue did not accept the operation within the
    /// configured deadline; nothing was written to the broker.
    #[error("submission timed out before reaching the network")]
    SubmitTimeout,

    /// Read, write or decode failure on the transport. Fatal.
    #[error("transport failed: {0}")]
    Transport(String),

    /// No PINGRESP arrived within the keep-alive interval. Fatal.
    #[error("keep-alive expired without PINGRESP")]
    KeepAliveLost,

    /// All 65535 packet identifiers are currently in flight.
    #[error("packet identifier space exhausted")]
    IdExhausted,
}
