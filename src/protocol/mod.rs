//! MQTT v3.1 control-packet model and wire codec.
//!
//! The packet structs carry exactly the protocol-defined fields; the codec
//! in [`codec`] converts between them and wire frames in both directions,
//! so the same module serves the client pumps, store rehydration, and the
//! scripted brokers used by the integration tests.

pub mod codec;

pub use codec::{read_packet, CodecError};

/// Quality of service for a PUBLISH exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Qos {
    /// At most once (fire and forget).
    AtMostOnce,
    /// At least once (PUBACK acknowledged).
    AtLeastOnce,
    /// Exactly once (PUBREC/PUBREL/PUBCOMP handshake).
    ExactlyOnce,
}

impl Qos {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Last-will message carried in CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// CONNACK carries the broker's verdict; the return code is surfaced
/// verbatim to the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub return_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    /// Present exactly when `qos` is above [`Qos::AtMostOnce`].
    pub packet_id: Option<u16>,
    pub dup: bool,
    pub retain: bool,
}

/// A subscription filter paired with the requested maximum QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: Qos,
}

impl TopicFilter {
    pub fn new(filter: impl Into<String>, qos: Qos) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub granted: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

/// Tagged union over every MQTT v3.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl ControlPacket {
    /// Short label for trace output.
    pub fn label(&self) -> &'static str {
        match self {
            ControlPacket::Connect(_) => "CONNECT",
            ControlPacket::ConnAck(_) => "CONNACK",
            ControlPacket::Publish(_) => "PUBLISH",
            ControlPacket::PubAck(_) => "PUBACK",
            ControlPacket::PubRec(_) => "PUBREC",
            ControlPacket::PubRel(_) => "PUBREL",
            ControlPacket::PubComp(_) => "PUBCOMP",
            ControlPacket::Subscribe(_) => "SUBSCRIBE",
            ControlPacket::SubAck(_) => "SUBACK",
            ControlPacket::Unsubscribe(_) => "UNSUBSCRIBE",
            ControlPacket::UnsubAck(_) => "UNSUBACK",
            ControlPacket::PingReq => "PINGREQ",
            ControlPacket::PingResp => "PINGRESP",
            ControlPacket::Disconnect => "DISCONNECT",
        }
    }
}
