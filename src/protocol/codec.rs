//! Wire codec for MQTT v3.1 frames.
//!
//! Encoding always produces a complete frame (fixed header, remaining
//! length, body) as `Vec<u8>`; decoding works either from a full frame
//! slice (store rehydration) or incrementally from an async reader (the
//! incoming pump). The protocol name is `MQIsdp` at level 3.

use super::{
    ConnAckPacket, ConnectPacket, ControlPacket, PublishPacket, Qos, SubAckPacket, SubscribePacket,
    TopicFilter, UnsubscribePacket, Will,
};
use thiserror::Error;
use tokio::io::AsyncReadExt;

const PROTOCOL_NAME: &str = "MQIsdp";
const PROTOCOL_LEVEL: u8 = 3;

/// Largest value the 1-4 byte remaining-length field can express.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("transport read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),
    #[error("packet truncated")]
    Truncated,
}

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::Malformed(msg.into())
}

// ---------------------------------------------------------------------------
// Remaining length
// ---------------------------------------------------------------------------

/// Encode the MQTT variable-length integer (1-4 bytes).
pub fn encode_remaining_length(mut len: usize) -> Vec<u8> {
    debug_assert!(len <= MAX_REMAINING_LENGTH);
    let mut out = Vec::with_capacity(4);
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return out;
        }
    }
}

fn decode_remaining_length(buf: &[u8], cursor: &mut usize) -> Result<usize, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    loop {
        let byte = *buf.get(*cursor).ok_or(CodecError::Truncated)?;
        *cursor += 1;
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return Err(malformed("remaining length exceeds four bytes"));
        }
    }
}

async fn decode_remaining_length_stream<S: AsyncReadExt + Unpin>(
    stream: &mut S,
) -> Result<usize, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        value += (byte[0] & 0x7F) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return Err(malformed("remaining length exceeds four bytes"));
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor helpers
// ---------------------------------------------------------------------------

fn read_u8(buf: &[u8], cursor: &mut usize) -> Result<u8, CodecError> {
    let byte = *buf.get(*cursor).ok_or(CodecError::Truncated)?;
    *cursor += 1;
    Ok(byte)
}

fn read_u16(buf: &[u8], cursor: &mut usize) -> Result<u16, CodecError> {
    let hi = read_u8(buf, cursor)?;
    let lo = read_u8(buf, cursor)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

fn read_bytes<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a [u8], CodecError> {
    let len = read_u16(buf, cursor)? as usize;
    let end = cursor.checked_add(len).ok_or(CodecError::Truncated)?;
    let slice = buf.get(*cursor..end).ok_or(CodecError::Truncated)?;
    *cursor = end;
    Ok(slice)
}

fn read_string(buf: &[u8], cursor: &mut usize) -> Result<String, CodecError> {
    let bytes = read_bytes(buf, cursor)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed("string field is not UTF-8"))
}

fn push_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn push_bytes(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

fn frame(first_byte: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(first_byte);
    out.extend(encode_remaining_length(body.len()));
    out.extend(body);
    out
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

impl ControlPacket {
    /// Encode a complete wire frame.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlPacket::Connect(connect) => encode_connect(connect),
            ControlPacket::ConnAck(ack) => frame(0x20, vec![0x00, ack.return_code]),
            ControlPacket::Publish(publish) => encode_publish(publish),
            ControlPacket::PubAck(id) => frame(0x40, id.to_be_bytes().to_vec()),
            ControlPacket::PubRec(id) => frame(0x50, id.to_be_bytes().to_vec()),
            // PUBREL carries the QoS 1 bit in its fixed header.
            ControlPacket::PubRel(id) => frame(0x62, id.to_be_bytes().to_vec()),
            ControlPacket::PubComp(id) => frame(0x70, id.to_be_bytes().to_vec()),
            ControlPacket::Subscribe(sub) => encode_subscribe(sub),
            ControlPacket::SubAck(ack) => {
                let mut body = ack.packet_id.to_be_bytes().to_vec();
                body.extend_from_slice(&ack.granted);
                frame(0x90, body)
            }
            ControlPacket::Unsubscribe(unsub) => encode_unsubscribe(unsub),
            ControlPacket::UnsubAck(id) => frame(0xB0, id.to_be_bytes().to_vec()),
            ControlPacket::PingReq => vec![0xC0, 0x00],
            ControlPacket::PingResp => vec![0xD0, 0x00],
            ControlPacket::Disconnect => vec![0xE0, 0x00],
        }
    }

    /// Decode one packet from a complete frame slice.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = 0usize;
        let first = read_u8(frame, &mut cursor)?;
        let remaining = decode_remaining_length(frame, &mut cursor)?;
        let end = cursor.checked_add(remaining).ok_or(CodecError::Truncated)?;
        let body = frame.get(cursor..end).ok_or(CodecError::Truncated)?;
        parse_body(first >> 4, first & 0x0F, body)
    }
}

fn encode_connect(connect: &ConnectPacket) -> Vec<u8> {
    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &connect.will {
        flags |= 0x04;
        flags |= will.qos.as_byte() << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }

    let mut body = Vec::new();
    push_string(&mut body, PROTOCOL_NAME);
    body.push(PROTOCOL_LEVEL);
    body.push(flags);
    body.extend_from_slice(&connect.keep_alive.to_be_bytes());
    push_string(&mut body, &connect.client_id);
    if let Some(will) = &connect.will {
        push_string(&mut body, &will.topic);
        push_bytes(&mut body, &will.payload);
    }
    if let Some(username) = &connect.username {
        push_string(&mut body, username);
    }
    if let Some(password) = &connect.password {
        push_bytes(&mut body, password);
    }
    frame(0x10, body)
}

fn encode_publish(publish: &PublishPacket) -> Vec<u8> {
    let mut first = 0x30u8;
    if publish.dup {
        first |= 0x08;
    }
    first |= publish.qos.as_byte() << 1;
    if publish.retain {
        first |= 0x01;
    }

    let mut body = Vec::new();
    push_string(&mut body, &publish.topic);
    if publish.qos != Qos::AtMostOnce {
        // Encoding a QoS >= 1 publish without an id is a caller bug; the
        // logic core always assigns one before encoding.
        let id = publish.packet_id.unwrap_or_default();
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.extend_from_slice(&publish.payload);
    frame(first, body)
}

fn encode_subscribe(sub: &SubscribePacket) -> Vec<u8> {
    let mut body = sub.packet_id.to_be_bytes().to_vec();
    for filter in &sub.filters {
        push_string(&mut body, &filter.filter);
        body.push(filter.qos.as_byte());
    }
    // SUBSCRIBE carries the QoS 1 bit in its fixed header.
    frame(0x82, body)
}

fn encode_unsubscribe(unsub: &UnsubscribePacket) -> Vec<u8> {
    let mut body = unsub.packet_id.to_be_bytes().to_vec();
    for topic in &unsub.topics {
        push_string(&mut body, topic);
    }
    frame(0xA2, body)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Read and decode one control packet from the stream.
pub async fn read_packet<S: AsyncReadExt + Unpin>(
    stream: &mut S,
) -> Result<ControlPacket, CodecError> {
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await?;
    let remaining = decode_remaining_length_stream(stream).await?;
    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await?;
    parse_body(first[0] >> 4, first[0] & 0x0F, &body)
}

fn parse_body(packet_type: u8, flags: u8, body: &[u8]) -> Result<ControlPacket, CodecError> {
    match packet_type {
        1 => Ok(ControlPacket::Connect(parse_connect(body)?)),
        2 => Ok(ControlPacket::ConnAck(parse_connack(body)?)),
        3 => Ok(ControlPacket::Publish(parse_publish(flags, body)?)),
        4 => Ok(ControlPacket::PubAck(parse_packet_id(body)?)),
        5 => Ok(ControlPacket::PubRec(parse_packet_id(body)?)),
        6 => Ok(ControlPacket::PubRel(parse_packet_id(body)?)),
        7 => Ok(ControlPacket::PubComp(parse_packet_id(body)?)),
        8 => Ok(ControlPacket::Subscribe(parse_subscribe(body)?)),
        9 => Ok(ControlPacket::SubAck(parse_suback(body)?)),
        10 => Ok(ControlPacket::Unsubscribe(parse_unsubscribe(body)?)),
        11 => Ok(ControlPacket::UnsubAck(parse_packet_id(body)?)),
        12 => Ok(ControlPacket::PingReq),
        13 => Ok(ControlPacket::PingResp),
        14 => Ok(ControlPacket::Disconnect),
        other => Err(CodecError::UnsupportedType(other)),
    }
}

fn parse_connect(buf: &[u8]) -> Result<ConnectPacket, CodecError> {
    let mut cursor = 0usize;
    let proto_name = read_string(buf, &mut cursor)?;
    if proto_name != PROTOCOL_NAME {
        return Err(malformed(format!("unexpected protocol name {proto_name}")));
    }
    let proto_level = read_u8(buf, &mut cursor)?;
    if proto_level != PROTOCOL_LEVEL {
        return Err(malformed(format!("unsupported protocol level {proto_level}")));
    }
    let connect_flags = read_u8(buf, &mut cursor)?;
    let keep_alive = read_u16(buf, &mut cursor)?;
    let client_id = read_string(buf, &mut cursor)?;

    let clean_session = connect_flags & 0x02 != 0;
    let will_flag = connect_flags & 0x04 != 0;
    let will = if will_flag {
        let qos = Qos::from_byte((connect_flags >> 3) & 0x03)
            .ok_or_else(|| malformed("invalid will QoS"))?;
        let topic = read_string(buf, &mut cursor)?;
        let payload = read_bytes(buf, &mut cursor)?.to_vec();
        Some(Will {
            topic,
            payload,
            qos,
            retain: connect_flags & 0x20 != 0,
        })
    } else {
        None
    };

    let username = if connect_flags & 0x80 != 0 {
        Some(read_string(buf, &mut cursor)?)
    } else {
        None
    };
    let password = if connect_flags & 0x40 != 0 {
        Some(read_bytes(buf, &mut cursor)?.to_vec())
    } else {
        None
    };

    Ok(ConnectPacket {
        client_id,
        keep_alive,
        clean_session,
        will,
        username,
        password,
    })
}

fn parse_connack(buf: &[u8]) -> Result<ConnAckPacket, CodecError> {
    let mut cursor = 0usize;
    let _reserved = read_u8(buf, &mut cursor)?;
    let return_code = read_u8(buf, &mut cursor)?;
    Ok(ConnAckPacket { return_code })
}

fn parse_publish(flags: u8, buf: &[u8]) -> Result<PublishPacket, CodecError> {
    let qos = Qos::from_byte((flags >> 1) & 0x03).ok_or_else(|| malformed("invalid QoS bits"))?;
    let mut cursor = 0usize;
    let topic = read_string(buf, &mut cursor)?;
    let packet_id = if qos != Qos::AtMostOnce {
        Some(read_u16(buf, &mut cursor)?)
    } else {
        None
    };
    let payload = buf.get(cursor..).ok_or(CodecError::Truncated)?.to_vec();
    Ok(PublishPacket {
        topic,
        payload,
        qos,
        packet_id,
        dup: flags & 0x08 != 0,
        retain: flags & 0x01 != 0,
    })
}

fn parse_packet_id(buf: &[u8]) -> Result<u16, CodecError> {
    let mut cursor = 0usize;
    read_u16(buf, &mut cursor)
}

fn parse_subscribe(buf: &[u8]) -> Result<SubscribePacket, CodecError> {
    let mut cursor = 0usize;
    let packet_id = read_u16(buf, &mut cursor)?;
    let mut filters = Vec::new();
    while cursor < buf.len() {
        let filter = read_string(buf, &mut cursor)?;
        let qos = Qos::from_byte(read_u8(buf, &mut cursor)?)
            .ok_or_else(|| malformed("invalid subscription QoS"))?;
        filters.push(TopicFilter { filter, qos });
    }
    if filters.is_empty() {
        return Err(malformed("SUBSCRIBE with no filters"));
    }
    Ok(SubscribePacket { packet_id, filters })
}

fn parse_suback(buf: &[u8]) -> Result<SubAckPacket, CodecError> {
    let mut cursor = 0usize;
    let packet_id = read_u16(buf, &mut cursor)?;
    let granted = buf.get(cursor..).ok_or(CodecError::Truncated)?.to_vec();
    Ok(SubAckPacket { packet_id, granted })
}

fn parse_unsubscribe(buf: &[u8]) -> Result<UnsubscribePacket, CodecError> {
    let mut cursor = 0usize;
    let packet_id = read_u16(buf, &mut cursor)?;
    let mut topics = Vec::new();
    while cursor < buf.len() {
        topics.push(read_string(buf, &mut cursor)?);
    }
    if topics.is_empty() {
        return Err(malformed("UNSUBSCRIBE with no topics"));
    }
    Ok(UnsubscribePacket { packet_id, topics })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_length_boundaries() {
        assert_eq!(encode_remaining_length(0), vec![0x00]);
        assert_eq!(encode_remaining_length(127), vec![0x7F]);
        assert_eq!(encode_remaining_length(128), vec![0x80, 0x01]);
        assert_eq!(encode_remaining_length(16_383), vec![0xFF, 0x7F]);
        assert_eq!(encode_remaining_length(16_384), vec![0x80, 0x80, 0x01]);

        for len in [0usize, 127, 128, 16_383, 16_384, 2_097_152] {
            let encoded = encode_remaining_length(len);
            let mut cursor = 0;
            assert_eq!(decode_remaining_length(&encoded, &mut cursor).unwrap(), len);
        }
    }

    #[test]
    fn test_remaining_length_rejects_five_bytes() {
        let mut cursor = 0;
        let err = decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01], &mut cursor);
        assert!(err.is_err());
    }

    #[test]
    fn test_connect_round_trip_with_will_and_credentials() {
        let packet = ControlPacket::Connect(ConnectPacket {
            client_id: "sensor-9".into(),
            keep_alive: 30,
            clean_session: true,
            will: Some(Will {
                topic: "status/sensor-9".into(),
                payload: b"offline".to_vec(),
                qos: Qos::AtLeastOnce,
                retain: true,
            }),
            username: Some("user".into()),
            password: Some(b"pass".to_vec()),
        });
        let decoded = ControlPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_publish_qos0_has_no_packet_id() {
        let packet = ControlPacket::Publish(PublishPacket {
            topic: "a/b".into(),
            payload: b"hi".to_vec(),
            qos: Qos::AtMostOnce,
            packet_id: None,
            dup: false,
            retain: false,
        });
        let frame = packet.encode();
        // fixed header + len + topic length prefix + "a/b" + payload
        assert_eq!(frame.len(), 2 + 2 + 3 + 2);
        assert_eq!(ControlPacket::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_publish_flags_round_trip() {
        let packet = ControlPacket::Publish(PublishPacket {
            topic: "t".into(),
            payload: vec![1, 2, 3],
            qos: Qos::ExactlyOnce,
            packet_id: Some(77),
            dup: true,
            retain: true,
        });
        let frame = packet.encode();
        assert_eq!(frame[0], 0x30 | 0x08 | 0x04 | 0x01);
        assert_eq!(ControlPacket::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn test_pubrel_fixed_header_carries_qos_bit() {
        let frame = ControlPacket::PubRel(9).encode();
        assert_eq!(frame[0], 0x62);
        assert_eq!(ControlPacket::decode(&frame).unwrap(), ControlPacket::PubRel(9));
    }

    #[test]
    fn test_subscribe_round_trip() {
        let packet = ControlPacket::Subscribe(SubscribePacket {
            packet_id: 3,
            filters: vec![
                TopicFilter::new("sport/+/score", Qos::AtLeastOnce),
                TopicFilter::new("sport/#", Qos::ExactlyOnce),
            ],
        });
        assert_eq!(ControlPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_connack_return_code_is_verbatim() {
        for code in 0u8..=5 {
            let frame = ControlPacket::ConnAck(ConnAckPacket { return_code: code }).encode();
            match ControlPacket::decode(&frame).unwrap() {
                ControlPacket::ConnAck(ack) => assert_eq!(ack.return_code, code),
                other => panic!("unexpected packet {other:?}"),
            }
        }
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let mut frame = ControlPacket::Subscribe(SubscribePacket {
            packet_id: 1,
            filters: vec![TopicFilter::new("a/b", Qos::AtMostOnce)],
        })
        .encode();
        frame.truncate(frame.len() - 2);
        assert!(ControlPacket::decode(&frame).is_err());
    }

    #[tokio::test]
    async fn test_read_packet_from_stream() {
        let packet = ControlPacket::Publish(PublishPacket {
            topic: "x/y".into(),
            payload: b"m".to_vec(),
            qos: Qos::AtLeastOnce,
            packet_id: Some(4),
            dup: false,
            retain: false,
        });
        let mut stream = std::io::Cursor::new(packet.encode());
        let decoded = read_packet(&mut stream).await.unwrap();
        assert_eq!(decoded, packet);
    }
}
