//! MQTT 3.1.1 control packet encoding/decoding: fixed header, variable-length
//! remaining-length field, and the subset of packet types a mock broker
//! needs to drive QoS 0/1/2 flows.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Errors decoding or encoding an MQTT control packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),
    #[error("invalid remaining length encoding")]
    InvalidRemainingLength,
    #[error("invalid QoS level: {0}")]
    InvalidQoS(u8),
    #[error("invalid UTF-8 string in packet")]
    InvalidUtf8,
    #[error("malformed packet")]
    Malformed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// MQTT quality-of-service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ProtocolError::InvalidQoS(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// A decoded MQTT control packet.
#[derive(Debug, Clone)]
pub enum Packet {
    Connect(ConnectPacket),
    Connack { session_present: bool, return_code: u8 },
    Publish(PublishPacket),
    Puback { packet_id: u16 },
    Pubrec { packet_id: u16 },
    Pubrel { packet_id: u16 },
    Pubcomp { packet_id: u16 },
    Subscribe(SubscribePacket),
    Suback { packet_id: u16, return_codes: Vec<u8> },
    Unsubscribe(UnsubscribePacket),
    Unsuback { packet_id: u16 },
    Pingreq,
    Pingresp,
    Disconnect,
}

fn read_string(buf: &mut impl Buf) -> ProtocolResult<String> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Malformed);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Malformed);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

fn write_string(buf: &mut impl BufMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Read the 1-4 byte "remaining length" varint documented in MQTT 3.1.1 §2.2.3.
async fn read_remaining_length<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<usize> {
    let mut multiplier: usize = 1;
    let mut value: usize = 0;
    for _ in 0..4 {
        let byte = reader.read_u8().await?;
        value += (byte & 0x7f) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(ProtocolError::InvalidRemainingLength)
}

fn write_remaining_length(mut len: usize, out: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Read one full control packet off `reader`, or `Ok(None)` on a clean EOF
/// before any bytes of a new packet arrive.
pub async fn read_packet<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Packet>> {
    let first = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let packet_type = first >> 4;
    let flags = first & 0x0f;
    let remaining_len = read_remaining_length(reader).await?;
    let mut body = vec![0u8; remaining_len];
    if remaining_len > 0 {
        reader.read_exact(&mut body).await?;
    }
    let mut buf = &body[..];

    let packet = match packet_type {
        1 => {
            let _protocol_name = read_string(&mut buf)?;
            if buf.remaining() < 4 {
                return Err(ProtocolError::Malformed);
            }
            let _protocol_level = buf.get_u8();
            let connect_flags = buf.get_u8();
            let keep_alive = buf.get_u16();
            let client_id = read_string(&mut buf)?;
            Packet::Connect(ConnectPacket {
                client_id,
                clean_session: connect_flags & 0x02 != 0,
                keep_alive,
            })
        }
        3 => {
            let topic = read_string(&mut buf)?;
            let qos = QoS::try_from((flags >> 1) & 0x03)?;
            let packet_id = if matches!(qos, QoS::AtMostOnce) {
                None
            } else {
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Malformed);
                }
                Some(buf.get_u16())
            };
            let payload = buf.chunk().to_vec();
            Packet::Publish(PublishPacket {
                topic,
                payload,
                qos,
                retain: flags & 0x01 != 0,
                dup: flags & 0x08 != 0,
                packet_id,
            })
        }
        4 => Packet::Puback { packet_id: read_packet_id(&mut buf)? },
        5 => Packet::Pubrec { packet_id: read_packet_id(&mut buf)? },
        6 => Packet::Pubrel { packet_id: read_packet_id(&mut buf)? },
        7 => Packet::Pubcomp { packet_id: read_packet_id(&mut buf)? },
        8 => {
            let packet_id = read_packet_id(&mut buf)?;
            let mut filters = Vec::new();
            while buf.has_remaining() {
                let filter = read_string(&mut buf)?;
                if !buf.has_remaining() {
                    return Err(ProtocolError::Malformed);
                }
                let qos = QoS::try_from(buf.get_u8() & 0x03)?;
                filters.push((filter, qos));
            }
            Packet::Subscribe(SubscribePacket { packet_id, filters })
        }
        10 => {
            let packet_id = read_packet_id(&mut buf)?;
            let mut filters = Vec::new();
            while buf.has_remaining() {
                filters.push(read_string(&mut buf)?);
            }
            Packet::Unsubscribe(UnsubscribePacket { packet_id, filters })
        }
        12 => Packet::Pingreq,
        14 => Packet::Disconnect,
        other => return Err(ProtocolError::InvalidPacketType(other)),
    };
    Ok(Some(packet))
}

fn read_packet_id(buf: &mut impl Buf) -> ProtocolResult<u16> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Malformed);
    }
    Ok(buf.get_u16())
}

/// Write `packet` to `writer`, flushed and fully framed.
pub async fn write_packet<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> ProtocolResult<()> {
    let (packet_type, flags, body) = match packet {
        Packet::Connack { session_present, return_code } => {
            let mut b = BytesMut::new();
            b.put_u8(if *session_present { 1 } else { 0 });
            b.put_u8(*return_code);
            (2u8, 0u8, b)
        }
        Packet::Publish(p) => {
            let mut b = BytesMut::new();
            write_string(&mut b, &p.topic);
            if let Some(id) = p.packet_id {
                b.put_u16(id);
            }
            b.put_slice(&p.payload);
            let mut flags = (p.qos as u8) << 1;
            if p.retain {
                flags |= 0x01;
            }
            if p.dup {
                flags |= 0x08;
            }
            (3u8, flags, b)
        }
        Packet::Puback { packet_id } => (4u8, 0, packet_id_body(*packet_id)),
        Packet::Pubrec { packet_id } => (5u8, 0, packet_id_body(*packet_id)),
        Packet::Pubrel { packet_id } => (6u8, 0x02, packet_id_body(*packet_id)),
        Packet::Pubcomp { packet_id } => (7u8, 0, packet_id_body(*packet_id)),
        Packet::Suback { packet_id, return_codes } => {
            let mut b = BytesMut::new();
            b.put_u16(*packet_id);
            b.put_slice(return_codes);
            (9u8, 0, b)
        }
        Packet::Unsuback { packet_id } => (11u8, 0, packet_id_body(*packet_id)),
        Packet::Pingresp => (13u8, 0, BytesMut::new()),
        other => return Err(ProtocolError::Malformed.tap_unsupported(other)),
    };

    let mut out = BytesMut::new();
    out.put_u8((packet_type << 4) | flags);
    write_remaining_length(body.len(), &mut out);
    out.extend_from_slice(&body);
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

fn packet_id_body(packet_id: u16) -> BytesMut {
    let mut b = BytesMut::new();
    b.put_u16(packet_id);
    b
}

impl ProtocolError {
    fn tap_unsupported(self, packet: &Packet) -> Self {
        tracing::warn!(?packet, "broker does not send this packet type");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_connack_and_publish() {
        let mut buf = Vec::new();
        write_packet(&mut buf, &Packet::Connack { session_present: false, return_code: 0 }).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_packet(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(decoded, Packet::Connack { return_code: 0, .. }));

        let publish = Packet::Publish(PublishPacket {
            topic: "sensors/temp".into(),
            payload: b"42".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
            dup: false,
            packet_id: Some(7),
        });
        let mut buf = Vec::new();
        write_packet(&mut buf, &publish).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_packet(&mut cursor).await.unwrap().unwrap();
        match decoded {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "sensors/temp");
                assert_eq!(p.payload, b"42");
                assert!(p.retain);
                assert_eq!(p.packet_id, Some(7));
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_a_clean_close() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_packet(&mut cursor).await.unwrap().is_none());
    }
}
