use std::net::SocketAddr;

use super::stream::{NetReader, NetWriter, StreamError};
use super::update::UpdateMessage;

/// seq(2) + confirm(2) + peer(2) + type(1) + action(8) + timestamp(8) + two flag bytes.
pub const HEADER_LEN: usize = 25;
pub const APP_ID_LEN: usize = 2;
/// Largest payload of a single IPv4 UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
pub const DEFAULT_RECEIVE_BUFFER: usize = 10_000;

const SEQUENCE_WRAP_THRESHOLD: u16 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    DiscoverRequest = 1,
    DiscoverResponse = 2,
    ConnectRequest = 3,
    ConnectResponse = 4,
    Data = 5,
    Accept = 6,
    Disconnect = 7,
    Beacon = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::DiscoverRequest,
            2 => Self::DiscoverResponse,
            3 => Self::ConnectRequest,
            4 => Self::ConnectResponse,
            5 => Self::Data,
            6 => Self::Accept,
            7 => Self::Disconnect,
            8 => Self::Beacon,
            other => return Err(PacketError::UnknownMessageType(other)),
        })
    }
}

/// Whether `s1` is newer than `s2`, treating a gap wider than half the
/// sequence space as a wrap past zero.
#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("frame of {0} bytes is shorter than a header")]
    Truncated(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    /// 0 means no sequence was assigned.
    pub sequence_id: u16,
    /// Sequence id of a reliable message being acknowledged, 0 if none.
    pub confirm_id: u16,
    pub peer_id: u16,
    pub message_type: MessageType,
    pub action: i64,
    pub timestamp: f64,
    pub is_reliable: bool,
    pub is_update_sample: bool,
}

impl MessageHeader {
    pub fn new(sequence_id: u16, peer_id: u16, message_type: MessageType) -> Self {
        Self {
            sequence_id,
            confirm_id: 0,
            peer_id,
            message_type,
            action: 0,
            timestamp: 0.0,
            is_reliable: false,
            is_update_sample: false,
        }
    }

    pub fn save_to_stream(&self, writer: &mut NetWriter) -> Result<(), StreamError> {
        writer.write_u16(self.sequence_id)?;
        writer.write_u16(self.confirm_id)?;
        writer.write_u16(self.peer_id)?;
        writer.write_u8(self.message_type as u8)?;
        writer.write_i64(self.action)?;
        writer.write_float(self.timestamp)?;
        writer.write_bool(self.is_reliable)?;
        writer.write_bool(self.is_update_sample)
    }

    pub fn load_from_stream(reader: &mut NetReader<'_>) -> Result<Self, PacketError> {
        let sequence_id = reader.read_u16()?;
        let confirm_id = reader.read_u16()?;
        let peer_id = reader.read_u16()?;
        let message_type = MessageType::try_from(reader.read_u8()?)?;
        let action = reader.read_i64()?;
        let timestamp = reader.read_float()?;
        let is_reliable = reader.read_bool()?;
        let is_update_sample = reader.read_bool()?;

        Ok(Self {
            sequence_id,
            confirm_id,
            peer_id,
            message_type,
            action,
            timestamp,
            is_reliable,
            is_update_sample,
        })
    }
}

pub trait NetData {
    fn load_from_stream(&mut self, reader: &mut NetReader<'_>) -> Result<(), StreamError>;

    fn save_to_stream(&self, writer: &mut NetWriter) -> Result<(), StreamError>;

    /// Exact number of bytes `save_to_stream` writes.
    fn data_length(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Update(UpdateMessage),
    Raw(Vec<u8>),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Raw(Vec::new())
    }
}

impl From<UpdateMessage> for Payload {
    fn from(message: UpdateMessage) -> Self {
        Self::Update(message)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl NetData for Payload {
    fn load_from_stream(&mut self, reader: &mut NetReader<'_>) -> Result<(), StreamError> {
        match self {
            Self::Update(message) => message.load_from_stream(reader),
            Self::Raw(bytes) => {
                let rest = reader.read_bytes(reader.remaining())?;
                bytes.clear();
                bytes.extend_from_slice(rest);
                Ok(())
            }
        }
    }

    fn save_to_stream(&self, writer: &mut NetWriter) -> Result<(), StreamError> {
        match self {
            Self::Update(message) => message.save_to_stream(writer),
            Self::Raw(bytes) => writer.write_bytes(bytes),
        }
    }

    fn data_length(&self) -> usize {
        match self {
            Self::Update(message) => message.data_length(),
            Self::Raw(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub header: MessageHeader,
    pub payload: Option<Payload>,
}

impl OutgoingMessage {
    pub fn new(sequence_id: u16, peer_id: u16, message_type: MessageType) -> Self {
        Self {
            header: MessageHeader::new(sequence_id, peer_id, message_type),
            payload: None,
        }
    }

    /// Application message; sequence and peer ids are filled in when it is flushed.
    pub fn data(action: i64) -> Self {
        Self::new(0, 0, MessageType::Data).with_action(action)
    }

    pub fn with_action(mut self, action: i64) -> Self {
        self.header.action = action;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    pub fn reliable(mut self, is_reliable: bool) -> Self {
        self.header.is_reliable = is_reliable;
        self
    }

    pub fn update_sample(mut self, is_update_sample: bool) -> Self {
        self.header.is_update_sample = is_update_sample;
        self
    }

    pub fn message_length(&self) -> usize {
        HEADER_LEN + self.payload.as_ref().map_or(0, |payload| payload.data_length())
    }

    pub fn save_to_stream(&self, writer: &mut NetWriter) -> Result<(), StreamError> {
        self.header.save_to_stream(writer)?;
        if let Some(payload) = &self.payload {
            payload.save_to_stream(writer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub header: MessageHeader,
    source: SocketAddr,
    data: Vec<u8>,
    data_length: usize,
}

impl IncomingMessage {
    /// `message_length` covers header and payload, without the application id.
    pub fn new(message_length: usize, source: SocketAddr) -> Result<Self, PacketError> {
        if message_length < HEADER_LEN {
            return Err(PacketError::Truncated(message_length));
        }
        Ok(Self {
            header: MessageHeader::new(0, 0, MessageType::Data),
            source,
            data: Vec::new(),
            data_length: message_length - HEADER_LEN,
        })
    }

    pub fn load_from_stream(&mut self, reader: &mut NetReader<'_>) -> Result<(), PacketError> {
        self.header = MessageHeader::load_from_stream(reader)?;
        self.data = reader.read_bytes(self.data_length)?.to_vec();
        Ok(())
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn data_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn message_length(&self) -> usize {
        HEADER_LEN + self.data_length
    }

    pub fn parse_into<D: NetData>(&self, output: &mut D) -> Result<(), StreamError> {
        let mut reader = NetReader::new(&self.data);
        output.load_from_stream(&mut reader)
    }

    pub fn parse_data<D: NetData + Default>(&self) -> Result<D, StreamError> {
        let mut output = D::default();
        self.parse_into(&mut output)?;
        Ok(output)
    }
}

pub fn encode_frame(application_id: u16, message: &OutgoingMessage) -> Result<Vec<u8>, StreamError> {
    let mut writer = NetWriter::new(APP_ID_LEN + message.message_length());
    writer.write_u16(application_id)?;
    message.save_to_stream(&mut writer)?;
    Ok(writer.into_bytes())
}

/// Decodes a datagram, returning `None` when it belongs to another application.
pub fn decode_frame(
    application_id: u16,
    frame: &[u8],
    source: SocketAddr,
) -> Result<Option<IncomingMessage>, PacketError> {
    let mut reader = NetReader::new(frame);
    if reader.read_u16()? != application_id {
        return Ok(None);
    }
    let mut message = IncomingMessage::new(frame.len() - APP_ID_LEN, source)?;
    message.load_from_stream(&mut reader)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(5, 5));
        assert!(sequence_greater_than(3, 65530));
        assert!(!sequence_greater_than(65530, 3));
        assert!(sequence_greater_than(40000, 10000));
        assert!(!sequence_greater_than(50000, 10000));
    }

    #[test]
    fn test_header_is_25_bytes() {
        let message = OutgoingMessage::new(1, 2, MessageType::Beacon);
        let mut writer = NetWriter::new(64);
        message.save_to_stream(&mut writer).unwrap();
        assert_eq!(writer.used_bytes(), 25);
        assert_eq!(message.message_length(), 25);

        let frame = encode_frame(7, &message.clone().with_payload(vec![0u8; 4])).unwrap();
        assert_eq!(frame.len(), 2 + 25 + 4);
        assert_eq!(&frame[..2], &[0, 7]);
        assert_eq!(&frame[2..4], &[0, 1]);
        assert_eq!(frame[APP_ID_LEN + 6], MessageType::Beacon as u8);
    }

    #[test]
    fn test_control_message_encodes() {
        let frame = encode_frame(7, &OutgoingMessage::new(0, 0, MessageType::ConnectRequest))
            .unwrap();
        assert_eq!(frame.len(), 27);
        let decoded = decode_frame(7, &frame, source()).unwrap().unwrap();
        assert_eq!(decoded.header.message_type, MessageType::ConnectRequest);
        assert_eq!(decoded.data_length(), 0);
    }

    #[test]
    fn test_frame_round_trip() {
        let mut message = OutgoingMessage::data(-42)
            .with_payload(vec![9u8, 8, 7])
            .with_timestamp(1234.56789)
            .reliable(true)
            .update_sample(false);
        message.header.sequence_id = 65535;
        message.header.confirm_id = 17;
        message.header.peer_id = 3;

        let frame = encode_frame(77, &message).unwrap();
        assert_eq!(frame.len(), 2 + 25 + 3);

        let decoded = decode_frame(77, &frame, source()).unwrap().unwrap();
        assert_eq!(decoded.header.sequence_id, 65535);
        assert_eq!(decoded.header.confirm_id, 17);
        assert_eq!(decoded.header.peer_id, 3);
        assert_eq!(decoded.header.message_type, MessageType::Data);
        assert_eq!(decoded.header.action, -42);
        assert!((decoded.header.timestamp - 1234.56789).abs() <= 1e-5);
        assert!(decoded.header.is_reliable);
        assert!(!decoded.header.is_update_sample);
        assert_eq!(decoded.data_raw(), &[9, 8, 7]);
        assert_eq!(decoded.source(), source());
        assert_eq!(decoded.message_length(), HEADER_LEN + 3);
    }

    #[test]
    fn test_foreign_application_is_ignored() {
        let message = OutgoingMessage::new(0, 0, MessageType::DiscoverRequest);
        let frame = encode_frame(1, &message).unwrap();
        assert!(decode_frame(2, &frame, source()).unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame() {
        let message = OutgoingMessage::new(0, 0, MessageType::Beacon);
        let frame = encode_frame(1, &message).unwrap();
        let result = decode_frame(1, &frame[..10], source());
        assert!(matches!(result, Err(PacketError::Truncated(8))));
    }

    #[test]
    fn test_unknown_message_type() {
        let message = OutgoingMessage::new(0, 0, MessageType::Beacon);
        let mut frame = encode_frame(1, &message).unwrap();
        frame[APP_ID_LEN + 6] = 42;
        let result = decode_frame(1, &frame, source());
        assert!(matches!(result, Err(PacketError::UnknownMessageType(42))));
    }

    #[test]
    fn test_parse_raw_payload() {
        let message = OutgoingMessage::data(1).with_payload(vec![1u8, 2, 3, 4]);
        let frame = encode_frame(5, &message).unwrap();
        let decoded = decode_frame(5, &frame, source()).unwrap().unwrap();

        let payload: Payload = decoded.parse_data().unwrap();
        assert_eq!(payload, Payload::Raw(vec![1, 2, 3, 4]));
    }
}
