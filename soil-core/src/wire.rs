//! Framing: one link frame per message, no length prefix.
//!
//! Data (61 bytes, little-endian): kind(1) timestamp_ms(8) device_id(32, NUL-padded)
//! soil_voltage(4) soil_moisture_pct(4) soil_raw(4) battery_voltage(4) battery_pct(4).
//! Ack: kind(1).
//!
//! bincode's default `serialize` is fixed-int little-endian with no length prefix for
//! arrays, so the record struct below maps byte-for-byte onto the hub's packed layout.

use serde::{Deserialize, Serialize};

use crate::protocol::{
    Message, MessageKind, SensorReading, ACK_FRAME_LEN, DATA_FRAME_LEN, DEVICE_ID_LEN,
};

#[derive(Serialize, Deserialize)]
struct DataRecord {
    kind: u8,
    timestamp_ms: u64,
    device_id: [u8; DEVICE_ID_LEN],
    soil_voltage: f32,
    soil_moisture_pct: f32,
    soil_raw: i32,
    battery_voltage: f32,
    battery_pct: f32,
}

/// Encode a reading into a Data frame of exactly [`DATA_FRAME_LEN`] bytes.
pub fn encode_data(reading: &SensorReading) -> Result<Vec<u8>, FrameEncodeError> {
    let record = DataRecord {
        kind: MessageKind::Data as u8,
        timestamp_ms: reading.timestamp_ms,
        device_id: pack_device_id(&reading.device_id),
        soil_voltage: reading.soil_voltage,
        soil_moisture_pct: reading.soil_moisture_pct,
        soil_raw: reading.soil_raw,
        battery_voltage: reading.battery_voltage,
        battery_pct: reading.battery_pct,
    };
    let out = bincode::serialize(&record)?;
    if out.len() != DATA_FRAME_LEN {
        return Err(FrameEncodeError::Layout(out.len()));
    }
    Ok(out)
}

/// Ack frame: the discriminator alone.
pub fn encode_ack() -> [u8; ACK_FRAME_LEN] {
    [MessageKind::Ack as u8]
}

/// Encode any message.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    match msg {
        Message::Data(reading) => encode_data(reading),
        Message::Ack => Ok(encode_ack().to_vec()),
    }
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("data record encoded to {0} bytes")]
    Layout(usize),
}

/// Decode one frame. Short frames are rejected whole; bytes past the record are ignored.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, FrameDecodeError> {
    let first = *bytes.first().ok_or(FrameDecodeError::Empty)?;
    match MessageKind::from_byte(first) {
        Some(MessageKind::Ack) => Ok(Message::Ack),
        Some(MessageKind::Data) => {
            if bytes.len() < DATA_FRAME_LEN {
                return Err(FrameDecodeError::Truncated { len: bytes.len() });
            }
            let record: DataRecord = bincode::deserialize(&bytes[..DATA_FRAME_LEN])?;
            Ok(Message::Data(SensorReading {
                device_id: unpack_device_id(&record.device_id),
                timestamp_ms: record.timestamp_ms,
                soil_voltage: record.soil_voltage,
                soil_moisture_pct: record.soil_moisture_pct,
                soil_raw: record.soil_raw,
                battery_voltage: record.battery_voltage,
                battery_pct: record.battery_pct,
            }))
        }
        None => Err(FrameDecodeError::UnknownKind(first)),
    }
}

/// Error decoding a frame (empty, short data record, unknown kind, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("empty frame")]
    Empty,
    #[error("data frame truncated: {len} of {} bytes", DATA_FRAME_LEN)]
    Truncated { len: usize },
    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Copy at most 31 bytes (cut on a char boundary) so the field stays NUL-terminated.
fn pack_device_id(id: &str) -> [u8; DEVICE_ID_LEN] {
    let mut out = [0u8; DEVICE_ID_LEN];
    let mut end = id.len().min(DEVICE_ID_LEN - 1);
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    out[..end].copy_from_slice(&id.as_bytes()[..end]);
    out
}

fn unpack_device_id(raw: &[u8; DEVICE_ID_LEN]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
