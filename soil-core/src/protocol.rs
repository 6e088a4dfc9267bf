//! SoilLink wire protocol: message kinds, the telemetry record and frame sizes.

use serde::{Deserialize, Serialize};

/// Largest payload the link carries in a single frame.
pub const MAX_FRAME_LEN: usize = 250;

/// Size of the NUL-padded device id field.
pub const DEVICE_ID_LEN: usize = 32;

/// Data frame: kind + timestamp + device id + five 4-byte measurements.
pub const DATA_FRAME_LEN: usize = 1 + 8 + DEVICE_ID_LEN + 4 * 5;

/// Ack frame: kind byte only.
pub const ACK_FRAME_LEN: usize = 1;

/// Battery percent value meaning "no battery reading".
pub const BATTERY_UNAVAILABLE: f32 = -1.0;

const _: () = assert!(DATA_FRAME_LEN <= MAX_FRAME_LEN);

/// First byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Data = 0x00,
    Ack = 0x01,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(MessageKind::Data),
            0x01 => Some(MessageKind::Ack),
            _ => None,
        }
    }
}

/// One telemetry record per wake cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub device_id: String,
    /// Milliseconds; monotonic on the node.
    pub timestamp_ms: u64,
    pub soil_voltage: f32,
    /// 0-100.
    pub soil_moisture_pct: f32,
    pub soil_raw: i32,
    pub battery_voltage: f32,
    /// 0-100, or [`BATTERY_UNAVAILABLE`].
    pub battery_pct: f32,
}

impl SensorReading {
    pub fn has_battery(&self) -> bool {
        self.battery_pct >= 0.0
    }
}

/// All frames on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Data(SensorReading),
    Ack,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Data(_) => MessageKind::Data,
            Message::Ack => MessageKind::Ack,
        }
    }
}
