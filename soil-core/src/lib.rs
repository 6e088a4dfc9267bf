//! SoilLink protocol reference implementation.
//! Host-driven: no I/O; the host owns the link and the clock, passes results in and
//! receives the next step out.

pub mod config;
pub mod ffi;
pub mod identity;
pub mod peers;
pub mod protocol;
pub mod search;
pub mod transport;
pub mod wire;

pub use config::{ConfigError, SenderConfig, FIRST_CHANNEL, LAST_CHANNEL, WILDCARD_CHANNEL};
pub use identity::{device_id_for, MacAddress};
pub use peers::{PeerError, PeerRegistry};
pub use protocol::{Message, MessageKind, SensorReading, BATTERY_UNAVAILABLE, DATA_FRAME_LEN};
pub use search::{ChannelSearch, SearchMode, SearchOutcome, Step};
pub use transport::{LinkTransport, ReceiveCallback, TransportError};
pub use wire::{decode_frame, encode_ack, encode_data, FrameDecodeError, FrameEncodeError};
