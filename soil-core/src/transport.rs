//! Link transport boundary. The platform provides the datagram service; the protocol
//! only needs these primitives.

use crate::identity::MacAddress;

/// Receive hook: source address and raw frame. Runs in the transport's own context and
/// must not block.
pub type ReceiveCallback = Box<dyn Fn(MacAddress, &[u8]) + Send + Sync + 'static>;

/// Broadcast/unicast datagram service with a peer table and a single active channel.
///
/// Mutating calls take `&mut self`: only the sending context touches peers and channel.
pub trait LinkTransport {
    /// Queue one frame for `dest`. Completion means handed to the radio, not delivered.
    fn send(&mut self, dest: &MacAddress, bytes: &[u8]) -> Result<(), TransportError>;

    /// Install the receive hook, replacing any previous one.
    fn register_receive_callback(&mut self, callback: ReceiveCallback)
        -> Result<(), TransportError>;

    fn set_active_channel(&mut self, channel: u8) -> Result<(), TransportError>;

    fn active_channel(&self) -> u8;

    /// Succeeds without change if `peer` is already present.
    fn add_peer(&mut self, peer: &MacAddress, channel: u8, encrypt: bool)
        -> Result<(), TransportError>;

    fn remove_peer(&mut self, peer: &MacAddress) -> Result<(), TransportError>;
}

/// Errors reported by a link transport. All of them are recoverable for the sender.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer table full")]
    PeerTableFull,
    #[error("peer {0} not registered")]
    PeerNotFound(MacAddress),
    #[error("peer on channel {peer_channel}, link on channel {active_channel}")]
    ChannelMismatch { peer_channel: u8, active_channel: u8 },
    #[error("illegal channel {0}")]
    IllegalChannel(u8),
    #[error("frame of {0} bytes exceeds link limit")]
    FrameTooLarge(usize),
    #[error("encrypted peers are not supported")]
    EncryptionUnsupported,
    #[error("link closed")]
    Closed,
    #[error("link I/O: {0}")]
    Io(#[from] std::io::Error),
}
