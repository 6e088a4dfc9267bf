//! Peer registry: which addresses this node has registered with the transport, and on
//! which channel.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::identity::MacAddress;
use crate::transport::{LinkTransport, TransportError};

/// Tracks peers added through it. A channel change goes through [`PeerRegistry::rehome`]
/// because the transport cannot update a peer in place.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<MacAddress, u8>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Add `peer` on `channel` unless already registered. An existing entry keeps its channel.
    pub fn ensure_peer<T: LinkTransport + ?Sized>(
        &mut self,
        link: &mut T,
        peer: MacAddress,
        channel: u8,
    ) -> Result<(), PeerError> {
        if self.peers.contains_key(&peer) {
            return Ok(());
        }
        link.add_peer(&peer, channel, false)?;
        self.peers.insert(peer, channel);
        debug!(%peer, channel, "peer added");
        Ok(())
    }

    /// Remove then re-add `peer` on `channel`. Absence before the call is fine.
    /// On failure the peer is left unregistered.
    pub fn rehome<T: LinkTransport + ?Sized>(
        &mut self,
        link: &mut T,
        peer: MacAddress,
        channel: u8,
    ) -> Result<(), PeerError> {
        if peer.is_broadcast() {
            return Err(PeerError::BroadcastRehome);
        }
        match link.remove_peer(&peer) {
            Ok(()) | Err(TransportError::PeerNotFound(_)) => {}
            Err(e) => debug!(%peer, error = %e, "remove before rehome failed"),
        }
        self.peers.remove(&peer);
        link.add_peer(&peer, channel, false)?;
        self.peers.insert(peer, channel);
        debug!(%peer, channel, "peer rehomed");
        Ok(())
    }

    /// Remove `peer` if registered here; no-op otherwise.
    pub fn remove_peer<T: LinkTransport + ?Sized>(
        &mut self,
        link: &mut T,
        peer: MacAddress,
    ) -> Result<(), PeerError> {
        if self.peers.remove(&peer).is_none() {
            return Ok(());
        }
        match link.remove_peer(&peer) {
            Ok(()) | Err(TransportError::PeerNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every registered peer. Failures are logged; the registry ends up empty.
    pub fn remove_all<T: LinkTransport + ?Sized>(&mut self, link: &mut T) {
        for (peer, _) in self.peers.drain() {
            match link.remove_peer(&peer) {
                Ok(()) | Err(TransportError::PeerNotFound(_)) => debug!(%peer, "peer removed"),
                Err(e) => warn!(%peer, error = %e, "failed to remove peer"),
            }
        }
    }

    pub fn channel_of(&self, peer: &MacAddress) -> Option<u8> {
        self.peers.get(peer).copied()
    }

    pub fn contains(&self, peer: &MacAddress) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("broadcast address is channel-agnostic and is never rehomed")]
    BroadcastRehome,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
