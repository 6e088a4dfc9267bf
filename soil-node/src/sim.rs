//! Scripted in-memory link: simulated hubs answer Data frames on their channel, and every
//! send, channel switch and peer operation is recorded. Drives the `send --sim-hub` mode
//! and the protocol tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use soil_core::config::{is_legal_channel, WILDCARD_CHANNEL};
use soil_core::protocol::MAX_FRAME_LEN;
use soil_core::{
    decode_frame, encode_ack, LinkTransport, MacAddress, Message, ReceiveCallback,
    TransportError,
};

/// Peer table size of the reference radio.
pub const SIM_MAX_PEERS: usize = 20;

/// A simulated hub: acks Data frames addressed to it (or broadcast) on `channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimHub {
    pub address: MacAddress,
    pub channel: u8,
}

impl std::str::FromStr for SimHub {
    type Err = String;

    /// `AA:BB:CC:DD:EE:FF@5`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mac, ch) = s
            .split_once('@')
            .ok_or_else(|| format!("expected MAC@CHANNEL, got {:?}", s))?;
        let address = mac.parse::<MacAddress>().map_err(|e| e.to_string())?;
        let channel = ch
            .parse::<u8>()
            .ok()
            .filter(|c| is_legal_channel(*c))
            .ok_or_else(|| format!("bad channel {:?}", ch))?;
        Ok(SimHub { address, channel })
    }
}

/// One recorded send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub dest: MacAddress,
    pub channel: u8,
    pub bytes: Vec<u8>,
}

/// Everything the link was asked to do, in order per kind.
#[derive(Debug, Default, Clone)]
pub struct SimRecord {
    pub sends: Vec<SentFrame>,
    pub channel_sets: Vec<u8>,
    pub peer_adds: Vec<(MacAddress, u8)>,
    pub peer_removes: Vec<MacAddress>,
}

impl SimRecord {
    /// Channel of every send, in order.
    pub fn send_channels(&self) -> Vec<u8> {
        self.sends.iter().map(|s| s.channel).collect()
    }
}

#[derive(Default)]
struct SimState {
    active: u8,
    peers: HashMap<MacAddress, u8>,
    capacity: usize,
    hubs: Vec<SimHub>,
    ack_delay: Option<Duration>,
    fail_sends: bool,
    callback: Option<Arc<ReceiveCallback>>,
    record: SimRecord,
}

/// Cloneable handle; clones share state, so a test keeps one while the sender owns another.
#[derive(Clone)]
pub struct SimLink {
    state: Arc<Mutex<SimState>>,
}

impl SimLink {
    pub fn new(channel: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                active: channel,
                capacity: SIM_MAX_PEERS,
                ..SimState::default()
            })),
        }
    }

    pub fn with_hub(self, hub: SimHub) -> Self {
        self.lock().hubs.push(hub);
        self
    }

    /// Deliver acks from a spawned task after `delay` instead of inline. Needs a tokio runtime.
    pub fn with_ack_delay(self, delay: Duration) -> Self {
        self.lock().ack_delay = Some(delay);
        self
    }

    pub fn with_peer_capacity(self, capacity: usize) -> Self {
        self.lock().capacity = capacity;
        self
    }

    /// Every send fails at the radio.
    pub fn with_failing_sends(self) -> Self {
        self.lock().fail_sends = true;
        self
    }

    pub fn record(&self) -> SimRecord {
        self.lock().record.clone()
    }

    pub fn peers(&self) -> HashMap<MacAddress, u8> {
        self.lock().peers.clone()
    }

    pub fn has_callback(&self) -> bool {
        self.lock().callback.is_some()
    }

    /// Hand a frame to the registered receive hook as if it came over the air.
    pub fn inject(&self, source: MacAddress, bytes: &[u8]) {
        let callback = self.lock().callback.clone();
        if let Some(cb) = callback {
            cb(source, bytes);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock is a test failure already; keep the state usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LinkTransport for SimLink {
    fn send(&mut self, dest: &MacAddress, bytes: &[u8]) -> Result<(), TransportError> {
        let (responders, callback, delay) = {
            let mut st = self.lock();
            if bytes.len() > MAX_FRAME_LEN {
                return Err(TransportError::FrameTooLarge(bytes.len()));
            }
            let peer_channel = *st
                .peers
                .get(dest)
                .ok_or(TransportError::PeerNotFound(*dest))?;
            if peer_channel != WILDCARD_CHANNEL && peer_channel != st.active {
                return Err(TransportError::ChannelMismatch {
                    peer_channel,
                    active_channel: st.active,
                });
            }
            let channel = st.active;
            st.record.sends.push(SentFrame {
                dest: *dest,
                channel,
                bytes: bytes.to_vec(),
            });
            if st.fail_sends {
                return Err(TransportError::Closed);
            }
            if !matches!(decode_frame(bytes), Ok(Message::Data(_))) {
                return Ok(());
            }
            let responders: Vec<MacAddress> = st
                .hubs
                .iter()
                .filter(|h| h.channel == channel && (dest.is_broadcast() || *dest == h.address))
                .map(|h| h.address)
                .collect();
            (responders, st.callback.clone(), st.ack_delay)
        };
        let Some(callback) = callback else {
            return Ok(());
        };
        for hub in responders {
            match delay {
                Some(d) => {
                    let cb = callback.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(d).await;
                        cb(hub, &encode_ack());
                    });
                }
                None => callback(hub, &encode_ack()),
            }
        }
        Ok(())
    }

    fn register_receive_callback(&mut self, callback: ReceiveCallback) -> Result<(), TransportError> {
        self.lock().callback = Some(Arc::new(callback));
        Ok(())
    }

    fn set_active_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        let mut st = self.lock();
        st.record.channel_sets.push(channel);
        if !is_legal_channel(channel) {
            return Err(TransportError::IllegalChannel(channel));
        }
        st.active = channel;
        Ok(())
    }

    fn active_channel(&self) -> u8 {
        self.lock().active
    }

    fn add_peer(&mut self, peer: &MacAddress, channel: u8, encrypt: bool) -> Result<(), TransportError> {
        let mut st = self.lock();
        st.record.peer_adds.push((*peer, channel));
        if encrypt {
            return Err(TransportError::EncryptionUnsupported);
        }
        if st.peers.contains_key(peer) {
            return Ok(());
        }
        if st.peers.len() >= st.capacity {
            return Err(TransportError::PeerTableFull);
        }
        st.peers.insert(*peer, channel);
        Ok(())
    }

    fn remove_peer(&mut self, peer: &MacAddress) -> Result<(), TransportError> {
        let mut st = self.lock();
        st.record.peer_removes.push(*peer);
        st.peers
            .remove(peer)
            .map(|_| ())
            .ok_or(TransportError::PeerNotFound(*peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sim_hub() {
        let hub: SimHub = "AA:BB:CC:DD:EE:FF@5".parse().unwrap();
        assert_eq!(hub.channel, 5);
        assert_eq!(hub.address.to_string(), "AA:BB:CC:DD:EE:FF");
        assert!("AA:BB:CC:DD:EE:FF".parse::<SimHub>().is_err());
        assert!("AA:BB:CC:DD:EE:FF@14".parse::<SimHub>().is_err());
    }

    #[test]
    fn send_requires_peer_on_active_channel() {
        let hub = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let mut link = SimLink::new(1);
        assert!(matches!(
            link.send(&hub, &[0x01]),
            Err(TransportError::PeerNotFound(_))
        ));
        link.add_peer(&hub, 2, false).unwrap();
        assert!(matches!(
            link.send(&hub, &[0x01]),
            Err(TransportError::ChannelMismatch { .. })
        ));
        link.set_active_channel(2).unwrap();
        assert!(link.send(&hub, &[0x01]).is_ok());
        assert_eq!(link.record().send_channels(), vec![2]);
    }

    #[test]
    fn hub_acks_data_on_its_channel() {
        let hub = SimHub {
            address: MacAddress::new([1, 2, 3, 4, 5, 6]),
            channel: 3,
        };
        let mut link = SimLink::new(3).with_hub(hub);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        link.register_receive_callback(Box::new(move |src: MacAddress, bytes: &[u8]| {
            seen_cb.lock().unwrap().push((src, bytes.to_vec()));
        }))
        .unwrap();
        link.add_peer(&MacAddress::BROADCAST, WILDCARD_CHANNEL, false)
            .unwrap();
        let reading = soil_core::SensorReading {
            device_id: "n".into(),
            timestamp_ms: 1,
            soil_voltage: 0.0,
            soil_moisture_pct: 0.0,
            soil_raw: 0,
            battery_voltage: 0.0,
            battery_pct: -1.0,
        };
        let frame = soil_core::encode_data(&reading).unwrap();
        link.send(&MacAddress::BROADCAST, &frame).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(hub.address, vec![0x01])]);

        link.set_active_channel(4).unwrap();
        link.send(&MacAddress::BROADCAST, &frame).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn peer_table_capacity() {
        let mut link = SimLink::new(1).with_peer_capacity(1);
        link.add_peer(&MacAddress::new([1; 6]), 1, false).unwrap();
        link.add_peer(&MacAddress::new([1; 6]), 1, false).unwrap();
        assert!(matches!(
            link.add_peer(&MacAddress::new([2; 6]), 1, false),
            Err(TransportError::PeerTableFull)
        ));
    }
}
