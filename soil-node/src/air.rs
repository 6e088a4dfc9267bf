//! Emulated air: a [`LinkTransport`] over UDP multicast so node and hub can run on Linux
//! hosts. Each datagram is `"SL" | channel | src MAC | dst MAC | payload`.
//!
//! The hub binds the group port and joins the group; nodes bind an ephemeral port and
//! reach the hub through the group. Replies go straight back to the address a peer was
//! last heard from, so both ends can share one host.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use soil_core::config::{is_legal_channel, FIRST_CHANNEL, WILDCARD_CHANNEL};
use soil_core::protocol::MAX_FRAME_LEN;
use soil_core::{LinkTransport, MacAddress, ReceiveCallback, TransportError};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub const AIR_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 61, 61);
pub const DEFAULT_AIR_PORT: u16 = 45880;

/// Peer table size of the reference radio.
pub const AIR_MAX_PEERS: usize = 20;

const MAGIC: [u8; 2] = *b"SL";
const HEADER_LEN: usize = 2 + 1 + 6 + 6;

/// Which end of the link this socket serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirRole {
    /// Listens on the group port.
    Hub,
    /// Ephemeral port; talks to the group.
    Node,
}

#[derive(Debug, thiserror::Error)]
pub enum AirError {
    #[error("binding UDP port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("joining multicast group 239.255.61.61: {0}")]
    Join(std::io::Error),
    #[error("socket setup: {0}")]
    Socket(#[from] std::io::Error),
}

/// One datagram on the emulated air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame<'a> {
    pub channel: u8,
    pub src: MacAddress,
    pub dst: MacAddress,
    pub payload: &'a [u8],
}

pub fn build_datagram(channel: u8, src: &MacAddress, dst: &MacAddress, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(channel);
    out.extend_from_slice(src.as_bytes());
    out.extend_from_slice(dst.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// `None` for foreign traffic, short headers and oversized payloads.
pub fn parse_datagram(buf: &[u8]) -> Option<AirFrame<'_>> {
    if buf.len() < HEADER_LEN || buf[..2] != MAGIC {
        return None;
    }
    let payload = &buf[HEADER_LEN..];
    if payload.len() > MAX_FRAME_LEN {
        return None;
    }
    let mut src = [0u8; 6];
    let mut dst = [0u8; 6];
    src.copy_from_slice(&buf[3..9]);
    dst.copy_from_slice(&buf[9..15]);
    Some(AirFrame {
        channel: buf[2],
        src: MacAddress::new(src),
        dst: MacAddress::new(dst),
        payload,
    })
}

type Routes = Arc<Mutex<HashMap<MacAddress, SocketAddr>>>;
type SharedCallback = Arc<Mutex<Option<Arc<ReceiveCallback>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct AirTransport {
    mac: MacAddress,
    socket: Arc<UdpSocket>,
    group: SocketAddr,
    active: Arc<AtomicU8>,
    peers: HashMap<MacAddress, u8>,
    routes: Routes,
    callback: SharedCallback,
    recv_task: JoinHandle<()>,
}

impl AirTransport {
    /// Open the socket and start the receive task. Must run inside a tokio runtime.
    pub async fn bind(mac: MacAddress, port: u16, role: AirRole) -> Result<Self, AirError> {
        let bind_port = match role {
            AirRole::Hub => port,
            AirRole::Node => 0,
        };
        let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, bind_port))
            .map_err(|source| AirError::Bind {
                port: bind_port,
                source,
            })?;
        if role == AirRole::Hub {
            std_sock
                .join_multicast_v4(&AIR_GROUP, &Ipv4Addr::UNSPECIFIED)
                .map_err(AirError::Join)?;
        }
        std_sock.set_multicast_ttl_v4(1)?;
        std_sock.set_multicast_loop_v4(true)?;
        std_sock.set_nonblocking(true)?;
        let socket = Arc::new(UdpSocket::from_std(std_sock)?);
        debug!(%mac, local = ?socket.local_addr().ok(), ?role, "air socket ready");

        let active = Arc::new(AtomicU8::new(FIRST_CHANNEL));
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let callback: SharedCallback = Arc::new(Mutex::new(None));
        let recv_task = tokio::spawn(recv_loop(
            socket.clone(),
            mac,
            active.clone(),
            routes.clone(),
            callback.clone(),
        ));
        Ok(Self {
            mac,
            socket,
            group: SocketAddr::V4(SocketAddrV4::new(AIR_GROUP, port)),
            active,
            peers: HashMap::new(),
            routes,
            callback,
            recv_task,
        })
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }
}

impl Drop for AirTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Own echoes, other channels and other nodes' unicasts are dropped.
fn accepts(frame: &AirFrame<'_>, mac: MacAddress, active: u8) -> bool {
    frame.src != mac
        && frame.channel == active
        && (frame.dst == mac || frame.dst.is_broadcast())
}

/// Bounded like the peer table; a full table keeps known routes and forgets newcomers.
fn remember_route(routes: &mut HashMap<MacAddress, SocketAddr>, src: MacAddress, from: SocketAddr) {
    if routes.len() >= AIR_MAX_PEERS && !routes.contains_key(&src) {
        debug!(%src, %from, "route table full; replying via group");
        return;
    }
    routes.insert(src, from);
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    mac: MacAddress,
    active: Arc<AtomicU8>,
    routes: Routes,
    callback: SharedCallback,
) {
    let mut buf = vec![0u8; HEADER_LEN + MAX_FRAME_LEN + 1];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "air receive failed; stopping");
                return;
            }
        };
        let Some(frame) = parse_datagram(&buf[..n]) else {
            trace!(%from, len = n, "ignoring foreign datagram");
            continue;
        };
        if !accepts(&frame, mac, active.load(Ordering::Acquire)) {
            trace!(src = %frame.src, dst = %frame.dst, channel = frame.channel, "not for us");
            continue;
        }
        remember_route(&mut lock(&routes), frame.src, from);
        let cb = lock(&callback).clone();
        if let Some(cb) = cb {
            cb(frame.src, frame.payload);
        }
    }
}

impl LinkTransport for AirTransport {
    fn send(&mut self, dest: &MacAddress, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(bytes.len()));
        }
        let peer_channel = *self
            .peers
            .get(dest)
            .ok_or(TransportError::PeerNotFound(*dest))?;
        let channel = self.active_channel();
        if peer_channel != WILDCARD_CHANNEL && peer_channel != channel {
            return Err(TransportError::ChannelMismatch {
                peer_channel,
                active_channel: channel,
            });
        }
        let to = if dest.is_broadcast() {
            self.group
        } else {
            lock(&self.routes).get(dest).copied().unwrap_or(self.group)
        };
        let datagram = build_datagram(channel, &self.mac, dest, bytes);
        self.socket.try_send_to(&datagram, to)?;
        trace!(%dest, %to, channel, len = bytes.len(), "air send");
        Ok(())
    }

    fn register_receive_callback(&mut self, callback: ReceiveCallback) -> Result<(), TransportError> {
        *lock(&self.callback) = Some(Arc::new(callback));
        Ok(())
    }

    fn set_active_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        if !is_legal_channel(channel) {
            return Err(TransportError::IllegalChannel(channel));
        }
        self.active.store(channel, Ordering::Release);
        Ok(())
    }

    fn active_channel(&self) -> u8 {
        self.active.load(Ordering::Acquire)
    }

    fn add_peer(&mut self, peer: &MacAddress, channel: u8, encrypt: bool) -> Result<(), TransportError> {
        if encrypt {
            return Err(TransportError::EncryptionUnsupported);
        }
        if channel != WILDCARD_CHANNEL && !is_legal_channel(channel) {
            return Err(TransportError::IllegalChannel(channel));
        }
        if self.peers.contains_key(peer) {
            return Ok(());
        }
        if self.peers.len() >= AIR_MAX_PEERS {
            return Err(TransportError::PeerTableFull);
        }
        self.peers.insert(*peer, channel);
        Ok(())
    }

    fn remove_peer(&mut self, peer: &MacAddress) -> Result<(), TransportError> {
        self.peers
            .remove(peer)
            .map(|_| ())
            .ok_or(TransportError::PeerNotFound(*peer))
    }
}
