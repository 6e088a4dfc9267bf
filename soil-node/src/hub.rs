//! Hub responder: acks every well-formed Data frame and publishes the reading.

use serde::Serialize;
use serde_json::json;
use soil_core::{
    decode_frame, encode_ack, LinkTransport, MacAddress, Message, PeerError, PeerRegistry,
    SensorReading, TransportError, WILDCARD_CHANNEL,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One line of hub output, shaped like the node's MQTT topics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    pub topic: String,
    /// Link address the frame came from.
    pub source: MacAddress,
    pub payload: serde_json::Value,
}

/// Soil publication, plus a battery one when the node reported a battery level.
pub fn publications(source: MacAddress, reading: &SensorReading) -> Vec<Publication> {
    let mut out = vec![Publication {
        topic: format!("soil_sensor/{}/soil", reading.device_id),
        source,
        payload: json!({
            "timestamp": reading.timestamp_ms,
            "device_id": reading.device_id,
            "voltage": reading.soil_voltage,
            "moisture_percent": reading.soil_moisture_pct,
            "raw_adc": reading.soil_raw,
        }),
    }];
    if reading.has_battery() {
        out.push(Publication {
            topic: format!("soil_sensor/{}/battery", reading.device_id),
            source,
            payload: json!({
                "timestamp": reading.timestamp_ms,
                "device_id": reading.device_id,
                "voltage": reading.battery_voltage,
                "percentage": reading.battery_pct,
            }),
        });
    }
    out
}

pub struct Hub<T: LinkTransport> {
    link: T,
    frames: mpsc::UnboundedReceiver<(MacAddress, Vec<u8>)>,
    peers: PeerRegistry,
    acked: u64,
}

impl<T: LinkTransport> Hub<T> {
    /// Take over the link's receive hook. The link stays on its current channel.
    pub fn new(mut link: T) -> Result<Self, TransportError> {
        let (tx, frames) = mpsc::unbounded_channel();
        link.register_receive_callback(Box::new(move |source: MacAddress, bytes: &[u8]| {
            let _ = tx.send((source, bytes.to_vec()));
        }))?;
        info!(channel = link.active_channel(), "hub listening");
        Ok(Self {
            link,
            frames,
            peers: PeerRegistry::new(),
            acked: 0,
        })
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    /// Data frames acked so far.
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// Next acked reading. `None` once the link drops its receive hook.
    pub async fn recv(&mut self) -> Option<(MacAddress, SensorReading)> {
        loop {
            let (source, bytes) = self.frames.recv().await?;
            if let Some(reading) = self.handle_frame(source, &bytes) {
                return Some((source, reading));
            }
        }
    }

    /// Decode one frame; on Data, ack the sender. Anything else is dropped without a reply.
    pub fn handle_frame(&mut self, source: MacAddress, bytes: &[u8]) -> Option<SensorReading> {
        let reading = match decode_frame(bytes) {
            Ok(Message::Data(r)) => r,
            Ok(Message::Ack) => {
                debug!(%source, "ignoring stray ack");
                return None;
            }
            Err(e) => {
                warn!(%source, error = %e, len = bytes.len(), "malformed frame");
                return None;
            }
        };
        if let Err(e) = self.ack(source) {
            warn!(%source, error = %e, "failed to ack");
        } else {
            self.acked += 1;
        }
        Some(reading)
    }

    fn ack(&mut self, source: MacAddress) -> Result<(), PeerError> {
        self.peers
            .ensure_peer(&mut self.link, source, WILDCARD_CHANNEL)?;
        let sent = self.link.send(&source, &encode_ack());
        // Nodes come and go; keep the peer table free for the next one.
        self.peers.remove_peer(&mut self.link, source)?;
        Ok(sent?)
    }
}
