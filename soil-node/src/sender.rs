//! Telemetry sender: builds the Data frame, picks discovery or unicast mode, and drives
//! [`ChannelSearch`] against the link until the hub acks or every channel is spent.

use std::time::Duration;

use soil_core::{
    decode_frame, encode_data, ChannelSearch, ConfigError, LinkTransport, MacAddress, Message,
    PeerError, PeerRegistry, SearchMode, SearchOutcome, SenderConfig, SensorReading, Step,
    TransportError, WILDCARD_CHANNEL,
};
use tracing::{debug, error, info, trace, warn};

use crate::ack::{ack_pair, AckWait, AckWaiter};

/// Result of one `send_telemetry` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Acked on `channel`. `responder` is the acking address, `None` if it was all zeros.
    Success {
        channel: u8,
        responder: Option<MacAddress>,
    },
    /// Fixed channel exhausted.
    NoAck,
    AllChannelsFailed,
    /// Called after `shutdown`.
    NotInitialized,
    /// The record could not be framed.
    EncodeFailed,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("invalid sender config: {0}")]
    Config(#[from] ConfigError),
    #[error("link setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("hub peer registration failed: {0}")]
    Peer(#[from] PeerError),
}

/// Sender bound to one link. Not re-entrant: `send_telemetry` takes `&mut self`.
pub struct Sender<T: LinkTransport> {
    link: T,
    config: SenderConfig,
    fixed_channel: bool,
    peers: PeerRegistry,
    waiter: Option<AckWaiter>,
}

impl<T: LinkTransport> Sender<T> {
    /// Tune the link to `config.starting_channel`, hook the receive path, register the target.
    pub fn initialize(link: T, config: SenderConfig) -> Result<Self, InitError> {
        Self::init(link, config, false)
    }

    /// For a link whose channel is pinned by another connection: never change channel.
    pub fn initialize_on_fixed_channel(link: T, config: SenderConfig) -> Result<Self, InitError> {
        Self::init(link, config, true)
    }

    fn init(mut link: T, config: SenderConfig, fixed_channel: bool) -> Result<Self, InitError> {
        config.validate()?;
        if !fixed_channel {
            link.set_active_channel(config.starting_channel)?;
        }
        let (signal, waiter) = ack_pair();
        link.register_receive_callback(Box::new(move |source: MacAddress, bytes: &[u8]| {
            match decode_frame(bytes) {
                Ok(Message::Ack) => signal.on_ack_received(source),
                Ok(Message::Data(_)) => trace!(%source, "ignoring data frame"),
                Err(e) => trace!(%source, error = %e, "dropping frame"),
            }
        }))?;

        // Broadcast is reachable on any channel; a known hub starts where we are.
        let peer_channel = if config.is_discovery() {
            WILDCARD_CHANNEL
        } else {
            link.active_channel()
        };
        let mut peers = PeerRegistry::new();
        peers.ensure_peer(&mut link, config.target, peer_channel)?;

        let mode = if config.is_discovery() {
            "discovery"
        } else {
            "unicast"
        };
        info!(
            hub = %config.target,
            channel = link.active_channel(),
            mode,
            fixed_channel,
            "sender initialized"
        );
        Ok(Self {
            link,
            config,
            fixed_channel,
            peers,
            waiter: Some(waiter),
        })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    pub fn mode(&self) -> SearchMode {
        if self.config.is_discovery() {
            SearchMode::Discovery
        } else {
            SearchMode::Unicast
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.waiter.is_some()
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    /// Deliver one reading. Transport errors and timeouts only fail the current attempt.
    pub async fn send_telemetry(&mut self, reading: &SensorReading) -> SendOutcome {
        let mode = self.mode();
        let Self {
            link,
            config,
            fixed_channel,
            peers,
            waiter,
        } = self;
        let Some(waiter) = waiter.as_mut() else {
            warn!("send_telemetry called on a shut down sender");
            return SendOutcome::NotInitialized;
        };
        let frame = match encode_data(reading) {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, "failed to encode reading");
                return SendOutcome::EncodeFailed;
            }
        };

        let current = link.active_channel();
        let mut search = if *fixed_channel {
            ChannelSearch::fixed(mode, current, config.max_retries)
        } else {
            ChannelSearch::roaming(mode, current, config.max_retries)
        };
        // In unicast only the hub's own ack counts.
        let expected = match mode {
            SearchMode::Unicast => Some(config.target),
            SearchMode::Discovery => None,
        };
        info!(hub = %config.target, channel = current, ?mode, "sending telemetry");

        let mut acked_by = None;
        let outcome = loop {
            match search.next_step() {
                Step::SetChannel(channel) => {
                    let ok = match link.set_active_channel(channel) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(channel, error = %e, "failed to switch channel");
                            false
                        }
                    };
                    search.channel_set(ok);
                }
                Step::Rehome(channel) => {
                    let ok = match peers.rehome(link, config.target, channel) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(channel, error = %e, "failed to move hub peer");
                            false
                        }
                    };
                    search.rehomed(ok);
                }
                Step::Attempt { channel, attempt } => {
                    acked_by = attempt_delivery(
                        link,
                        waiter,
                        &config.target,
                        &frame,
                        config.ack_timeout(),
                        expected,
                    )
                    .await;
                    if acked_by.is_none() {
                        debug!(channel, attempt, "no ack");
                    }
                    search.attempted(acked_by.is_some());
                }
                Step::Backoff => tokio::time::sleep(config.retry_delay()).await,
                Step::Finished(outcome) => break outcome,
            }
        };

        match outcome {
            SearchOutcome::Delivered { channel } => {
                // Unicast: the accepted ack came from the target. Later stray acks may have
                // overwritten the last responder since.
                let responder = match mode {
                    SearchMode::Unicast => acked_by,
                    SearchMode::Discovery => waiter.last_responder(),
                }
                .filter(MacAddress::is_valid);
                if responder.is_none() {
                    error!(channel, "ack accepted but responder address is unset or zero");
                }
                info!(channel, responder = ?responder, "telemetry delivered");
                SendOutcome::Success { channel, responder }
            }
            SearchOutcome::NoAckOnKnownChannel => {
                warn!(channel = current, "no ack on fixed channel; scanning not allowed");
                SendOutcome::NoAck
            }
            SearchOutcome::AllChannelsExhausted => {
                error!("no ack on any channel");
                SendOutcome::AllChannelsFailed
            }
        }
    }

    /// Remove registered peers and release the ack waiter. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.waiter.take().is_none() {
            return;
        }
        self.peers.remove_all(&mut self.link);
        // Dropping the hook drops the last AckSignal.
        if let Err(e) = self
            .link
            .register_receive_callback(Box::new(|_: MacAddress, _: &[u8]| {}))
        {
            debug!(error = %e, "failed to detach receive hook");
        }
        info!("sender shut down");
    }
}

/// Arm, send, wait. Returns the acking address; any failure is just "no ack".
async fn attempt_delivery<T: LinkTransport>(
    link: &mut T,
    waiter: &mut AckWaiter,
    target: &MacAddress,
    frame: &[u8],
    ack_timeout: Duration,
    expected: Option<MacAddress>,
) -> Option<MacAddress> {
    waiter.arm();
    if let Err(e) = link.send(target, frame) {
        debug!(error = %e, "send failed");
        return None;
    }
    waiter.mark_pending();
    match waiter.wait_from(ack_timeout, expected).await {
        AckWait::Acked(source) => {
            debug!(%source, "ack received");
            Some(source)
        }
        AckWait::TimedOut => None,
    }
}
