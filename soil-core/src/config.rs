//! Sender configuration and the legal channel range.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::MacAddress;

/// Lowest legal radio channel.
pub const FIRST_CHANNEL: u8 = 1;

/// Highest legal radio channel.
pub const LAST_CHANNEL: u8 = 13;

/// Number of channels a full sweep visits.
pub const CHANNEL_COUNT: usize = (LAST_CHANNEL - FIRST_CHANNEL + 1) as usize;

/// Peer channel 0: reachable on whatever channel is active.
pub const WILDCARD_CHANNEL: u8 = 0;

pub const DEFAULT_MAX_RETRIES: u8 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 1000;

pub fn is_legal_channel(channel: u8) -> bool {
    (FIRST_CHANNEL..=LAST_CHANNEL).contains(&channel)
}

/// Sender configuration. A broadcast `target` means discovery mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    pub target: MacAddress,
    pub starting_channel: u8,
    /// Attempts per channel.
    pub max_retries: u8,
    pub retry_delay_ms: u64,
    pub ack_timeout_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            target: MacAddress::BROADCAST,
            starting_channel: FIRST_CHANNEL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if !is_legal_channel(self.starting_channel) {
            return Err(ConfigError::IllegalChannel(self.starting_channel));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ZeroAckTimeout);
        }
        if !self.target.is_valid() {
            return Err(ConfigError::ZeroTarget);
        }
        Ok(())
    }

    pub fn is_discovery(&self) -> bool {
        self.target.is_broadcast()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Upper bound on one delivery, excluding send time: current channel plus a full sweep.
    pub fn worst_case_latency(&self) -> Duration {
        let attempts = (1 + CHANNEL_COUNT as u64) * self.max_retries as u64;
        Duration::from_millis(attempts * (self.ack_timeout_ms + self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_retries must be at least 1")]
    ZeroRetries,
    #[error("channel {0} outside the legal range 1..=13")]
    IllegalChannel(u8),
    #[error("ack timeout must be non-zero")]
    ZeroAckTimeout,
    #[error("target address is all zeros")]
    ZeroTarget,
}
