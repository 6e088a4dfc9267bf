//! Load node config from file and environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use soil_core::config::{
    is_legal_channel, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
    FIRST_CHANNEL,
};
use soil_core::{MacAddress, SenderConfig};
use tracing::{debug, warn};

use crate::air::DEFAULT_AIR_PORT;
use crate::state::LinkState;

/// Node configuration. File: ~/.config/soil-node/config.toml or /etc/soil-node/config.toml.
/// Env overrides: SOIL_NODE_HUB, SOIL_NODE_CHANNEL, SOIL_NODE_MAX_RETRIES,
/// SOIL_NODE_RETRY_DELAY_MS, SOIL_NODE_ACK_TIMEOUT_MS, SOIL_NODE_AIR_PORT, SOIL_NODE_STATE_PATH.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Known hub; unset means discovery by broadcast.
    #[serde(default)]
    pub hub: Option<MacAddress>,
    /// Starting channel when no link state is stored (default 1).
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// The radio channel is pinned by another connection; never switch.
    #[serde(default)]
    pub fixed_channel: bool,
    /// UDP port of the emulated air (default 45880).
    #[serde(default = "default_air_port")]
    pub air_port: u16,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Overrides the generated node address.
    #[serde(default)]
    pub node_mac: Option<MacAddress>,
}

fn default_channel() -> u8 {
    FIRST_CHANNEL
}
fn default_max_retries() -> u8 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}
fn default_air_port() -> u16 {
    DEFAULT_AIR_PORT
}
fn default_state_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/state/soil-node/link.toml"),
        None => PathBuf::from("/var/lib/soil-node/link.toml"),
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hub: None,
            channel: default_channel(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            fixed_channel: false,
            air_port: default_air_port(),
            state_path: default_state_path(),
            node_mac: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file, then env vars. An explicit path must
/// exist and parse; the search paths are best effort.
pub fn load(explicit: Option<&Path>) -> Result<NodeConfig, ConfigLoadError> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_file().unwrap_or_default(),
    };
    c.apply_env(|name| std::env::var(name).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/soil-node/config.toml"));
    }
    out.push(PathBuf::from("/etc/soil-node/config.toml"));
    out
}

fn load_file() -> Option<NodeConfig> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&p) {
        Ok(c) => {
            debug!(path = %p.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            warn!(error = %e, "ignoring config file");
            None
        }
    }
}

fn read_file(path: &Path) -> Result<NodeConfig, ConfigLoadError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    if let Some(s) = lookup(name) {
        match s.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!(var = name, value = %s, "ignoring unparsable override"),
        }
    }
}

impl NodeConfig {
    /// Apply SOIL_NODE_* overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(s) = lookup("SOIL_NODE_HUB") {
            match s.parse::<MacAddress>() {
                Ok(mac) => self.hub = Some(mac).filter(|m| !m.is_broadcast()),
                Err(e) => warn!(var = "SOIL_NODE_HUB", error = %e, "ignoring unparsable override"),
            }
        }
        override_from(&lookup, "SOIL_NODE_CHANNEL", &mut self.channel);
        override_from(&lookup, "SOIL_NODE_MAX_RETRIES", &mut self.max_retries);
        override_from(&lookup, "SOIL_NODE_RETRY_DELAY_MS", &mut self.retry_delay_ms);
        override_from(&lookup, "SOIL_NODE_ACK_TIMEOUT_MS", &mut self.ack_timeout_ms);
        override_from(&lookup, "SOIL_NODE_AIR_PORT", &mut self.air_port);
        override_from(&lookup, "SOIL_NODE_STATE_PATH", &mut self.state_path);
    }

    /// Sender settings for this wake: stored link state wins over the file.
    pub fn sender_config(&self, state: &LinkState) -> SenderConfig {
        let starting_channel = state.starting_channel().unwrap_or(self.channel);
        let target = state
            .hub
            .or(self.hub)
            .filter(MacAddress::is_valid)
            .unwrap_or(MacAddress::BROADCAST);
        if !is_legal_channel(starting_channel) {
            warn!(channel = starting_channel, "configured channel is outside 1..=13");
        }
        SenderConfig {
            target,
            starting_channel,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            ack_timeout_ms: self.ack_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn hub() -> MacAddress {
        MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
    }

    #[test]
    fn defaults() {
        let c = NodeConfig::default();
        assert_eq!(c.hub, None);
        assert_eq!(c.channel, 1);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_delay_ms, 100);
        assert_eq!(c.ack_timeout_ms, 1000);
        assert!(!c.fixed_channel);
        assert_eq!(c.air_port, DEFAULT_AIR_PORT);
    }

    #[test]
    fn explicit_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "hub = \"AA:BB:CC:DD:EE:FF\"\nchannel = 6\nmax_retries = 5\n",
        )
        .unwrap();
        let mut c = read_file(&path).unwrap();
        assert_eq!(c.hub, Some(hub()));
        assert_eq!(c.channel, 6);
        assert_eq!(c.ack_timeout_ms, 1000);

        let env: HashMap<&str, &str> = [
            ("SOIL_NODE_CHANNEL", "9"),
            ("SOIL_NODE_MAX_RETRIES", "lots"),
            ("SOIL_NODE_STATE_PATH", "/tmp/soil.toml"),
        ]
        .into_iter()
        .collect();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.channel, 9);
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.state_path, PathBuf::from("/tmp/soil.toml"));
    }

    #[test]
    fn unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_port = 3128\n").unwrap();
        assert!(matches!(
            read_file(&path),
            Err(ConfigLoadError::Parse { .. })
        ));
        assert!(matches!(
            load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigLoadError::Read { .. })
        ));
    }

    #[test]
    fn broadcast_hub_override_means_discovery() {
        let mut c = NodeConfig {
            hub: Some(hub()),
            ..NodeConfig::default()
        };
        c.apply_env(|k| (k == "SOIL_NODE_HUB").then(|| "FF:FF:FF:FF:FF:FF".to_string()));
        assert_eq!(c.hub, None);
    }

    #[test]
    fn stored_state_wins() {
        let c = NodeConfig {
            channel: 2,
            ..NodeConfig::default()
        };
        let fresh = c.sender_config(&LinkState::default());
        assert!(fresh.is_discovery());
        assert_eq!(fresh.starting_channel, 2);

        let state = LinkState {
            channel: Some(7),
            hub: Some(hub()),
            node_mac: None,
        };
        let known = c.sender_config(&state);
        assert_eq!(known.target, hub());
        assert_eq!(known.starting_channel, 7);
        assert!(known.validate().is_ok());
    }
}
