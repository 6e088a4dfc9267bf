//! Link state kept across wake cycles: last good channel, learned hub, node address.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use soil_core::config::is_legal_channel;
use soil_core::MacAddress;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("serializing link state: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkState {
    /// Channel of the last acked send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// Hub learned through discovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub: Option<MacAddress>,
    /// This node's link address, generated on first run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_mac: Option<MacAddress>,
}

impl LinkState {
    /// Missing file means first boot: empty state.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no link state yet");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| StateError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to a sibling temp file, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let text = toml::to_string(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }

    /// Stored channel if it is still legal.
    pub fn starting_channel(&self) -> Option<u8> {
        self.channel.filter(|c| is_legal_channel(*c))
    }

    /// Fold in a delivered send. Only discovery may replace a stored hub, and an unset or
    /// all-zero responder never does. Returns whether anything changed.
    pub fn record_delivery(
        &mut self,
        channel: u8,
        responder: Option<MacAddress>,
        discovery: bool,
    ) -> bool {
        let mut changed = false;
        if self.channel != Some(channel) {
            self.channel = Some(channel);
            changed = true;
        }
        match responder.filter(MacAddress::is_valid) {
            Some(hub) if self.hub != Some(hub) && (discovery || self.hub.is_none()) => {
                info!(%hub, channel, discovery, "learned hub address");
                self.hub = Some(hub);
                changed = true;
            }
            Some(hub) if self.hub != Some(hub) => {
                warn!(%hub, stored = ?self.hub, "unicast responder differs from stored hub; keeping stored")
            }
            Some(_) => {}
            None => debug!(channel, "no usable responder address; hub unchanged"),
        }
        changed
    }
}
