//! Link identity: 6-byte hardware addresses and the device id derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Hardware address of a node on the link (6 bytes). Serializes as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// All-ones address. As a target it selects discovery mode.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// All-zero address. Never a real responder.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Valid means not all zeros.
    pub fn is_valid(&self) -> bool {
        *self != Self::ZERO
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Accepts `:` or `-` separated hex octets, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut n = 0usize;
        for part in s.trim().split(|c| c == ':' || c == '-') {
            // from_str_radix alone would take a leading '+'.
            if n == 6 || part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError(s.to_string()));
            }
            out[n] = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
            n += 1;
        }
        if n != 6 {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddress(out))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(String);

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Device id reported in telemetry: `SOIL_` followed by the address in upper-case hex.
pub fn device_id_for(mac: &MacAddress) -> String {
    let mut id = String::with_capacity(17);
    id.push_str("SOIL_");
    for b in mac.as_bytes() {
        id.push_str(&format!("{:02X}", b));
    }
    id
}
