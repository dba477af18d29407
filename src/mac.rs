//! Hardware (MAC) addresses of AP interfaces and associated stations

use crate::error::{ApError, ApResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 48-bit IEEE 802 hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally administered addresses have bit 1 of the first octet set
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ApError;

    /// Accepts `XX:XX:XX:XX:XX:XX` (hex digits, either case)
    fn from_str(s: &str) -> ApResult<Self> {
        let s = s.trim();
        if s.len() != 17 {
            return Err(ApError::InvalidParameter(format!(
                "MAC address must be in format XX:XX:XX:XX:XX:XX, got '{}'",
                s
            )));
        }

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ApError::InvalidParameter(
                "MAC address must have 6 octets separated by colons".to_string()
            ))?;
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ApError::InvalidParameter(format!(
                    "Invalid hex digit in MAC address: {}",
                    part
                )));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|e| {
                    ApError::InvalidParameter(format!("Invalid MAC octet {}: {}", part, e))
                })?;
        }

        if parts.next().is_some() {
            return Err(ApError::InvalidParameter(
                "MAC address must have 6 octets separated by colons".to_string(),
            ));
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
