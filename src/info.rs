//! Operating channel information of a running AP

use crate::config::Band;
use serde::{Deserialize, Serialize};

/// Channel bandwidth class reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelWidth {
    /// Unknown, or the AP is disabled
    #[default]
    Invalid,
    Mhz20NoHt,
    Mhz20,
    Mhz40,
    Mhz80,
    Mhz80Plus80,
    Mhz160,
}

impl ChannelWidth {
    /// Map the width in MHz reported by `iw` (e.g. "width: 80 MHz")
    pub fn from_mhz(mhz: u32, ht: bool) -> Self {
        match mhz {
            20 if ht => ChannelWidth::Mhz20,
            20 => ChannelWidth::Mhz20NoHt,
            40 => ChannelWidth::Mhz40,
            80 => ChannelWidth::Mhz80,
            160 => ChannelWidth::Mhz160,
            _ => ChannelWidth::Invalid,
        }
    }
}

/// Last known operating frequency and bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApInfo {
    /// Frequency in MHz; 0 while disabled
    pub frequency: i32,
    pub bandwidth: ChannelWidth,
}

impl ApInfo {
    pub fn new(frequency: i32, bandwidth: ChannelWidth) -> Self {
        Self { frequency, bandwidth }
    }

    /// Sentinel used when the AP is torn down
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Frequency 0 or below, or an invalid width, means "no channel"
    pub fn is_valid(&self) -> bool {
        self.frequency > 0 && self.bandwidth != ChannelWidth::Invalid
    }

    /// Whether the operating frequency contradicts a single-band preference
    pub fn violates(&self, band: Band) -> bool {
        match band {
            Band::Ghz24 => is_5ghz(self.frequency),
            Band::Ghz5 => is_24ghz(self.frequency),
            Band::Any | Band::Dual => false,
        }
    }
}

pub fn is_24ghz(freq: i32) -> bool {
    (2400..2500).contains(&freq)
}

pub fn is_5ghz(freq: i32) -> bool {
    (4900..5900).contains(&freq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_classification() {
        assert!(is_24ghz(2412));
        assert!(is_24ghz(2484));
        assert!(!is_24ghz(5180));
        assert!(is_5ghz(5180));
        assert!(is_5ghz(5825));
        assert!(!is_5ghz(2437));
        assert!(!is_5ghz(0));
    }

    #[test]
    fn test_violation() {
        let info = ApInfo::new(5180, ChannelWidth::Mhz80);
        assert!(info.violates(Band::Ghz24));
        assert!(!info.violates(Band::Ghz5));
        assert!(!info.violates(Band::Any));

        let info = ApInfo::new(2412, ChannelWidth::Mhz20);
        assert!(info.violates(Band::Ghz5));
        assert!(!info.violates(Band::Ghz24));
        assert!(!info.violates(Band::Dual));
    }

    #[test]
    fn test_disabled_sentinel_is_invalid() {
        assert!(!ApInfo::disabled().is_valid());
        assert!(!ApInfo::new(2412, ChannelWidth::Invalid).is_valid());
        assert!(!ApInfo::new(-1, ChannelWidth::Mhz20).is_valid());
        assert!(ApInfo::new(2412, ChannelWidth::Mhz20).is_valid());
    }

    #[test]
    fn test_width_from_mhz() {
        assert_eq!(ChannelWidth::from_mhz(20, true), ChannelWidth::Mhz20);
        assert_eq!(ChannelWidth::from_mhz(20, false), ChannelWidth::Mhz20NoHt);
        assert_eq!(ChannelWidth::from_mhz(80, true), ChannelWidth::Mhz80);
        assert_eq!(ChannelWidth::from_mhz(5, true), ChannelWidth::Invalid);
    }
}
