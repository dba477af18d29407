//! Configuration management for apctl
//!
//! `ApConfiguration` describes one access point as requested by the owner.
//! `ControllerSettings` carry the per-controller policy (country code, idle
//! timeout) and `ApctlConfig` is the on-disk daemon configuration.

use crate::error::{ApError, ApResult};
use crate::mac::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Maximum SSID length in bytes (IEEE 802.11)
pub const MAX_SSID_LEN: usize = 32;

/// Idle timeout delays below this are raised to it
pub const MIN_TIMEOUT_DELAY: Duration = Duration::from_secs(600);

/// Band preference of an AP configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Band {
    #[default]
    #[serde(rename = "2.4GHz")]
    Ghz24,
    #[serde(rename = "5GHz")]
    Ghz5,
    #[serde(rename = "any")]
    Any,
    /// One leg per band, bridged together
    #[serde(rename = "dual")]
    Dual,
}

impl Band {
    /// Whether `channel` is a valid channel number for this band; 0 means auto
    pub fn accepts_channel(&self, channel: u8) -> bool {
        match self {
            Band::Ghz24 => channel <= 14,
            Band::Ghz5 => channel == 0 || (32..=177).contains(&channel),
            Band::Any => channel <= 14 || (32..=177).contains(&channel),
            Band::Dual => channel == 0,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Ghz24 => write!(f, "2.4GHz"),
            Band::Ghz5 => write!(f, "5GHz"),
            Band::Any => write!(f, "any"),
            Band::Dual => write!(f, "dual"),
        }
    }
}

/// Key management mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityMode {
    #[default]
    Open,
    Wpa2Psk,
    Sae,
    /// Opportunistic wireless encryption, run as an open/secure transition pair
    Owe,
}

impl SecurityMode {
    pub fn needs_passphrase(&self) -> bool {
        matches!(self, SecurityMode::Wpa2Psk | SecurityMode::Sae)
    }
}

/// Access point configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApConfiguration {
    /// Network name
    pub ssid: String,
    /// Hidden SSID
    #[serde(default)]
    pub hidden: bool,
    /// Band preference
    #[serde(default)]
    pub band: Band,
    /// Channel number, 0 lets the driver choose
    #[serde(default)]
    pub channel: u8,
    /// Key management
    #[serde(default)]
    pub security: SecurityMode,
    /// Passphrase for PSK/SAE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Explicit BSSID; the factory address is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bssid: Option<MacAddress>,
    /// Sibling leg of a privacy-transition pair. Only set on per-leg copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_interface: Option<String>,
    /// Maximum number of associated stations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<u32>,
}

impl ApConfiguration {
    pub fn new(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            hidden: false,
            band: Band::default(),
            channel: 0,
            security: SecurityMode::default(),
            passphrase: None,
            bssid: None,
            transition_interface: None,
            max_clients: None,
        }
    }

    /// Check the configuration before any interface is created
    pub fn validate(&self) -> ApResult<()> {
        if self.ssid.is_empty() {
            return Err(ApError::ConfigError("SSID cannot be empty".to_string()));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ApError::ConfigError(format!(
                "SSID too long ({} bytes, max {})",
                self.ssid.len(), MAX_SSID_LEN
            )));
        }

        if !self.band.accepts_channel(self.channel) {
            return Err(ApError::ConfigError(format!(
                "Channel {} is not valid for band {}",
                self.channel, self.band
            )));
        }

        match (&self.passphrase, self.security.needs_passphrase()) {
            (None, true) => {
                return Err(ApError::ConfigError(format!(
                    "Security mode {:?} requires a passphrase",
                    self.security
                )));
            }
            (Some(_), false) => {
                return Err(ApError::ConfigError(format!(
                    "Security mode {:?} does not take a passphrase",
                    self.security
                )));
            }
            (Some(pass), true) if pass.len() < 8 || pass.len() > 63 => {
                return Err(ApError::ConfigError(
                    "Passphrase must be between 8 and 63 characters".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(bssid) = self.bssid {
            if bssid.is_multicast() {
                return Err(ApError::ConfigError(format!("BSSID {} is a multicast address", bssid)));
            }
        }

        Ok(())
    }

    /// Working copy pinned to a single band; the channel is dropped if it
    /// does not belong to that band
    pub fn pinned_to(&self, band: Band) -> Self {
        let mut copy = self.clone();
        copy.band = band;
        if !band.accepts_channel(copy.channel) {
            copy.channel = 0;
        }
        copy
    }
}

/// Idle timeout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Shut the AP down after `delay_secs` without stations
    #[serde(default = "default_timeout_enabled")]
    pub enabled: bool,
    /// Delay in seconds
    #[serde(default = "default_timeout_delay_secs")]
    pub delay_secs: u64,
}

impl TimeoutSettings {
    /// Configured delay, raised to `MIN_TIMEOUT_DELAY` if smaller
    pub fn delay(&self) -> Duration {
        let delay = Duration::from_secs(self.delay_secs);
        if delay < MIN_TIMEOUT_DELAY {
            warn!(
                "Overriding timeout delay {:?} with minimum limit {:?}",
                delay, MIN_TIMEOUT_DELAY
            );
            return MIN_TIMEOUT_DELAY;
        }
        delay
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            enabled: default_timeout_enabled(),
            delay_secs: default_timeout_delay_secs(),
        }
    }
}

/// Per-controller policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Regulatory domain (ISO 3166 alpha-2); mandatory for 5GHz-only APs
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub timeout: TimeoutSettings,
}

/// Settings for the iw/ip/hostapd backed driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Wireless phy the AP interfaces are created on
    #[serde(default = "default_phy")]
    pub phy: String,
    /// hostapd binary
    #[serde(default = "default_hostapd_path")]
    pub hostapd_path: PathBuf,
    /// Directory for generated hostapd configs and pid files
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Name prefix of created AP interfaces
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
    /// Name prefix of created bridge interfaces
    #[serde(default = "default_bridge_prefix")]
    pub bridge_prefix: String,
    /// Station and channel polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub station_poll_interval_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            phy: default_phy(),
            hostapd_path: default_hostapd_path(),
            run_dir: default_run_dir(),
            interface_prefix: default_interface_prefix(),
            bridge_prefix: default_bridge_prefix(),
            station_poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// apctld configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApctlConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    pub ap: ApConfiguration,
    #[serde(default)]
    pub driver: DriverSettings,
}

fn default_timeout_enabled() -> bool {
    true
}

fn default_timeout_delay_secs() -> u64 {
    MIN_TIMEOUT_DELAY.as_secs()
}

fn default_phy() -> String {
    "phy0".to_string()
}

fn default_hostapd_path() -> PathBuf {
    PathBuf::from("/usr/sbin/hostapd")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/run/crrouter/apctl")
}

fn default_interface_prefix() -> String {
    "ap".to_string()
}

fn default_bridge_prefix() -> String {
    "apbr".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl ApctlConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> ApResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ApError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> ApResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ApError::ConfigError(format!("Failed to parse config: {}", e)))?;

        if let Some(ref cc) = config.controller.country_code {
            if cc.len() != 2 || !cc.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ApError::ConfigError(format!(
                    "Country code must be 2 letters, got '{}'",
                    cc
                )));
            }
        }
        config.ap.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ApResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ApError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| ApError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secured(ssid: &str) -> ApConfiguration {
        ApConfiguration {
            security: SecurityMode::Wpa2Psk,
            passphrase: Some("correct horse".to_string()),
            ..ApConfiguration::new(ssid)
        }
    }

    #[test]
    fn test_validate_ssid() {
        assert!(ApConfiguration::new("HomeAP").validate().is_ok());
        assert!(ApConfiguration::new("").validate().is_err());
        assert!(ApConfiguration::new("x".repeat(33)).validate().is_err());
        assert!(ApConfiguration::new("x".repeat(32)).validate().is_ok());
    }

    #[test]
    fn test_validate_passphrase_rules() {
        assert!(secured("Home123").validate().is_ok());

        let mut config = secured("Home123");
        config.passphrase = Some("short".to_string());
        assert!(config.validate().is_err());

        config.passphrase = None;
        assert!(config.validate().is_err());

        let mut owe = ApConfiguration::new("Home123");
        owe.security = SecurityMode::Owe;
        assert!(owe.validate().is_ok());
        owe.passphrase = Some("password123".to_string());
        assert!(owe.validate().is_err());
    }

    #[test]
    fn test_validate_band_channel() {
        let mut config = ApConfiguration::new("HomeAP");
        config.channel = 6;
        assert!(config.validate().is_ok());

        config.band = Band::Ghz5;
        assert!(config.validate().is_err());
        config.channel = 36;
        assert!(config.validate().is_ok());

        config.band = Band::Dual;
        assert!(config.validate().is_err());
        config.channel = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pinned_copy_leaves_original_untouched() {
        let mut config = ApConfiguration::new("HomeAP");
        config.band = Band::Any;
        config.channel = 11;

        let low = config.pinned_to(Band::Ghz24);
        let high = config.pinned_to(Band::Ghz5);
        assert_eq!(low.band, Band::Ghz24);
        assert_eq!(low.channel, 11);
        assert_eq!(high.band, Band::Ghz5);
        assert_eq!(high.channel, 0);
        assert_eq!(config.band, Band::Any);
        assert_eq!(config.channel, 11);
    }

    #[test]
    fn test_timeout_delay_minimum() {
        let settings = TimeoutSettings { enabled: true, delay_secs: 30 };
        assert_eq!(settings.delay(), MIN_TIMEOUT_DELAY);

        let settings = TimeoutSettings { enabled: true, delay_secs: 3600 };
        assert_eq!(settings.delay(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_daemon_config() {
        let content = r#"
            [controller]
            country_code = "US"

            [controller.timeout]
            enabled = false

            [ap]
            ssid = "CRRouter-AP"
            band = "dual"
            security = "wpa2-psk"
            passphrase = "crrouter123"
            bssid = "02:00:00:12:34:56"

            [driver]
            phy = "phy1"
        "#;

        let config = ApctlConfig::parse(content).unwrap();
        assert_eq!(config.controller.country_code.as_deref(), Some("US"));
        assert!(!config.controller.timeout.enabled);
        assert_eq!(config.controller.timeout.delay_secs, 600);
        assert_eq!(config.ap.band, Band::Dual);
        assert_eq!(config.ap.security, SecurityMode::Wpa2Psk);
        assert_eq!(config.ap.bssid.unwrap().to_string(), "02:00:00:12:34:56");
        assert_eq!(config.driver.phy, "phy1");
        assert_eq!(config.driver.interface_prefix, "ap");
    }

    #[test]
    fn test_parse_rejects_bad_country_code() {
        let content = r#"
            [controller]
            country_code = "USA"

            [ap]
            ssid = "CRRouter-AP"
        "#;
        assert!(ApctlConfig::parse(content).is_err());
    }
}
