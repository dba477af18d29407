//! Two-leg AP setups: dual-band split and privacy-transition pairs
//!
//! Both create two AP interfaces plus a bridge, start one leg after the
//! other, and bring the bridge up only once both legs run. Any failure
//! tears all three interfaces down.

use super::setup::created_name;
use super::{ApController, ApInstance};
use crate::config::{ApConfiguration, Band, SecurityMode};
use crate::driver::EventSink;
use crate::error::StartFailure;
use crate::listener::ApState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

/// Fixed prefix of a derived companion SSID
pub const COMPANION_SSID_PREFIX: &str = "OWE_";

/// How many interfaces a configuration needs and how they are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupStrategy {
    Single,
    /// One leg per band
    DualBand,
    /// Secure leg plus a hidden open companion leg
    PrivacyTransition,
}

impl SetupStrategy {
    pub fn for_config(config: &ApConfiguration) -> Self {
        if config.band == Band::Dual {
            SetupStrategy::DualBand
        } else if config.security == SecurityMode::Owe {
            SetupStrategy::PrivacyTransition
        } else {
            SetupStrategy::Single
        }
    }
}

/// SSID of the companion network for `ssid`: the prefix followed by a
/// stable hash of the original name. Always fits in 32 bytes.
pub fn companion_ssid(ssid: &str) -> String {
    let digest = Sha256::digest(ssid.as_bytes());
    let suffix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    format!("{}{:08x}", COMPANION_SSID_PREFIX, suffix)
}

/// Interfaces of a two-leg setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubInterfaceSet {
    pub strategy: SetupStrategy,
    pub legs: [String; 2],
    pub bridge: String,
    /// Legs known to be gone already
    pub leg_destroyed: [bool; 2],
    /// Set once the legs have been torn down; never reset
    pub torn_down: bool,
}

impl SubInterfaceSet {
    pub fn new(strategy: SetupStrategy, legs: [String; 2], bridge: String) -> Self {
        Self {
            strategy,
            legs,
            bridge,
            leg_destroyed: [false; 2],
            torn_down: false,
        }
    }

    pub fn leg_index(&self, name: &str) -> Option<usize> {
        self.legs.iter().position(|leg| leg == name)
    }

    pub fn names(&self) -> Vec<String> {
        vec![self.legs[0].clone(), self.legs[1].clone(), self.bridge.clone()]
    }
}

impl ApController {
    pub(super) async fn setup_pair(
        &mut self,
        strategy: SetupStrategy,
        config: ApConfiguration,
    ) -> Result<ApInstance, StartFailure> {
        let sink = self.event_sink();

        let first = self.driver.create_ap_interface(sink.clone()).await;
        let first = created_name(first, "first ap interface");
        let second = self.driver.create_ap_interface(sink.clone()).await;
        let second = created_name(second, "second ap interface");
        let bridge = self.driver.create_bridge_interface(sink.clone()).await;
        let bridge = created_name(bridge, "bridge interface");

        let (first, second, bridge) = match (first, second, bridge) {
            (Some(first), Some(second), Some(bridge)) => (first, second, bridge),
            (first, second, bridge) => {
                error!("Setup failure when creating dual ap interface(s)");
                for name in [first, second, bridge].into_iter().flatten() {
                    self.driver.destroy_interface(&name).await;
                }
                return Err(StartFailure::Generic);
            }
        };

        let mut set = SubInterfaceSet::new(strategy, [first, second], bridge.clone());
        let data_interface = self.resolve_data_interface(&bridge).await;
        self.report(ApState::Enabling, None);

        let result = match strategy {
            SetupStrategy::DualBand => self.start_dual_band(&set, &config, &sink).await,
            SetupStrategy::PrivacyTransition => {
                self.start_privacy_transition(&set, &config, &sink).await
            }
            SetupStrategy::Single => {
                error!("Single-interface configuration routed to two-leg setup");
                Err(StartFailure::Generic)
            }
        };

        let result = match result {
            Ok(()) => self.driver.bring_bridge_up(&bridge).await.map_err(|e| {
                error!("Failed to set interface up {}: {}", bridge, e);
                StartFailure::Generic
            }),
            Err(reason) => Err(reason),
        };

        if let Err(reason) = result {
            self.teardown_legs(&mut set).await;
            self.driver.destroy_interface(&bridge).await;
            return Err(reason);
        }

        let mut instance = ApInstance::new(bridge, data_interface, config);
        instance.sub_interfaces = Some(set);
        Ok(instance)
    }

    async fn start_dual_band(
        &self,
        set: &SubInterfaceSet,
        config: &ApConfiguration,
        sink: &EventSink,
    ) -> Result<(), StartFailure> {
        let low = config.pinned_to(Band::Ghz24);
        self.start_ap_on(&set.legs[0], &low, sink.clone()).await?;

        let high = config.pinned_to(Band::Ghz5);
        self.start_ap_on(&set.legs[1], &high, sink.clone()).await
    }

    async fn start_privacy_transition(
        &self,
        set: &SubInterfaceSet,
        config: &ApConfiguration,
        sink: &EventSink,
    ) -> Result<(), StartFailure> {
        let mut secure = config.clone();
        secure.transition_interface = Some(set.legs[1].clone());
        self.start_ap_on(&set.legs[0], &secure, sink.clone()).await?;

        let mut open = config.clone();
        open.ssid = companion_ssid(&config.ssid);
        open.hidden = true;
        open.security = SecurityMode::Open;
        open.passphrase = None;
        open.transition_interface = Some(set.legs[0].clone());
        info!("Generated companion SSID: {}", open.ssid);
        self.start_ap_on(&set.legs[1], &open, sink.clone()).await
    }

    /// Destroy both legs once; later calls are no-ops
    pub(super) async fn teardown_legs(&self, set: &mut SubInterfaceSet) {
        if set.torn_down {
            return;
        }
        set.torn_down = true;

        for (index, leg) in set.legs.iter().enumerate() {
            if !set.leg_destroyed[index] {
                self.driver.destroy_interface(leg).await;
                set.leg_destroyed[index] = true;
            }
        }
    }

    pub(super) async fn on_interface_destroyed(&mut self, name: &str) {
        let Some(mut instance) = self.instance.take() else {
            return;
        };

        let leg_index = instance
            .sub_interfaces
            .as_ref()
            .and_then(|set| set.leg_index(name));

        if let Some(index) = leg_index {
            if let Some(set) = instance.sub_interfaces.as_mut() {
                set.leg_destroyed[index] = true;
                info!("One of dual interfaces ({}) destroyed, trigger cleanup", name);
                self.teardown_legs(set).await;
            }
            self.driver.destroy_interface(&instance.ap_interface).await;
        } else if name == instance.data_interface || name == instance.ap_interface {
            if let Some(set) = instance.sub_interfaces.as_mut() {
                info!("Bridge interface destroyed, teardown dual interfaces");
                self.teardown_legs(set).await;
            }
            if name != instance.ap_interface {
                self.driver.destroy_interface(&instance.ap_interface).await;
            }
            info!("Interface(s) was cleanly destroyed");
        } else {
            debug!("Ignoring destruction of unrelated interface {}", name);
            self.instance = Some(instance);
            return;
        }

        instance.is_destroyed = true;
        self.instance = Some(instance);
        self.report(ApState::Disabling, None);
        self.leave_running().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_ssid_is_deterministic() {
        let first = companion_ssid("Home123");
        let second = companion_ssid("Home123");
        assert_eq!(first, second);
        assert!(first.starts_with(COMPANION_SSID_PREFIX));
        assert_eq!(first.len(), COMPANION_SSID_PREFIX.len() + 8);
        assert!(first[COMPANION_SSID_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, companion_ssid("Home124"));
    }

    #[test]
    fn test_companion_ssid_fits_ssid_limit() {
        let long = "x".repeat(crate::config::MAX_SSID_LEN);
        assert!(companion_ssid(&long).len() <= crate::config::MAX_SSID_LEN);
    }

    #[test]
    fn test_strategy_selection() {
        let mut config = ApConfiguration::new("HomeAP");
        assert_eq!(SetupStrategy::for_config(&config), SetupStrategy::Single);

        config.security = SecurityMode::Owe;
        assert_eq!(SetupStrategy::for_config(&config), SetupStrategy::PrivacyTransition);

        config.band = Band::Dual;
        assert_eq!(SetupStrategy::for_config(&config), SetupStrategy::DualBand);
    }

    #[test]
    fn test_sub_interface_lookup() {
        let set = SubInterfaceSet::new(
            SetupStrategy::DualBand,
            ["ap0".to_string(), "ap1".to_string()],
            "apbr0".to_string(),
        );
        assert_eq!(set.leg_index("ap1"), Some(1));
        assert_eq!(set.leg_index("apbr0"), None);
        assert_eq!(set.names(), vec!["ap0", "ap1", "apbr0"]);
    }
}
