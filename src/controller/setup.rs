//! Single-interface bring-up

use super::{ApController, ApInstance};
use crate::config::{ApConfiguration, Band};
use crate::driver::EventSink;
use crate::error::{ApResult, StartFailure};
use crate::listener::ApState;
use tracing::{debug, error, info, warn};

/// Accept a created interface name only if the driver returned a usable one
pub(super) fn created_name(result: ApResult<String>, what: &str) -> Option<String> {
    match result {
        Ok(name) if !name.trim().is_empty() => Some(name),
        Ok(_) => {
            error!("Setup failure when creating {}: driver returned an empty name", what);
            None
        }
        Err(e) => {
            error!("Setup failure when creating {}: {}", what, e);
            None
        }
    }
}

impl ApController {
    pub(super) async fn setup_single(
        &mut self,
        config: ApConfiguration,
    ) -> Result<ApInstance, StartFailure> {
        let sink = self.event_sink();
        let result = self.driver.create_ap_interface(sink.clone()).await;
        let ap_interface = created_name(result, "ap interface").ok_or(StartFailure::Generic)?;

        let data_interface = self.resolve_data_interface(&ap_interface).await;
        self.report(ApState::Enabling, None);

        if let Err(reason) = self.start_ap_on(&ap_interface, &config, sink).await {
            self.driver.destroy_interface(&ap_interface).await;
            return Err(reason);
        }

        Ok(ApInstance::new(ap_interface, data_interface, config))
    }

    pub(super) async fn resolve_data_interface(&self, ap_interface: &str) -> String {
        match self.driver.data_interface(ap_interface).await {
            Some(name) if !name.is_empty() => {
                debug!("Using data interface {} for {}", name, ap_interface);
                name
            }
            _ => ap_interface.to_string(),
        }
    }

    /// Configure address and regulatory domain, then start the AP on `iface`
    pub(super) async fn start_ap_on(
        &self,
        iface: &str,
        config: &ApConfiguration,
        sink: EventSink,
    ) -> Result<(), StartFailure> {
        debug!("band {} iface {} country {:?}", config.band, iface, self.country_code);

        self.configure_mac(iface, config).await?;
        self.configure_country_code(iface, config).await?;

        if config.band == Band::Ghz5 && !self.driver.supports_band(Band::Ghz5).await {
            error!("Failed to start AP on {} as 5GHz band not supported", iface);
            return Err(StartFailure::NoChannel);
        }

        if config.hidden {
            debug!("AP on {} is a hidden network", iface);
        }

        if let Err(e) = self.driver.push_configuration(iface, config, sink).await {
            error!("AP start failed on {}: {}", iface, e);
            return Err(StartFailure::Generic);
        }

        info!("AP '{}' is started on {}", config.ssid, iface);
        Ok(())
    }

    async fn configure_mac(
        &self,
        iface: &str,
        config: &ApConfiguration,
    ) -> Result<(), StartFailure> {
        if let Some(bssid) = config.bssid {
            // An explicitly requested address needs driver support
            if let Err(e) = self.driver.set_address(iface, bssid).await {
                error!(
                    "Failed to set explicitly requested MAC address {} on {}: {}",
                    bssid, iface, e
                );
                return Err(StartFailure::Generic);
            }
            return Ok(());
        }

        let factory = match self.driver.get_factory_address(iface).await {
            Ok(mac) => mac,
            Err(e) => {
                error!("Failed to get factory MAC address of {}: {}", iface, e);
                return Err(StartFailure::Generic);
            }
        };

        if let Err(e) = self.driver.set_address(iface, factory).await {
            warn!(
                "Failed to reset {} to factory MAC address; continuing with current MAC: {}",
                iface, e
            );
        }
        Ok(())
    }

    async fn configure_country_code(
        &self,
        iface: &str,
        config: &ApConfiguration,
    ) -> Result<(), StartFailure> {
        let Some(ref country_code) = self.country_code else {
            if config.band == Band::Ghz5 {
                error!("Invalid country code, required for setting up AP in 5GHz");
                return Err(StartFailure::Generic);
            }
            return Ok(());
        };

        if let Err(e) = self.driver.set_regulatory_domain(iface, country_code).await {
            if config.band == Band::Ghz5 {
                error!("Failed to set country code, required for setting up AP in 5GHz: {}", e);
                return Err(StartFailure::Generic);
            }
            warn!("Failed to set country code {} on {}: {}", country_code, iface, e);
        }
        Ok(())
    }
}
