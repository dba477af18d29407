//! Driver control boundary
//!
//! The controller only talks to the wireless stack through `DriverControl`.
//! Asynchronous events flow back through an `EventSink`, which posts them
//! onto the same queue that carries start/stop commands.

#[cfg(feature = "system-driver")]
pub mod hostapd;
#[cfg(feature = "system-driver")]
pub mod system;

use crate::config::{ApConfiguration, Band};
use crate::controller::ApMessage;
use crate::error::ApResult;
use crate::info::ChannelWidth;
use crate::mac::MacAddress;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Event reported by the driver for an interface it manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    InterfaceUp(String),
    InterfaceDown(String),
    InterfaceDestroyed(String),
    /// Full set of associated stations across the AP
    StationsChanged(Vec<MacAddress>),
    StationConnected(MacAddress),
    StationDisconnected(MacAddress),
    ChannelSwitched { frequency: i32, bandwidth: ChannelWidth },
    /// The AP daemon or driver failed; fatal for the current run
    Failure,
}

/// Handle given to the driver for reporting events back to one controller
#[derive(Debug, Clone)]
pub struct EventSink {
    controller: u64,
    queue: mpsc::UnboundedSender<ApMessage>,
}

impl EventSink {
    pub(crate) fn new(controller: u64, queue: mpsc::UnboundedSender<ApMessage>) -> Self {
        Self { controller, queue }
    }

    /// Id of the controller this sink reports to; interfaces created with
    /// sinks of the same id belong to the same AP
    pub fn controller_id(&self) -> u64 {
        self.controller
    }

    pub fn send(&self, event: DriverEvent) {
        if self.queue.send(ApMessage::Driver(event)).is_err() {
            debug!("Controller gone, dropping driver event");
        }
    }

    pub fn interface_up(&self, name: &str) {
        self.send(DriverEvent::InterfaceUp(name.to_string()));
    }

    pub fn interface_down(&self, name: &str) {
        self.send(DriverEvent::InterfaceDown(name.to_string()));
    }

    pub fn interface_destroyed(&self, name: &str) {
        self.send(DriverEvent::InterfaceDestroyed(name.to_string()));
    }

    pub fn stations_changed(&self, stations: Vec<MacAddress>) {
        self.send(DriverEvent::StationsChanged(stations));
    }

    pub fn station_connected(&self, mac: MacAddress) {
        self.send(DriverEvent::StationConnected(mac));
    }

    pub fn station_disconnected(&self, mac: MacAddress) {
        self.send(DriverEvent::StationDisconnected(mac));
    }

    pub fn channel_switched(&self, frequency: i32, bandwidth: ChannelWidth) {
        self.send(DriverEvent::ChannelSwitched { frequency, bandwidth });
    }

    pub fn failure(&self) {
        self.send(DriverEvent::Failure);
    }

    /// Whether the owning controller still accepts events
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Operations the controller needs from the wireless stack.
///
/// Calls are awaited one at a time from the controller task; a slow call
/// delays every queued event behind it.
#[async_trait]
pub trait DriverControl: Send + Sync {
    /// Create an interface in AP mode and return its name
    async fn create_ap_interface(&self, events: EventSink) -> ApResult<String>;

    /// Create a bridge interface for a two-leg setup and return its name
    async fn create_bridge_interface(&self, events: EventSink) -> ApResult<String>;

    /// Tear an interface down; errors are logged by the driver
    async fn destroy_interface(&self, name: &str);

    /// Start the AP protocol on `name` with `config`
    async fn push_configuration(
        &self,
        name: &str,
        config: &ApConfiguration,
        events: EventSink,
    ) -> ApResult<()>;

    async fn set_address(&self, name: &str, addr: MacAddress) -> ApResult<()>;

    async fn get_factory_address(&self, name: &str) -> ApResult<MacAddress>;

    async fn set_regulatory_domain(&self, name: &str, country_code: &str) -> ApResult<()>;

    async fn is_interface_up(&self, name: &str) -> bool;

    /// Bring a bridge administratively up once both legs run
    async fn bring_bridge_up(&self, name: &str) -> ApResult<()>;

    /// Whether the hardware can operate an AP on `band`
    async fn supports_band(&self, band: Band) -> bool;

    /// Distinct data interface carrying traffic for `ap_interface`, if any
    async fn data_interface(&self, _ap_interface: &str) -> Option<String> {
        None
    }
}
