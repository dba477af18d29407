//! apctl - Access Point Control Library
//!
//! Async lifecycle control for software access points:
//! - Single-interface, dual-band and privacy-transition (OWE) setups
//! - Station tracking and idle shutdown
//! - Channel and bandwidth reporting
//! - Driver abstraction with an iw/ip/hostapd backed implementation
//!
//! Each `ApController` serializes commands, driver events and timeouts
//! through one queue; callers drive it through a cloneable `ApHandle` and
//! observe it through an `ApListener`.

pub mod error;
pub mod mac;
pub mod config;
pub mod info;
pub mod clients;
pub mod timeout;
pub mod listener;
pub mod metrics;
pub mod driver;
pub mod controller;
pub mod manager;

#[cfg(feature = "system-driver")]
pub mod link_monitor;

// Re-export commonly used types
pub use error::{ApError, ApResult, StartFailure};
pub use mac::MacAddress;
pub use config::{
    ApConfiguration, ApctlConfig, Band, ControllerSettings, DriverSettings,
    SecurityMode, TimeoutSettings,
};
pub use info::{ApInfo, ChannelWidth};
pub use clients::ClientRegistry;
pub use listener::{ApEvent, ApListener, ApState, ChannelListener, LoggingListener};
pub use metrics::{ApCounters, ApMetrics, CountersSnapshot, NoopMetrics};
pub use driver::{DriverControl, DriverEvent, EventSink};
pub use controller::{
    ApController, ApHandle, ApInstance, ApRole, ApStatus, ControllerState,
    SetupStrategy,
};
pub use manager::ApManager;

#[cfg(feature = "system-driver")]
pub use driver::system::SystemDriver;
#[cfg(feature = "system-driver")]
pub use link_monitor::{LinkEvent, LinkMonitor};
