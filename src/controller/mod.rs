//! Access point lifecycle controller
//!
//! One controller owns one logical AP. Commands from `ApHandle`, driver
//! events from `EventSink` and idle-timeout expiries all arrive on a single
//! queue and are processed one at a time, to completion, in arrival order.
//! All controller state is mutated from that one task.
//!
//! ```text
//!   Idle --start--> [Starting] --ok--> Running
//!     ^                 |                 |
//!     +----- failure ---+                 |
//!     +--- stop | timeout | failure | interface down | destroyed ---+
//! ```

mod handle;
mod multi;
mod role;
mod setup;

pub use handle::ApHandle;
pub use multi::{companion_ssid, SetupStrategy, SubInterfaceSet, COMPANION_SSID_PREFIX};
pub use role::{ApRole, RoleTable};

use crate::clients::ClientRegistry;
use crate::config::{ApConfiguration, ControllerSettings};
use crate::driver::{DriverControl, DriverEvent, EventSink};
use crate::error::StartFailure;
use crate::info::ApInfo;
use crate::listener::{ApListener, ApState};
use crate::mac::MacAddress;
use crate::metrics::ApMetrics;
use crate::timeout::TimeoutScheduler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything the controller queue carries
#[derive(Debug)]
pub enum ApMessage {
    Start(ApConfiguration),
    Stop,
    SetTimeoutEnabled(bool),
    /// Idle deadline expired; carries the token of the deadline
    IdleTimeout(u64),
    Driver(DriverEvent),
    Status(oneshot::Sender<ApStatus>),
    /// Stop if running, then end the controller task
    Shutdown,
}

/// Lifecycle state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    /// Only held while setup runs inside a single start command
    Starting,
    Running,
}

/// Runtime identity of one AP attempt
#[derive(Debug, Clone)]
pub struct ApInstance {
    /// Control interface; the bridge in two-leg setups
    pub ap_interface: String,
    /// Interface whose up/down/destroy events drive the lifecycle
    pub data_interface: String,
    pub sub_interfaces: Option<SubInterfaceSet>,
    pub is_up: bool,
    pub is_destroyed: bool,
    pub config: ApConfiguration,
    pub started_at: String,
}

impl ApInstance {
    fn new(ap_interface: String, data_interface: String, config: ApConfiguration) -> Self {
        Self {
            ap_interface,
            data_interface,
            sub_interfaces: None,
            is_up: false,
            is_destroyed: false,
            config,
            started_at: chrono::Local::now().format("%m-%d %H:%M:%S%.3f").to_string(),
        }
    }
}

/// Point-in-time dump of a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApStatus {
    pub state: ControllerState,
    pub reported_state: ApState,
    pub role: ApRole,
    pub ap_interface: Option<String>,
    pub data_interface: Option<String>,
    pub sub_interfaces: Vec<String>,
    pub is_up: bool,
    pub config: Option<ApConfiguration>,
    pub clients: Vec<MacAddress>,
    pub timeout_enabled: bool,
    pub timeout_delay_secs: u64,
    pub timeout_remaining_secs: Option<u64>,
    pub info: ApInfo,
    pub started_at: Option<String>,
}

pub struct ApController {
    id: u64,
    driver: Arc<dyn DriverControl>,
    listener: Arc<dyn ApListener>,
    metrics: Arc<dyn ApMetrics>,
    roles: Arc<RoleTable>,
    country_code: Option<String>,
    queue_tx: mpsc::UnboundedSender<ApMessage>,
    queue_rx: mpsc::UnboundedReceiver<ApMessage>,
    state: ControllerState,
    reported: ApState,
    instance: Option<ApInstance>,
    clients: ClientRegistry,
    info: ApInfo,
    timeout: TimeoutScheduler,
}

impl ApController {
    /// Create a controller with its own role table
    pub fn new(
        driver: Arc<dyn DriverControl>,
        listener: Arc<dyn ApListener>,
        metrics: Arc<dyn ApMetrics>,
        settings: &ControllerSettings,
    ) -> (Self, ApHandle) {
        Self::with_roles(driver, listener, metrics, settings, Arc::new(RoleTable::new()))
    }

    /// Create a controller sharing `roles` with other controllers
    pub fn with_roles(
        driver: Arc<dyn DriverControl>,
        listener: Arc<dyn ApListener>,
        metrics: Arc<dyn ApMetrics>,
        settings: &ControllerSettings,
        roles: Arc<RoleTable>,
    ) -> (Self, ApHandle) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let id = roles.register();
        let timeout = TimeoutScheduler::new(
            settings.timeout.enabled,
            settings.timeout.delay(),
            queue_tx.clone(),
        );

        let handle = ApHandle::new(id, queue_tx.clone(), roles.clone());
        let controller = Self {
            id,
            driver,
            listener,
            metrics,
            roles,
            country_code: settings.country_code.as_ref().map(|c| c.to_uppercase()),
            queue_tx,
            queue_rx,
            state: ControllerState::Idle,
            reported: ApState::Disabled,
            instance: None,
            clients: ClientRegistry::new(),
            info: ApInfo::disabled(),
            timeout,
        };

        (controller, handle)
    }

    /// Run the controller on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process messages until shut down
    pub async fn run(mut self) {
        debug!("AP controller {} running", self.id);
        while self.step().await {}
        debug!("AP controller {} exited", self.id);
    }

    /// Wait for one message and process it. Returns false after shutdown.
    pub async fn step(&mut self) -> bool {
        match self.queue_rx.recv().await {
            Some(msg) => self.handle_message(msg).await,
            None => false,
        }
    }

    /// Process every message already queued, without waiting for more
    pub async fn run_until_idle(&mut self) -> bool {
        while let Ok(msg) = self.queue_rx.try_recv() {
            if !self.handle_message(msg).await {
                return false;
            }
        }
        true
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn reported_state(&self) -> ApState {
        self.reported
    }

    pub fn instance(&self) -> Option<&ApInstance> {
        self.instance.as_ref()
    }

    pub fn client_count(&self) -> usize {
        self.clients.count()
    }

    pub fn info(&self) -> ApInfo {
        self.info
    }

    pub fn status(&self) -> ApStatus {
        let instance = self.instance.as_ref();
        ApStatus {
            state: self.state,
            reported_state: self.reported,
            role: self.roles.get(self.id),
            ap_interface: instance.map(|i| i.ap_interface.clone()),
            data_interface: instance.map(|i| i.data_interface.clone()),
            sub_interfaces: instance
                .and_then(|i| i.sub_interfaces.as_ref())
                .map(|s| s.names())
                .unwrap_or_default(),
            is_up: instance.map(|i| i.is_up).unwrap_or(false),
            config: instance.map(|i| i.config.clone()),
            clients: self.clients.snapshot(),
            timeout_enabled: self.timeout.is_enabled(),
            timeout_delay_secs: self.timeout.delay().as_secs(),
            timeout_remaining_secs: self.timeout.remaining().map(|d| d.as_secs()),
            info: self.info,
            started_at: instance.map(|i| i.started_at.clone()),
        }
    }

    fn event_sink(&self) -> EventSink {
        EventSink::new(self.id, self.queue_tx.clone())
    }

    async fn handle_message(&mut self, msg: ApMessage) -> bool {
        match msg {
            ApMessage::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ApMessage::SetTimeoutEnabled(enabled) => self.on_timeout_toggled(enabled),
            ApMessage::Shutdown => {
                if self.state == ControllerState::Running {
                    self.stop_running().await;
                }
                return false;
            }
            msg => match self.state {
                ControllerState::Idle => self.handle_idle(msg).await,
                ControllerState::Running => self.handle_running(msg).await,
                ControllerState::Starting => warn!("Dropping {:?} received while starting", msg),
            },
        }
        true
    }

    async fn handle_idle(&mut self, msg: ApMessage) {
        match msg {
            ApMessage::Start(config) => self.start(config).await,
            ApMessage::Stop => debug!("AP already idle, ignoring stop"),
            ApMessage::IdleTimeout(token) => {
                self.timeout.take_fired(token);
                debug!("Ignoring idle timeout while idle");
            }
            other => debug!("Ignoring {:?} while idle", other),
        }
    }

    async fn handle_running(&mut self, msg: ApMessage) {
        match msg {
            ApMessage::Start(_) => debug!("AP already started, ignoring start"),
            ApMessage::Stop => self.stop_running().await,
            ApMessage::IdleTimeout(token) => self.on_idle_timeout(token).await,
            ApMessage::Driver(event) => self.handle_driver_event(event).await,
            other => debug!("Ignoring {:?} while running", other),
        }
    }

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::InterfaceUp(name) => {
                if self.is_data_interface(&name) {
                    self.on_up_changed(true).await;
                }
            }
            DriverEvent::InterfaceDown(name) => {
                if self.is_data_interface(&name) {
                    self.on_up_changed(false).await;
                }
            }
            DriverEvent::InterfaceDestroyed(name) => self.on_interface_destroyed(&name).await,
            DriverEvent::StationsChanged(stations) => {
                debug!("Setting connected stations from snapshot of {}", stations.len());
                if self.clients.replace(&stations) {
                    self.clients_updated();
                }
            }
            DriverEvent::StationConnected(mac) => {
                if self.clients.insert(mac) {
                    self.clients_updated();
                }
            }
            DriverEvent::StationDisconnected(mac) => {
                if self.clients.remove(&mac) {
                    self.clients_updated();
                }
            }
            DriverEvent::ChannelSwitched { frequency, bandwidth } => {
                if frequency < 0 {
                    error!("Invalid ap channel frequency: {}", frequency);
                    return;
                }
                debug!("Channel switched. Frequency: {} Bandwidth: {:?}", frequency, bandwidth);
                self.set_channel(ApInfo::new(frequency, bandwidth));
            }
            DriverEvent::Failure => {
                warn!("AP daemon failure, stop and report failure");
                self.fail_running().await;
            }
        }
    }

    fn is_data_interface(&self, name: &str) -> bool {
        self.instance
            .as_ref()
            .map(|i| i.data_interface == name)
            .unwrap_or(false)
    }

    fn report(&mut self, new_state: ApState, reason: Option<StartFailure>) {
        let previous = self.reported;
        self.reported = new_state;
        self.listener.on_state_changed(new_state, previous, reason);
    }

    async fn start(&mut self, config: ApConfiguration) {
        info!(
            "Starting AP '{}' (band {}, security {:?})",
            config.ssid, config.band, config.security
        );

        if let Err(e) = config.validate() {
            error!("Unable to start AP without valid configuration: {}", e);
            self.start_failed(StartFailure::Generic);
            return;
        }

        self.state = ControllerState::Starting;
        let strategy = SetupStrategy::for_config(&config);
        let result = match strategy {
            SetupStrategy::Single => self.setup_single(config).await,
            SetupStrategy::DualBand | SetupStrategy::PrivacyTransition => {
                self.setup_pair(strategy, config).await
            }
        };

        match result {
            Ok(instance) => self.enter_running(instance).await,
            Err(reason) => {
                error!("{:?} AP start failed: {}", strategy, reason);
                self.start_failed(reason);
            }
        }
    }

    fn start_failed(&mut self, reason: StartFailure) {
        self.state = ControllerState::Idle;
        self.instance = None;
        self.report(ApState::Failed, Some(reason));
        self.metrics.start_result(false, Some(reason));
        self.listener.on_start_failure();
    }

    async fn enter_running(&mut self, mut instance: ApInstance) {
        instance.is_up = false;
        instance.is_destroyed = false;
        let up = self.driver.is_interface_up(&instance.data_interface).await;
        info!(
            "AP running on {} (data interface {})",
            instance.ap_interface, instance.data_interface
        );

        self.instance = Some(instance);
        self.state = ControllerState::Running;
        debug!("Resetting connected clients on start");
        self.clients = ClientRegistry::new();
        self.on_up_changed(up).await;
        if self.state == ControllerState::Running {
            self.timeout.schedule();
        }
    }

    async fn on_up_changed(&mut self, is_up: bool) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        if instance.is_up == is_up {
            return;
        }
        instance.is_up = is_up;
        self.metrics.up_changed(is_up);

        if is_up {
            info!("AP is ready for use");
            self.report(ApState::Enabled, None);
            self.listener.on_started();
            self.metrics.start_result(true, None);
            self.listener.on_clients_changed(&self.clients.snapshot());
        } else {
            warn!("Interface went down, stop and report failure");
            self.fail_running().await;
        }
    }

    fn clients_updated(&mut self) {
        let snapshot = self.clients.snapshot();
        debug!("The connected wifi stations have changed with count: {}", snapshot.len());
        self.listener.on_clients_changed(&snapshot);
        self.metrics.clients_changed(snapshot.len());

        if snapshot.is_empty() {
            self.timeout.schedule();
        } else {
            self.timeout.cancel();
        }
    }

    fn set_channel(&mut self, info: ApInfo) {
        if info == self.info {
            return;
        }
        self.info = info;
        self.listener.on_info_changed(&info);

        // The disabled sentinel and invalid widths stay out of the metrics
        if !info.is_valid() {
            return;
        }
        self.metrics.channel_switched(&info);
        if let Some(instance) = self.instance.as_ref() {
            if info.violates(instance.config.band) {
                error!("Channel does not satisfy user band preference: {}", info.frequency);
                self.metrics.band_preference_unsatisfied();
            }
        }
    }

    fn on_timeout_toggled(&mut self, enabled: bool) {
        if !self.timeout.set_enabled(enabled) {
            return;
        }
        info!("Idle timeout {}", if enabled { "enabled" } else { "disabled" });
        if enabled && self.state == ControllerState::Running && self.clients.is_empty() {
            self.timeout.schedule();
        }
    }

    async fn on_idle_timeout(&mut self, token: u64) {
        if !self.timeout.take_fired(token) {
            debug!("Dropping stale idle timeout {}", token);
            return;
        }
        if !self.timeout.is_enabled() {
            warn!("Timeout message received while timeout is disabled. Dropping.");
            return;
        }
        if !self.clients.is_empty() {
            warn!("Timeout message received but has clients. Dropping.");
            return;
        }
        info!("Timeout message received. Stopping AP.");
        self.report(ApState::Disabling, None);
        self.leave_running().await;
    }

    async fn stop_running(&mut self) {
        info!("Stopping AP");
        self.report(ApState::Disabling, None);
        self.leave_running().await;
    }

    async fn fail_running(&mut self) {
        self.report(ApState::Failed, Some(StartFailure::Generic));
        self.report(ApState::Disabling, None);
        self.leave_running().await;
    }

    /// Common exit from `Running`: teardown, reset, notify
    async fn leave_running(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            if !instance.is_destroyed {
                self.teardown(&mut instance).await;
            }
            self.metrics.up_changed(false);
        }

        self.timeout.cancel();
        debug!("Resetting connected clients on stop");
        if self.clients.clear() {
            self.listener.on_clients_changed(&[]);
            self.metrics.clients_changed(0);
        }

        self.state = ControllerState::Idle;
        self.roles.clear(self.id);
        self.report(ApState::Disabled, None);
        self.listener.on_stopped();
        self.set_channel(ApInfo::disabled());
    }

    /// Destroy every interface of `instance` not already gone
    async fn teardown(&mut self, instance: &mut ApInstance) {
        if let Some(set) = instance.sub_interfaces.as_mut() {
            self.teardown_legs(set).await;
        }
        self.driver.destroy_interface(&instance.ap_interface).await;
        info!("AP is stopped");
    }
}

impl Drop for ApController {
    fn drop(&mut self) {
        self.roles.unregister(self.id);
    }
}
