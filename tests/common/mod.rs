//! Shared fixtures for controller tests
//!
//! `FakeDriver` records every call and fails on demand. `RecordingListener`
//! keeps every notification so tests can assert on exact sequences.

#![allow(dead_code)]

use async_trait::async_trait;
use libapctl::{
    ApConfiguration, ApController, ApError, ApHandle, ApInfo, ApListener, ApMetrics, ApResult,
    ApState, Band, ControllerSettings, DriverControl, EventSink, MacAddress, StartFailure,
    TimeoutSettings,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const FACTORY_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

pub fn mac(last: u8) -> MacAddress {
    MacAddress::from([0x02, 0x00, 0x00, 0x00, 0x00, last])
}

/// Failure switches for `FakeDriver`
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    /// Fail the n-th (0-based) AP interface creation and every later one
    pub fail_ap_create_from: Option<usize>,
    pub fail_bridge_create: bool,
    /// Return an empty name instead of failing
    pub empty_ap_name: bool,
    /// Fail the n-th (0-based) push_configuration call
    pub fail_push_at: Option<usize>,
    pub fail_bridge_up: bool,
    pub fail_factory_address: bool,
    pub fail_set_address: bool,
    pub fail_regulatory: bool,
    pub supports_5ghz: bool,
    pub interfaces_up: bool,
    pub data_interface: Option<String>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            fail_ap_create_from: None,
            fail_bridge_create: false,
            empty_ap_name: false,
            fail_push_at: None,
            fail_bridge_up: false,
            fail_factory_address: false,
            fail_set_address: false,
            fail_regulatory: false,
            supports_5ghz: true,
            interfaces_up: true,
            data_interface: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeRecord {
    pub created: Vec<String>,
    pub bridges: Vec<String>,
    pub destroyed: Vec<String>,
    pub pushed: Vec<(String, ApConfiguration)>,
    pub addresses: Vec<(String, MacAddress)>,
    pub regulatory: Vec<(String, String)>,
    pub bridges_up: Vec<String>,
    pub ap_creates: usize,
    pub sink: Option<EventSink>,
}

pub struct FakeDriver {
    behavior: Mutex<FakeBehavior>,
    record: Mutex<FakeRecord>,
    next: AtomicU32,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(FakeBehavior::default())
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            record: Mutex::new(FakeRecord::default()),
            next: AtomicU32::new(0),
        })
    }

    pub fn behavior(&self) -> FakeBehavior {
        self.behavior.lock().unwrap().clone()
    }

    pub fn set_behavior(&self, f: impl FnOnce(&mut FakeBehavior)) {
        f(&mut self.behavior.lock().unwrap());
    }

    pub fn record<T>(&self, f: impl FnOnce(&FakeRecord) -> T) -> T {
        f(&self.record.lock().unwrap())
    }

    pub fn created(&self) -> Vec<String> {
        self.record(|r| r.created.clone())
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.record(|r| r.destroyed.clone())
    }

    pub fn pushed(&self) -> Vec<(String, ApConfiguration)> {
        self.record(|r| r.pushed.clone())
    }

    pub fn bridges_up(&self) -> Vec<String> {
        self.record(|r| r.bridges_up.clone())
    }

    /// Sink handed over by the most recent create call
    pub fn sink(&self) -> EventSink {
        self.record(|r| r.sink.clone()).expect("no interface created yet")
    }

    fn name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl DriverControl for FakeDriver {
    async fn create_ap_interface(&self, events: EventSink) -> ApResult<String> {
        let behavior = self.behavior();
        let mut record = self.record.lock().unwrap();
        let index = record.ap_creates;
        record.ap_creates += 1;
        record.sink = Some(events);

        if behavior.fail_ap_create_from.is_some_and(|from| index >= from) {
            return Err(ApError::DriverError("no free interface".to_string()));
        }
        if behavior.empty_ap_name {
            return Ok(String::new());
        }
        let name = self.name("ap");
        record.created.push(name.clone());
        Ok(name)
    }

    async fn create_bridge_interface(&self, events: EventSink) -> ApResult<String> {
        let behavior = self.behavior();
        let mut record = self.record.lock().unwrap();
        record.sink = Some(events);
        if behavior.fail_bridge_create {
            return Err(ApError::DriverError("bridge creation failed".to_string()));
        }
        let name = self.name("br");
        record.created.push(name.clone());
        record.bridges.push(name.clone());
        Ok(name)
    }

    async fn destroy_interface(&self, name: &str) {
        self.record.lock().unwrap().destroyed.push(name.to_string());
    }

    async fn push_configuration(
        &self,
        name: &str,
        config: &ApConfiguration,
        _events: EventSink,
    ) -> ApResult<()> {
        let behavior = self.behavior();
        let mut record = self.record.lock().unwrap();
        let index = record.pushed.len();
        record.pushed.push((name.to_string(), config.clone()));
        if behavior.fail_push_at == Some(index) {
            return Err(ApError::DriverError("hostapd refused configuration".to_string()));
        }
        Ok(())
    }

    async fn set_address(&self, name: &str, addr: MacAddress) -> ApResult<()> {
        if self.behavior().fail_set_address {
            return Err(ApError::NotSupported("MAC change".to_string()));
        }
        self.record.lock().unwrap().addresses.push((name.to_string(), addr));
        Ok(())
    }

    async fn get_factory_address(&self, _name: &str) -> ApResult<MacAddress> {
        if self.behavior().fail_factory_address {
            return Err(ApError::DriverError("no factory address".to_string()));
        }
        Ok(MacAddress::from(FACTORY_MAC))
    }

    async fn set_regulatory_domain(&self, name: &str, country_code: &str) -> ApResult<()> {
        if self.behavior().fail_regulatory {
            return Err(ApError::DriverError("regulatory domain rejected".to_string()));
        }
        self.record.lock().unwrap().regulatory.push((name.to_string(), country_code.to_string()));
        Ok(())
    }

    async fn is_interface_up(&self, _name: &str) -> bool {
        self.behavior().interfaces_up
    }

    async fn bring_bridge_up(&self, name: &str) -> ApResult<()> {
        if self.behavior().fail_bridge_up {
            return Err(ApError::DriverError("bridge stayed down".to_string()));
        }
        self.record.lock().unwrap().bridges_up.push(name.to_string());
        Ok(())
    }

    async fn supports_band(&self, band: Band) -> bool {
        match band {
            Band::Ghz5 | Band::Dual => self.behavior().supports_5ghz,
            Band::Ghz24 | Band::Any => true,
        }
    }

    async fn data_interface(&self, _ap_interface: &str) -> Option<String> {
        self.behavior().data_interface
    }
}

/// Notification captured by `RecordingListener`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Note {
    State(ApState, ApState, Option<StartFailure>),
    Clients(Vec<MacAddress>),
    Info(ApInfo),
    StartFailure,
    Started,
    Stopped,
}

#[derive(Default)]
pub struct RecordingListener {
    notes: Mutex<Vec<Note>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Note> {
        std::mem::take(&mut *self.notes.lock().unwrap())
    }

    /// Reported state transitions as (new, previous)
    pub fn states(&self) -> Vec<(ApState, ApState)> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::State(new, prev, _) => Some((new, prev)),
                _ => None,
            })
            .collect()
    }

    pub fn client_updates(&self) -> Vec<Vec<MacAddress>> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Clients(clients) => Some(clients),
                _ => None,
            })
            .collect()
    }

    pub fn infos(&self) -> Vec<ApInfo> {
        self.notes()
            .into_iter()
            .filter_map(|n| match n {
                Note::Info(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, note: &Note) -> usize {
        self.notes().iter().filter(|n| *n == note).count()
    }

    fn push(&self, note: Note) {
        self.notes.lock().unwrap().push(note);
    }
}

impl ApListener for RecordingListener {
    fn on_state_changed(
        &self,
        new_state: ApState,
        previous_state: ApState,
        reason: Option<StartFailure>,
    ) {
        self.push(Note::State(new_state, previous_state, reason));
    }

    fn on_clients_changed(&self, clients: &[MacAddress]) {
        self.push(Note::Clients(clients.to_vec()));
    }

    fn on_info_changed(&self, info: &ApInfo) {
        self.push(Note::Info(*info));
    }

    fn on_start_failure(&self) {
        self.push(Note::StartFailure);
    }

    fn on_started(&self) {
        self.push(Note::Started);
    }

    fn on_stopped(&self) {
        self.push(Note::Stopped);
    }
}

/// Metrics calls as strings, in order
#[derive(Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ApMetrics for RecordingMetrics {
    fn start_result(&self, success: bool, reason: Option<StartFailure>) {
        self.push(format!("start_result({}, {:?})", success, reason));
    }

    fn clients_changed(&self, count: usize) {
        self.push(format!("clients_changed({})", count));
    }

    fn channel_switched(&self, info: &ApInfo) {
        self.push(format!("channel_switched({})", info.frequency));
    }

    fn band_preference_unsatisfied(&self) {
        self.push("band_preference_unsatisfied".to_string());
    }

    fn up_changed(&self, is_up: bool) {
        self.push(format!("up_changed({})", is_up));
    }
}

pub fn settings(country_code: Option<&str>) -> ControllerSettings {
    ControllerSettings {
        country_code: country_code.map(str::to_string),
        timeout: TimeoutSettings::default(),
    }
}

pub struct Harness {
    pub driver: Arc<FakeDriver>,
    pub listener: Arc<RecordingListener>,
    pub metrics: Arc<RecordingMetrics>,
    pub controller: ApController,
    pub handle: ApHandle,
}

impl Harness {
    pub fn new(behavior: FakeBehavior, settings: ControllerSettings) -> Self {
        let driver = FakeDriver::with_behavior(behavior);
        let listener = RecordingListener::new();
        let metrics = RecordingMetrics::new();
        let (controller, handle) = ApController::new(
            driver.clone(),
            listener.clone(),
            metrics.clone(),
            &settings,
        );
        Self { driver, listener, metrics, controller, handle }
    }

    pub fn default_us() -> Self {
        Self::new(FakeBehavior::default(), settings(Some("US")))
    }

    /// Queue a start and process it
    pub async fn start(&mut self, config: ApConfiguration) {
        self.handle.start(config).unwrap();
        self.controller.run_until_idle().await;
    }

    pub async fn settle(&mut self) {
        self.controller.run_until_idle().await;
    }
}
