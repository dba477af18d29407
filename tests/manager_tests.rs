//! Several controllers on one driver, driven through their handles

mod common;

use common::*;
use libapctl::{
    ApConfiguration, ApEvent, ApManager, ApRole, ApState, ChannelListener, ControllerState,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok};

async fn wait_for_state(rx: &mut UnboundedReceiver<ApEvent>, state: ApState) {
    while let Some(event) = rx.recv().await {
        if let ApEvent::StateChanged { new_state, .. } = event {
            if new_state == state {
                return;
            }
        }
    }
    panic!("event stream ended before {:?}", state);
}

#[tokio::test]
async fn test_tethered_role_is_unique() {
    let driver = FakeDriver::new();
    let mut manager = ApManager::new(driver.clone(), RecordingMetrics::new(), settings(Some("US")));

    let first = manager.spawn_controller(RecordingListener::new());
    let second = manager.spawn_controller(RecordingListener::new());
    assert_ne!(first.id(), second.id());

    assert_ok!(first.set_role(ApRole::Tethered));
    assert_err!(second.set_role(ApRole::Tethered));
    assert_ok!(second.set_role(ApRole::LocalOnly));
    assert_eq!(manager.tethered().map(|h| h.id()), Some(first.id()));

    manager.shutdown().await;
    assert!(first.is_closed());
    assert!(second.is_closed());
}

#[tokio::test]
async fn test_tethered_role_released_after_stop() {
    let driver = FakeDriver::new();
    let mut manager = ApManager::new(driver.clone(), RecordingMetrics::new(), settings(Some("US")));

    let (listener, mut events) = ChannelListener::new();
    let first = manager.spawn_controller(Arc::new(listener));
    let second = manager.spawn_controller(RecordingListener::new());

    assert_ok!(first.set_role(ApRole::Tethered));
    assert_ok!(first.start(ApConfiguration::new("Tether")));
    wait_for_state(&mut events, ApState::Enabled).await;

    assert_ok!(first.stop());
    wait_for_state(&mut events, ApState::Disabled).await;

    assert_eq!(first.role(), ApRole::Unspecified);
    assert_ok!(second.set_role(ApRole::Tethered));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_status_over_handle() {
    let driver = FakeDriver::new();
    let mut manager = ApManager::new(driver.clone(), RecordingMetrics::new(), settings(Some("US")));

    let (listener, mut events) = ChannelListener::new();
    let handle = manager.spawn_controller(Arc::new(listener));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Idle);
    assert_eq!(status.reported_state, ApState::Disabled);

    assert_ok!(handle.start(ApConfiguration::new("Status")));
    wait_for_state(&mut events, ApState::Enabled).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Running);
    assert_eq!(status.ap_interface.as_deref(), Some("ap0"));
    assert_eq!(status.config.unwrap().ssid, "Status");

    manager.shutdown().await;
    assert_eq!(driver.destroyed(), vec!["ap0"]);
}

#[tokio::test]
async fn test_controllers_use_distinct_interfaces() {
    let driver = FakeDriver::new();
    let mut manager = ApManager::new(driver.clone(), RecordingMetrics::new(), settings(Some("US")));

    let (first_listener, mut first_events) = ChannelListener::new();
    let (second_listener, mut second_events) = ChannelListener::new();
    let first = manager.spawn_controller(Arc::new(first_listener));
    let second = manager.spawn_controller(Arc::new(second_listener));

    assert_ok!(first.start(ApConfiguration::new("One")));
    wait_for_state(&mut first_events, ApState::Enabled).await;
    assert_ok!(second.start(ApConfiguration::new("Two")));
    wait_for_state(&mut second_events, ApState::Enabled).await;

    assert_eq!(manager.handles().len(), 2);
    assert_eq!(driver.created(), vec!["ap0", "ap1"]);

    manager.shutdown().await;
    let mut destroyed = driver.destroyed();
    destroyed.sort();
    assert_eq!(destroyed, vec!["ap0", "ap1"]);
}
