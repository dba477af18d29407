//! Notifications produced by the AP controller

use crate::error::StartFailure;
use crate::info::ApInfo;
use crate::mac::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// AP state as reported to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
    Failed,
}

impl fmt::Display for ApState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApState::Disabled => "disabled",
            ApState::Enabling => "enabling",
            ApState::Enabled => "enabled",
            ApState::Disabling => "disabling",
            ApState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Receiver of controller notifications.
///
/// Called from the controller task, in processing order. Implementations
/// must not block.
pub trait ApListener: Send + Sync {
    /// `reason` is set only when `new_state` is `Failed`
    fn on_state_changed(
        &self,
        new_state: ApState,
        previous_state: ApState,
        reason: Option<StartFailure>,
    );

    fn on_clients_changed(&self, clients: &[MacAddress]);

    fn on_info_changed(&self, info: &ApInfo);

    fn on_start_failure(&self) {}

    fn on_started(&self) {}

    fn on_stopped(&self) {}
}

/// Owned form of a listener notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApEvent {
    StateChanged {
        new_state: ApState,
        previous_state: ApState,
        reason: Option<StartFailure>,
    },
    ClientsChanged {
        clients: Vec<MacAddress>,
    },
    InfoChanged {
        info: ApInfo,
    },
    StartFailure,
    Started,
    Stopped,
}

/// Forwards every notification as an `ApEvent` over a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ApEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ApEvent) {
        if self.tx.send(event).is_err() {
            warn!("AP event receiver dropped");
        }
    }
}

impl ApListener for ChannelListener {
    fn on_state_changed(
        &self,
        new_state: ApState,
        previous_state: ApState,
        reason: Option<StartFailure>,
    ) {
        self.send(ApEvent::StateChanged { new_state, previous_state, reason });
    }

    fn on_clients_changed(&self, clients: &[MacAddress]) {
        self.send(ApEvent::ClientsChanged { clients: clients.to_vec() });
    }

    fn on_info_changed(&self, info: &ApInfo) {
        self.send(ApEvent::InfoChanged { info: *info });
    }

    fn on_start_failure(&self) {
        self.send(ApEvent::StartFailure);
    }

    fn on_started(&self) {
        self.send(ApEvent::Started);
    }

    fn on_stopped(&self) {
        self.send(ApEvent::Stopped);
    }
}

/// Logs every notification
pub struct LoggingListener;

impl ApListener for LoggingListener {
    fn on_state_changed(
        &self,
        new_state: ApState,
        previous_state: ApState,
        reason: Option<StartFailure>,
    ) {
        match reason {
            Some(reason) => warn!("AP state {} -> {} ({})", previous_state, new_state, reason),
            None => info!("AP state {} -> {}", previous_state, new_state),
        }
    }

    fn on_clients_changed(&self, clients: &[MacAddress]) {
        info!("Connected stations ({}): {:?}", clients.len(),
              clients.iter().map(|c| c.to_string()).collect::<Vec<_>>());
    }

    fn on_info_changed(&self, info: &ApInfo) {
        info!("Channel changed: {} MHz, {:?}", info.frequency, info.bandwidth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards_in_order() {
        let (listener, mut rx) = ChannelListener::new();
        listener.on_state_changed(ApState::Enabling, ApState::Disabled, None);
        listener.on_started();
        listener.on_state_changed(
            ApState::Failed,
            ApState::Enabling,
            Some(StartFailure::NoChannel),
        );

        assert_eq!(rx.try_recv().unwrap(), ApEvent::StateChanged {
            new_state: ApState::Enabling,
            previous_state: ApState::Disabled,
            reason: None,
        });
        assert_eq!(rx.try_recv().unwrap(), ApEvent::Started);
        assert!(matches!(rx.try_recv().unwrap(),
            ApEvent::StateChanged { reason: Some(StartFailure::NoChannel), .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let event = ApEvent::StateChanged {
            new_state: ApState::Failed,
            previous_state: ApState::Enabled,
            reason: Some(StartFailure::Generic),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["new_state"], "failed");
        assert_eq!(json["reason"], "generic");
    }
}
