//! Command handle for an AP controller

use super::{ApMessage, ApRole, ApStatus, RoleTable};
use crate::config::ApConfiguration;
use crate::error::{ApError, ApResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle that posts commands onto a controller's queue.
///
/// Outcomes of `start`/`stop` are observed through the controller's
/// listener; the returned `Result` only says whether the command was queued.
#[derive(Clone)]
pub struct ApHandle {
    id: u64,
    queue: mpsc::UnboundedSender<ApMessage>,
    roles: Arc<RoleTable>,
}

impl ApHandle {
    pub(super) fn new(
        id: u64,
        queue: mpsc::UnboundedSender<ApMessage>,
        roles: Arc<RoleTable>,
    ) -> Self {
        Self { id, queue, roles }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, msg: ApMessage) -> ApResult<()> {
        self.queue.send(msg).map_err(|_| ApError::ControllerGone)
    }

    /// Start the AP; ignored while already running
    pub fn start(&self, config: ApConfiguration) -> ApResult<()> {
        self.send(ApMessage::Start(config))
    }

    /// Request a clean shutdown; ignored while idle
    pub fn stop(&self) -> ApResult<()> {
        self.send(ApMessage::Stop)
    }

    /// Change the idle-timeout policy at runtime
    pub fn set_timeout_enabled(&self, enabled: bool) -> ApResult<()> {
        self.send(ApMessage::SetTimeoutEnabled(enabled))
    }

    /// Stop if running and end the controller task
    pub fn shutdown(&self) -> ApResult<()> {
        self.send(ApMessage::Shutdown)
    }

    pub async fn status(&self) -> ApResult<ApStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(ApMessage::Status(tx))?;
        rx.await.map_err(|_| ApError::ControllerGone)
    }

    pub fn role(&self) -> ApRole {
        self.roles.get(self.id)
    }

    /// Assign the role for this run. Fails if a role is already set, if
    /// `role` is `Unspecified`, or if another controller sharing the role
    /// table is already tethered.
    pub fn set_role(&self, role: ApRole) -> ApResult<()> {
        self.roles.assign(self.id, role)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
