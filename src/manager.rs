//! Several AP controllers sharing one driver
//!
//! Each controller keeps its own state and queue; the manager only owns the
//! tasks and the role table that keeps the tethered role unique.

use crate::config::ControllerSettings;
use crate::controller::{ApController, ApHandle, ApRole, RoleTable};
use crate::driver::DriverControl;
use crate::listener::ApListener;
use crate::metrics::ApMetrics;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct ApManager {
    driver: Arc<dyn DriverControl>,
    metrics: Arc<dyn ApMetrics>,
    settings: ControllerSettings,
    roles: Arc<RoleTable>,
    controllers: Vec<(ApHandle, JoinHandle<()>)>,
}

impl ApManager {
    pub fn new(
        driver: Arc<dyn DriverControl>,
        metrics: Arc<dyn ApMetrics>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            driver,
            metrics,
            settings,
            roles: Arc::new(RoleTable::new()),
            controllers: Vec::new(),
        }
    }

    /// Spawn a new controller reporting to `listener`
    pub fn spawn_controller(&mut self, listener: Arc<dyn ApListener>) -> ApHandle {
        let (controller, handle) = ApController::with_roles(
            self.driver.clone(),
            listener,
            self.metrics.clone(),
            &self.settings,
            self.roles.clone(),
        );
        let task = controller.spawn();
        info!("Spawned AP controller {}", handle.id());
        self.controllers.push((handle.clone(), task));
        handle
    }

    pub fn handles(&self) -> Vec<ApHandle> {
        self.controllers.iter().map(|(h, _)| h.clone()).collect()
    }

    /// Controller currently holding the tethered role
    pub fn tethered(&self) -> Option<ApHandle> {
        self.controllers
            .iter()
            .map(|(h, _)| h)
            .find(|h| h.role() == ApRole::Tethered)
            .cloned()
    }

    /// Stop every controller and wait for their tasks to end
    pub async fn shutdown(&mut self) {
        for (handle, _) in &self.controllers {
            if let Err(e) = handle.shutdown() {
                warn!("Controller {} already gone: {}", handle.id(), e);
            }
        }
        for (handle, task) in self.controllers.drain(..) {
            if let Err(e) = task.await {
                warn!("Controller {} task failed: {}", handle.id(), e);
            }
        }
    }
}
