//! Controller roles

use crate::error::{ApError, ApResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// What an AP controller is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApRole {
    #[default]
    Unspecified,
    /// Shared uplink ("softap"); at most one controller at a time
    Tethered,
    LocalOnly,
}

/// Roles of every controller sharing this table.
///
/// A role is assigned once per run and cleared when the controller returns
/// to idle; switching roles in place is rejected.
#[derive(Debug, Default)]
pub struct RoleTable {
    next_id: AtomicU64,
    roles: RwLock<HashMap<u64, ApRole>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<u64, ApRole>> {
        self.roles.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, ApRole>> {
        self.roles.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().insert(id, ApRole::Unspecified);
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.write().remove(&id);
    }

    pub fn get(&self, id: u64) -> ApRole {
        self.read().get(&id).copied().unwrap_or_default()
    }

    pub fn assign(&self, id: u64, role: ApRole) -> ApResult<()> {
        let mut roles = self.write();

        if role == ApRole::Unspecified {
            error!("Controller {}: {:?} is not an AP role", id, role);
            return Err(ApError::InvalidState(format!("{:?} is not an AP role", role)));
        }

        let current = roles.get(&id).copied().ok_or_else(|| {
            ApError::InvalidState(format!("Controller {} is not registered", id))
        })?;
        if current != ApRole::Unspecified {
            error!(
                "Controller {}: role already {:?}, in-place switching to {:?} is not allowed",
                id, current, role
            );
            return Err(ApError::InvalidState(format!("Role already set to {:?}", current)));
        }

        if role == ApRole::Tethered {
            let holder = roles
                .iter()
                .find(|(other, r)| **other != id && **r == ApRole::Tethered);
            if let Some(other) = holder {
                error!("Controller {}: tethered role already held by controller {}", id, other.0);
                return Err(ApError::InvalidState(
                    "Tethered role is already held by another controller".to_string(),
                ));
            }
        }

        roles.insert(id, role);
        Ok(())
    }

    pub(crate) fn clear(&self, id: u64) {
        if let Some(role) = self.write().get_mut(&id) {
            *role = ApRole::Unspecified;
        }
    }

    /// Ids of controllers currently holding `role`
    pub fn holders(&self, role: ApRole) -> Vec<u64> {
        let mut ids: Vec<u64> = self.read()
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}
