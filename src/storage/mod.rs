//! In-process document stores.
//!
//! The gateway's core only needs a simple CRUD collaborator
//! (create/find/find_by_id/update/delete); these in-memory stores implement
//! exactly that, keyed by generated ids, behind a read/write lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::permissions::PermissionSet;
use crate::auth::Role;
use crate::now_ms;

/// What kind of display a device record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Totem,
    Tv,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Totem => "totem",
            DeviceKind::Tv => "tv",
        }
    }
}

/// A managed display device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Owning operator's user id.
    pub owner_id: String,
    pub last_update_ms: u64,
}

/// Fields accepted when creating a device.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    /// Admins may create devices on behalf of another operator.
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, new: NewDevice, default_owner: &str) -> Device {
        let device = Device {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            kind: new.kind,
            status: new.status.unwrap_or_else(|| "active".to_string()),
            title: new.title,
            description: new.description,
            video_url: new.video_url,
            owner_id: new.owner_id.unwrap_or_else(|| default_owner.to_string()),
            last_update_ms: now_ms(),
        };
        self.devices
            .write()
            .insert(device.id.clone(), device.clone());
        device
    }

    pub fn find(&self, filter: impl Fn(&Device) -> bool) -> Vec<Device> {
        self.devices
            .read()
            .values()
            .filter(|d| filter(d))
            .cloned()
            .collect()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    /// Apply a mutation to a stored device, bumping its update timestamp.
    /// Returns the updated record, or `None` if the id is unknown.
    pub fn update(&self, id: &str, apply: impl FnOnce(&mut Device)) -> Option<Device> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(id)?;
        apply(device);
        device.last_update_ms = now_ms();
        Some(device.clone())
    }

    pub fn delete(&self, id: &str) -> bool {
        self.devices.write().remove(id).is_some()
    }
}

/// A stored operator account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub permissions: Option<PermissionSet>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("email already registered")]
    DuplicateEmail,
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        email: String,
        password_hash: String,
        role: Role,
    ) -> Result<User, UserStoreError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email == email) {
            return Err(UserStoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            role,
            // new operators start with no grants; an admin assigns them
            permissions: Some(PermissionSet::default()),
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        self.users.read().values().find(|u| u.email == email).cloned()
    }

    pub fn find_by_id(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    pub fn set_permissions(&self, id: &str, permissions: PermissionSet) -> Option<User> {
        let mut users = self.users.write();
        let user = users.get_mut(id)?;
        user.permissions = Some(permissions);
        Some(user.clone())
    }

    pub fn list(&self) -> Vec<User> {
        self.users.read().values().cloned().collect()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.users.write().remove(id).is_some()
    }
}
