//! The authorization gate.
//!
//! Single decision point for "may this identity perform this action on this
//! device", used uniformly by the control-plane handlers and by the event
//! broadcaster's per-viewer targeting so the two cannot drift apart.
//!
//! Rules: administrators are allowed everything. Operators need the device
//! kind present in their granted permission set, and for device-scoped
//! actions they must also own the device. An absent permission set fails
//! closed: `Denied`, never an error the caller could accidentally ignore.

use serde::{Deserialize, Serialize};

use crate::auth::{Identity, Role};
use crate::storage::DeviceKind;

/// Per-kind grants, matching the stored user shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub totems: bool,
    #[serde(default)]
    pub tvs: bool,
}

impl PermissionSet {
    pub fn grants(&self, kind: DeviceKind) -> bool {
        match kind {
            DeviceKind::Totem => self.totems,
            DeviceKind::Tv => self.tvs,
        }
    }
}

/// An action subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Receive status events for, or read, a device of this kind.
    View(DeviceKind),
    /// Create, mutate or delete a device of this kind.
    Manage(DeviceKind),
}

impl Action {
    pub fn kind(self) -> DeviceKind {
        match self {
            Action::View(kind) | Action::Manage(kind) => kind,
        }
    }
}

/// Why an action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    /// The identity carries no well-formed permission set.
    NoPermissionSet,
    /// The permission set does not grant this device kind.
    PermissionMissing,
    /// The device belongs to someone else.
    NotOwner,
}

impl Denied {
    pub fn message(self) -> &'static str {
        match self {
            Denied::NoPermissionSet => "permission set missing or malformed",
            Denied::PermissionMissing => "access denied: insufficient permission",
            Denied::NotOwner => "access denied: not the device owner",
        }
    }
}

/// Decide whether `identity` may perform `action`. `device_owner` is the
/// owning operator's id for device-scoped actions, `None` for actions with
/// no existing device (e.g. creation).
pub fn authorize(
    identity: &Identity,
    action: Action,
    device_owner: Option<&str>,
) -> Result<(), Denied> {
    if identity.role == Role::Admin {
        return Ok(());
    }
    let Some(permissions) = identity.permissions.as_ref() else {
        return Err(Denied::NoPermissionSet);
    };
    if !permissions.grants(action.kind()) {
        return Err(Denied::PermissionMissing);
    }
    if let Some(owner) = device_owner {
        if owner != identity.subject {
            return Err(Denied::NotOwner);
        }
    }
    Ok(())
}
