/*
 *     Copyright (C) 2023  Fritz Ochsmann
 *
 *     This program is free software: you can redistribute it and/or modify
 *     it under the terms of the GNU Affero General Public License as published
 *     by the Free Software Foundation, either version 3 of the License, or
 *     (at your option) any later version.
 *
 *     This program is distributed in the hope that it will be useful,
 *     but WITHOUT ANY WARRANTY; without even the implied warranty of
 *     MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *     GNU Affero General Public License for more details.
 *
 *     You should have received a copy of the GNU Affero General Public License
 *     along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use crate::prelude::*;
use strum::{AsRefStr, Display, EnumString};

pub mod permission;

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Administrator,
    Manager,
    Viewer,
}

/// The acting principal, supplied by the external authentication provider.
///
/// The core treats this as a read-only context value injected into every
/// mutation (`assigned_by`, `author_id`, `created_by`).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Principal {
    id: String,
    email: String,
    role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
        }
    }

    /// Client-side guard only. The authoritative check is performed by the
    /// remote store.
    pub fn require(&self, permission: &permission::Permission) -> Result<()> {
        if permission.grants(&self.role) {
            return Ok(());
        }

        Err(SyncError::Permission {
            role: self.role.to_string(),
            action: permission.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::permission::{MEMBER_MANAGE, TASK_WRITE};
    use crate::prelude::*;

    #[test]
    fn test_require() {
        let manager = Principal::new("tm:1", "manager@canopus.works", Role::Manager);
        let viewer = Principal::new("tm:2", "viewer@canopus.works", Role::Viewer);

        assert!(manager.require(&TASK_WRITE).is_ok());
        assert!(manager.require(&MEMBER_MANAGE).is_err());
        assert!(viewer.require(&TASK_WRITE).is_err());
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(
            serde_json::to_value(Role::Administrator).unwrap(),
            json!("administrator")
        );
        assert_eq!(Role::Manager.as_ref(), "manager");
    }
}
