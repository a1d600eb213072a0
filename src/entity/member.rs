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

use crate::auth::Role;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
    OnLeave,
    Terminated,
}

/// Read-mostly from this core's perspective; managed through the admin
/// surface, consumed here for assignee pickers and author display.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct TeamMember {
    pub(crate) id: String,
    pub(crate) full_name: String,
    pub(crate) email: String,
    pub(crate) role: Role,
    pub(crate) department: String,
    pub(crate) status: MemberStatus,
}

impl TeamMember {
    pub fn is_active(&self) -> bool {
        matches!(self.status, MemberStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_member_wire_format() {
        let member: TeamMember = serde_json::from_value(json!({
            "id": "tm:1",
            "full_name": "Ada Test",
            "email": "ada@canopus.works",
            "role": "manager",
            "department": "Engineering",
            "status": "on_leave"
        }))
        .unwrap();

        assert_eq!(*member.status(), MemberStatus::OnLeave);
        assert!(!member.is_active());
    }
}
