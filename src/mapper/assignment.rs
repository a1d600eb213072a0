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

use chrono::{DateTime, Utc};

/// Join row linking a task or subtask to a team member. The same shape
/// serves both assignment relations; the relation name decides which
/// entity `entity_id` points at.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct AssignmentRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub entity_id: String,
    pub team_member_id: String,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl AssignmentRow {
    pub fn new(
        entity_id: &str,
        team_member_id: &str,
        assigned_by: &str,
        role: &str,
    ) -> Self {
        Self {
            id: None,
            entity_id: entity_id.to_owned(),
            team_member_id: team_member_id.to_owned(),
            assigned_at: Utc::now(),
            assigned_by: assigned_by.to_owned(),
            role: Some(role.to_owned()),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::mapper::assignment::AssignmentRow;

    #[test]
    fn test_new_row() {
        let row = AssignmentRow::new("tasks:1", "tm:2", "tm:1", "assignee");

        assert!(row.id.is_none());
        assert_eq!(row.entity_id, "tasks:1");
        assert_eq!(row.team_member_id, "tm:2");
        assert_eq!(row.assigned_by, "tm:1");
        assert_eq!(row.role.as_deref(), Some("assignee"));
    }
}
