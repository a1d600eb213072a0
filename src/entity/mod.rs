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

use crate::entity::id::EntityId;

pub mod comment;
pub mod id;
pub mod member;
pub mod subtask;
pub mod task;

/// Reference to the entity a comment or an assignment set belongs to.
///
/// A comment belongs to a task or a subtask, never both and never neither;
/// this enum makes the exclusivity structural on the UI side while the
/// mapper enforces it on the row side.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Task(EntityId),
    Subtask(EntityId),
}

impl EntityRef {
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Task(id) => id,
            Self::Subtask(id) => id,
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }
}
