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

use crate::entity::subtask::SubtaskScalars;
use crate::mapper::{date_to_store, opt_date_from_store, opt_date_to_store};
use crate::prelude::*;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SubtaskRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub task_id: String,
    pub title: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub order_index: i64,
    #[serde(default)]
    pub version: u64,
}

pub fn to_row(subtask: &Subtask) -> Result<SubtaskRow> {
    if subtask.title().trim().is_empty() {
        return Err(SyncError::MissingFields(vec!["title".to_owned()]));
    }
    let task_id = subtask.task_id().persisted_id().ok_or_else(|| {
        SyncError::Validation("owning task has not been persisted yet".to_owned())
    })?;

    Ok(SubtaskRow {
        id: subtask.id().persisted_id().map(str::to_owned),
        task_id: task_id.to_owned(),
        title: subtask.title().clone(),
        completed: *subtask.completed(),
        completed_at: *subtask.completed_at(),
        start_date: opt_date_to_store(*subtask.start_date()),
        end_date: opt_date_to_store(*subtask.end_date()),
        order_index: *subtask.order_index(),
        version: 0,
    })
}

pub fn from_row(row: SubtaskRow) -> Result<Subtask> {
    let id = row
        .id
        .ok_or_else(|| SyncError::Validation("subtask row without id".to_owned()))?;

    Ok(Subtask {
        id: EntityId::persisted(id),
        task_id: EntityId::persisted(row.task_id),
        title: row.title,
        completed: row.completed,
        completed_at: row.completed_at,
        start_date: opt_date_from_store(row.start_date.as_ref())?,
        end_date: opt_date_from_store(row.end_date.as_ref())?,
        order_index: row.order_index,
        assignees: BTreeSet::new(),
        comments: Vec::new(),
    })
}

pub fn scalars_from_row(row: &SubtaskRow) -> Result<SubtaskScalars> {
    Ok(SubtaskScalars {
        title: row.title.clone(),
        completed: row.completed,
        completed_at: row.completed_at,
        start_date: opt_date_from_store(row.start_date.as_ref())?,
        end_date: opt_date_from_store(row.end_date.as_ref())?,
        order_index: row.order_index,
    })
}

/// Store patch for the fields a [`SubtaskPatch`] sets. `completed_at` is
/// derived from the already patched subtask so the pair stays consistent.
pub fn patch_value(patch: &SubtaskPatch, patched: &Subtask) -> Value {
    let mut object = serde_json::Map::new();
    if let Some(title) = &patch.title {
        object.insert("title".to_owned(), json!(title));
    }
    if let Some(completed) = patch.completed {
        object.insert("completed".to_owned(), json!(completed));
        object.insert("completed_at".to_owned(), json!(patched.completed_at()));
    }
    if let Some(start_date) = patch.start_date {
        object.insert("start_date".to_owned(), json!(date_to_store(start_date)));
    }
    if let Some(end_date) = patch.end_date {
        object.insert("end_date".to_owned(), json!(date_to_store(end_date)));
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use crate::entity::subtask::Subtask;
    use crate::mapper::subtask::{from_row, to_row};
    use crate::prelude::*;

    #[test]
    fn test_pending_parent_rejected() {
        let subtask = Subtask::staged(
            EntityId::draft("task"),
            SubtaskDraft {
                title: "Collect figures".to_owned(),
                ..SubtaskDraft::default()
            },
            0,
        );

        assert!(matches!(to_row(&subtask), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_row_round_trip() {
        let subtask = Subtask::staged(
            EntityId::persisted("tasks:3"),
            SubtaskDraft {
                title: "Collect figures".to_owned(),
                ..SubtaskDraft::default()
            },
            2,
        );

        let mut row = to_row(&subtask).unwrap();
        assert_eq!(row.task_id, "tasks:3");
        assert_eq!(row.order_index, 2);

        row.id = Some("subtasks:5".to_owned());
        let mapped = from_row(row).unwrap();
        assert_eq!(mapped.id().persisted_id(), Some("subtasks:5"));
        assert_eq!(mapped.title(), subtask.title());
    }
}
