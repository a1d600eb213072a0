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

use crate::entity::task::TaskScalars;
use crate::mapper::{date_to_store, normalize_link, opt_date_from_store, opt_date_to_store};
use crate::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TaskRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub department: String,
    pub created_by: String,
    #[serde(default)]
    pub document_links: Vec<String>,
    #[serde(default)]
    pub version: u64,
}

pub fn to_row(task: &Task) -> Result<TaskRow> {
    let mut missing = Vec::new();
    if task.title().trim().is_empty() {
        missing.push("title".to_owned());
    }
    if task.department().trim().is_empty() {
        missing.push("department".to_owned());
    }
    if !missing.is_empty() {
        return Err(SyncError::MissingFields(missing));
    }

    Ok(TaskRow {
        id: task.id().persisted_id().map(str::to_owned),
        title: task.title().clone(),
        description: task.description().clone(),
        status: *task.status(),
        priority: *task.priority(),
        start_date: opt_date_to_store(*task.start_date()),
        due_date: opt_date_to_store(*task.due_date()),
        department: task.department().clone(),
        created_by: task.created_by().clone(),
        document_links: task
            .attachments()
            .iter()
            .map(|attachment| normalize_link(&attachment.link))
            .collect(),
        version: 0,
    })
}

pub fn from_row(row: TaskRow) -> Result<Task> {
    let id = row
        .id
        .ok_or_else(|| SyncError::Validation("task row without id".to_owned()))?;

    Ok(Task {
        id: EntityId::persisted(id),
        title: row.title,
        description: row.description,
        status: row.status,
        priority: row.priority,
        start_date: opt_date_from_store(row.start_date.as_ref())?,
        due_date: opt_date_from_store(row.due_date.as_ref())?,
        department: row.department,
        created_by: row.created_by,
        assignees: BTreeSet::new(),
        subtasks: Vec::new(),
        comments: Vec::new(),
        attachments: row
            .document_links
            .into_iter()
            .map(|link| Attachment {
                description: String::new(),
                link,
            })
            .collect(),
    })
}

/// Scalar field group of a row, for merging remote updates into a locally
/// held task without touching its children.
pub fn scalars_from_row(row: &TaskRow) -> Result<TaskScalars> {
    Ok(TaskScalars {
        title: row.title.clone(),
        description: row.description.clone(),
        status: row.status,
        priority: row.priority,
        start_date: opt_date_from_store(row.start_date.as_ref())?,
        due_date: opt_date_from_store(row.due_date.as_ref())?,
        department: row.department.clone(),
        attachments: row
            .document_links
            .iter()
            .map(|link| Attachment {
                description: String::new(),
                link: link.clone(),
            })
            .collect(),
    })
}

/// Store patch for the fields a [`TaskPatch`] sets; unset fields are left
/// out entirely so the store merge cannot clobber them.
pub fn patch_value(patch: &TaskPatch) -> Value {
    let mut object = serde_json::Map::new();
    if let Some(title) = &patch.title {
        object.insert("title".to_owned(), json!(title));
    }
    if let Some(description) = &patch.description {
        object.insert("description".to_owned(), json!(description));
    }
    if let Some(status) = patch.status {
        object.insert("status".to_owned(), json!(status));
    }
    if let Some(priority) = patch.priority {
        object.insert("priority".to_owned(), json!(priority));
    }
    if let Some(start_date) = patch.start_date {
        object.insert("start_date".to_owned(), json!(date_to_store(start_date)));
    }
    if let Some(due_date) = patch.due_date {
        object.insert("due_date".to_owned(), json!(date_to_store(due_date)));
    }
    if let Some(department) = &patch.department {
        object.insert("department".to_owned(), json!(department));
    }
    if let Some(attachments) = &patch.attachments {
        object.insert(
            "document_links".to_owned(),
            json!(attachments
                .iter()
                .map(|attachment| normalize_link(&attachment.link))
                .collect::<Vec<_>>()),
        );
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use crate::entity::task::Task;
    use crate::mapper::task::{from_row, patch_value, to_row};
    use crate::prelude::*;
    use chrono::NaiveDate;

    fn draft() -> TaskDraft {
        TaskDraft {
            title: "Quarterly report".to_owned(),
            department: "Finance".to_owned(),
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            attachments: vec![Attachment {
                description: "figures".to_owned(),
                link: "sheets.canopus.works/q1".to_owned(),
            }],
            ..TaskDraft::default()
        }
    }

    #[test]
    fn test_to_row_requires_fields() {
        let blank = Task::staged(
            TaskDraft {
                department: "Finance".to_owned(),
                ..TaskDraft::default()
            },
            "tm:1",
        );

        match to_row(&blank) {
            Err(SyncError::MissingFields(fields)) => assert_eq!(fields, vec!["title"]),
            other => panic!("expected missing fields, got {other:?}"),
        }
    }

    #[test]
    fn test_row_round_trip() {
        let task = Task::staged(draft(), "tm:1");
        let row = to_row(&task).unwrap();

        assert!(row.id.is_none());
        assert_eq!(row.start_date.as_deref(), Some("2024-03-01"));
        assert_eq!(row.document_links, vec!["https://sheets.canopus.works/q1"]);

        let mut persisted = row.clone();
        persisted.id = Some("tasks:9".to_owned());
        let mapped = from_row(persisted).unwrap();

        assert_eq!(mapped.id().persisted_id(), Some("tasks:9"));
        assert_eq!(mapped.title(), task.title());
        assert_eq!(mapped.start_date(), task.start_date());
        // descriptions are a client-side nicety, links are what persists
        assert_eq!(mapped.attachments()[0].link, "https://sheets.canopus.works/q1");
    }

    #[test]
    fn test_patch_value_omits_unset_fields() {
        let value = patch_value(&TaskPatch {
            status: Some(TaskStatus::Completed),
            due_date: NaiveDate::from_ymd_opt(2024, 4, 1),
            ..TaskPatch::default()
        });

        assert_eq!(
            value,
            json!({ "status": "completed", "due_date": "2024-04-01" })
        );
    }
}
