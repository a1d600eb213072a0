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
use chrono::{DateTime, Utc};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CommentRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

pub fn to_row(comment: &Comment) -> Result<CommentRow> {
    if comment.content().trim().is_empty() {
        return Err(SyncError::MissingFields(vec!["content".to_owned()]));
    }
    let parent_id = comment.parent().id().persisted_id().ok_or_else(|| {
        SyncError::Validation("owning entity has not been persisted yet".to_owned())
    })?;

    let (task_id, subtask_id) = match comment.parent() {
        EntityRef::Task(_) => (Some(parent_id.to_owned()), None),
        EntityRef::Subtask(_) => (None, Some(parent_id.to_owned())),
    };

    Ok(CommentRow {
        id: comment.id().persisted_id().map(str::to_owned),
        task_id,
        subtask_id,
        author_id: comment.author_id().clone(),
        content: comment.content().clone(),
        created_at: *comment.created_at(),
        updated_at: *comment.updated_at(),
        version: 0,
    })
}

/// A comment belongs to a task or a subtask, never both and never neither.
pub fn parent_of(row: &CommentRow) -> Result<EntityRef> {
    match (&row.task_id, &row.subtask_id) {
        (Some(task_id), None) => Ok(EntityRef::Task(EntityId::persisted(task_id.clone()))),
        (None, Some(subtask_id)) => {
            Ok(EntityRef::Subtask(EntityId::persisted(subtask_id.clone())))
        }
        (Some(_), Some(_)) => Err(SyncError::Validation(
            "comment references both a task and a subtask".to_owned(),
        )),
        (None, None) => Err(SyncError::Validation(
            "comment references neither a task nor a subtask".to_owned(),
        )),
    }
}

pub fn from_row(row: CommentRow) -> Result<Comment> {
    let parent = parent_of(&row)?;
    let id = row
        .id
        .ok_or_else(|| SyncError::Validation("comment row without id".to_owned()))?;

    Ok(Comment {
        id: EntityId::persisted(id),
        parent,
        author_id: row.author_id,
        content: row.content,
        created_at: row.created_at,
        updated_at: row.updated_at,
        upload_status: UploadStatus::Success,
    })
}

#[cfg(test)]
mod tests {
    use crate::entity::comment::Comment;
    use crate::mapper::comment::{from_row, parent_of, to_row, CommentRow};
    use crate::prelude::*;
    use chrono::Utc;

    fn row(task_id: Option<&str>, subtask_id: Option<&str>) -> CommentRow {
        CommentRow {
            id: Some("comments:1".to_owned()),
            task_id: task_id.map(str::to_owned),
            subtask_id: subtask_id.map(str::to_owned),
            author_id: "tm:1".to_owned(),
            content: "looks good".to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn test_parent_exclusivity() {
        assert!(parent_of(&row(Some("tasks:1"), None)).is_ok());
        assert!(parent_of(&row(None, Some("subtasks:1"))).is_ok());
        assert!(matches!(
            parent_of(&row(Some("tasks:1"), Some("subtasks:1"))),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            parent_of(&row(None, None)),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_to_row_sets_one_parent_column() {
        let comment = Comment::staged(
            EntityRef::Subtask(EntityId::persisted("subtasks:4")),
            "tm:1",
            "looks good",
        );

        let row = to_row(&comment).unwrap();
        assert_eq!(row.task_id, None);
        assert_eq!(row.subtask_id.as_deref(), Some("subtasks:4"));
    }

    #[test]
    fn test_empty_content_rejected() {
        let comment = Comment::staged(
            EntityRef::Task(EntityId::persisted("tasks:1")),
            "tm:1",
            "   ",
        );

        assert!(matches!(
            to_row(&comment),
            Err(SyncError::MissingFields(_))
        ));
    }

    #[test]
    fn test_from_row_marks_synced() {
        let comment = from_row(row(Some("tasks:1"), None)).unwrap();
        assert_eq!(*comment.upload_status(), UploadStatus::Success);
    }
}
