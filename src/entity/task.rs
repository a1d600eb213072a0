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

use crate::entity::comment::Comment;
use crate::entity::id::EntityId;
use crate::entity::subtask::Subtask;
use crate::entity::EntityRef;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Deserialize,
    Serialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    EnumString,
    AsRefStr,
    Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Completed,
}

#[derive(
    Deserialize,
    Serialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    EnumString,
    AsRefStr,
    Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Attachment {
    pub description: String,
    pub link: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Task {
    pub(crate) id: EntityId,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) status: TaskStatus,
    pub(crate) priority: TaskPriority,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) due_date: Option<NaiveDate>,
    pub(crate) department: String,
    pub(crate) created_by: String,
    pub(crate) assignees: BTreeSet<String>,
    pub(crate) subtasks: Vec<Subtask>,
    pub(crate) comments: Vec<Comment>,
    pub(crate) attachments: Vec<Attachment>,
}

impl Task {
    /// Stages a new local task with a fresh draft id.
    pub(crate) fn staged(draft: TaskDraft, created_by: &str) -> Self {
        Self {
            id: EntityId::draft("task"),
            title: draft.title,
            description: draft.description,
            status: draft.status,
            priority: draft.priority,
            start_date: draft.start_date,
            due_date: draft.due_date,
            department: draft.department,
            created_by: created_by.to_owned(),
            assignees: draft.assignees,
            subtasks: Vec::new(),
            comments: Vec::new(),
            attachments: draft.attachments,
        }
    }

    pub fn scalars(&self) -> TaskScalars {
        TaskScalars {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            start_date: self.start_date,
            due_date: self.due_date,
            department: self.department.clone(),
            attachments: self.attachments.clone(),
        }
    }

    pub(crate) fn set_scalars(&mut self, scalars: TaskScalars) {
        self.title = scalars.title;
        self.description = scalars.description;
        self.status = scalars.status;
        self.priority = scalars.priority;
        self.start_date = scalars.start_date;
        self.due_date = scalars.due_date;
        self.department = scalars.department;
        self.attachments = scalars.attachments;
    }

    pub(crate) fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = Some(start_date);
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = Some(due_date);
        }
        if let Some(department) = &patch.department {
            self.department = department.clone();
        }
        if let Some(attachments) = &patch.attachments {
            self.attachments = attachments.clone();
        }
    }

    /// Rewrites the task id and every child reference after the store
    /// assigned the authoritative id.
    pub(crate) fn reconcile(&mut self, id: EntityId) {
        self.id = id.clone();

        for subtask in self.subtasks.iter_mut() {
            subtask.task_id = id.clone();
        }
        for comment in self.comments.iter_mut() {
            comment.parent = EntityRef::Task(id.clone());
        }
    }
}

/// Input for staging a new task. Title and department are required before
/// persistence; everything else is optional.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub department: String,
    pub assignees: BTreeSet<String>,
    pub attachments: Vec<Attachment>,
}

impl TaskDraft {
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.title.trim().is_empty() {
            missing.push("title".to_owned());
        }
        if self.department.trim().is_empty() {
            missing.push("department".to_owned());
        }

        missing
    }
}

/// Field-group update applied optimistically and written as a store patch.
/// `None` leaves a field unchanged.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub department: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
}

/// Snapshot of the scalar field group, used to revert a failed optimistic
/// update and to merge remote update events without touching the locally
/// held children collections.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TaskScalars {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub department: String,
    pub attachments: Vec<Attachment>,
}
