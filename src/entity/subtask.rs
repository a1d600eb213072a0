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
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Subtask {
    pub(crate) id: EntityId,
    pub(crate) task_id: EntityId,
    pub(crate) title: String,
    pub(crate) completed: bool,
    /// set iff completed
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) end_date: Option<NaiveDate>,
    pub(crate) order_index: i64,
    pub(crate) assignees: BTreeSet<String>,
    pub(crate) comments: Vec<Comment>,
}

impl Subtask {
    pub(crate) fn staged(task_id: EntityId, draft: SubtaskDraft, order_index: i64) -> Self {
        Self {
            id: EntityId::draft("subtask"),
            task_id,
            title: draft.title,
            completed: false,
            completed_at: None,
            start_date: draft.start_date,
            end_date: draft.end_date,
            order_index,
            assignees: draft.assignees,
            comments: Vec::new(),
        }
    }

    pub fn scalars(&self) -> SubtaskScalars {
        SubtaskScalars {
            title: self.title.clone(),
            completed: self.completed,
            completed_at: self.completed_at,
            start_date: self.start_date,
            end_date: self.end_date,
            order_index: self.order_index,
        }
    }

    pub(crate) fn set_scalars(&mut self, scalars: SubtaskScalars) {
        self.title = scalars.title;
        self.completed = scalars.completed;
        self.completed_at = scalars.completed_at;
        self.start_date = scalars.start_date;
        self.end_date = scalars.end_date;
        self.order_index = scalars.order_index;
    }

    pub(crate) fn apply_patch(&mut self, patch: &SubtaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
            self.completed_at = completed.then(Utc::now);
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = Some(start_date);
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = Some(end_date);
        }
    }
}

/// Input for staging a new subtask under a task. Assignees are whatever the
/// caller picked; the parent's assignees are a UI suggestion and are never
/// copied implicitly.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SubtaskDraft {
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub assignees: BTreeSet<String>,
}

impl SubtaskDraft {
    pub fn missing_fields(&self) -> Vec<String> {
        if self.title.trim().is_empty() {
            return vec!["title".to_owned()];
        }

        Vec::new()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SubtaskPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SubtaskScalars {
    pub title: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub order_index: i64,
}
