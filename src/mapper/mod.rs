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

//! Pure translation between UI-shaped entities and store-shaped rows.
//! Store rows never cross into UI-facing code; they are mapped here, both
//! ways, with required-field validation before any network call.

use crate::prelude::*;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::Value;
use std::collections::HashMap;

pub mod assignment;
pub mod comment;
pub mod subtask;
pub mod task;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Calendar date of a zoned moment, taken from the moment's own offset.
///
/// Converting through the UTC instant instead shifts dates near midnight in
/// negative-offset zones; every date that reaches the store goes through
/// this function.
pub fn calendar_date(moment: &DateTime<FixedOffset>) -> NaiveDate {
    moment.date_naive()
}

pub fn date_to_store(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn date_from_store(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|error| SyncError::Validation(format!("invalid date {value:?}: {error}")))
}

pub fn opt_date_to_store(date: Option<NaiveDate>) -> Option<String> {
    date.map(date_to_store)
}

pub fn opt_date_from_store(value: Option<&String>) -> Result<Option<NaiveDate>> {
    value.map(|raw| date_from_store(raw)).transpose()
}

/// Attachment links are persisted with a scheme so they stay clickable.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    if trimmed.contains("://") {
        return trimmed.to_owned();
    }

    format!("https://{trimmed}")
}

/// Assembles the bulk-fetched relations into UI tasks: subtasks ordered by
/// `order_index`, comments by creation time, assignees from the join rows.
pub fn assemble_board(
    task_rows: Vec<Value>,
    subtask_rows: Vec<Value>,
    comment_rows: Vec<Value>,
    task_assignment_rows: Vec<Value>,
    subtask_assignment_rows: Vec<Value>,
    member_rows: Vec<Value>,
) -> Result<(Vec<Task>, Vec<TeamMember>)> {
    let members = member_rows
        .into_iter()
        .map(serde_json::from_value::<TeamMember>)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tasks = Vec::new();
    let mut task_index: HashMap<String, usize> = HashMap::new();
    for row in task_rows {
        let task = task::from_row(serde_json::from_value(row)?)?;
        task_index.insert(task.id().as_str().to_owned(), tasks.len());
        tasks.push(task);
    }

    let mut subtask_owner: HashMap<String, String> = HashMap::new();
    for row in subtask_rows {
        let subtask = subtask::from_row(serde_json::from_value(row)?)?;
        let Some(&index) = task_index.get(subtask.task_id().as_str()) else {
            warn!("dropping subtask {} of unknown task", subtask.id());
            continue;
        };

        subtask_owner.insert(subtask.id().as_str().to_owned(), subtask.task_id().as_str().to_owned());
        tasks[index].subtasks.push(subtask);
    }
    for task in tasks.iter_mut() {
        task.subtasks.sort_by_key(|subtask| *subtask.order_index());
    }

    for row in comment_rows {
        let comment = comment::from_row(serde_json::from_value(row)?)?;
        match comment.parent().clone() {
            EntityRef::Task(task_id) => {
                let Some(&index) = task_index.get(task_id.as_str()) else {
                    warn!("dropping comment {} of unknown task", comment.id());
                    continue;
                };
                tasks[index].comments.push(comment);
            }
            EntityRef::Subtask(subtask_id) => {
                let Some(owner) = subtask_owner.get(subtask_id.as_str()) else {
                    warn!("dropping comment {} of unknown subtask", comment.id());
                    continue;
                };
                let index = task_index[owner.as_str()];
                if let Some(subtask) = tasks[index]
                    .subtasks
                    .iter_mut()
                    .find(|subtask| subtask.id() == &subtask_id)
                {
                    subtask.comments.push(comment);
                }
            }
        }
    }
    for task in tasks.iter_mut() {
        task.comments.sort_by_key(|comment| *comment.created_at());
        for subtask in task.subtasks.iter_mut() {
            subtask.comments.sort_by_key(|comment| *comment.created_at());
        }
    }

    for row in task_assignment_rows {
        let assignment: assignment::AssignmentRow = serde_json::from_value(row)?;
        // assignee references to unknown members are logged, not rejected
        if !members.iter().any(|member| member.id() == &assignment.team_member_id) {
            warn!(
                "assignment references unknown team member {}",
                assignment.team_member_id
            );
        }
        if let Some(&index) = task_index.get(assignment.entity_id.as_str()) {
            tasks[index].assignees.insert(assignment.team_member_id);
        }
    }
    for row in subtask_assignment_rows {
        let assignment: assignment::AssignmentRow = serde_json::from_value(row)?;
        let Some(owner) = subtask_owner.get(assignment.entity_id.as_str()) else {
            continue;
        };
        let index = task_index[owner.as_str()];
        if let Some(subtask) = tasks[index]
            .subtasks
            .iter_mut()
            .find(|subtask| subtask.id().as_str() == assignment.entity_id)
        {
            subtask.assignees.insert(assignment.team_member_id);
        }
    }

    Ok((tasks, members))
}
