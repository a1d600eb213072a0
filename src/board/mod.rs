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

//! The board's in-memory state and its reducer. Every local mutation, the
//! optimistic ones included, is an [`Action`] applied through [`reduce`];
//! the next state is always derived from the latest one, never from a stale
//! snapshot.

use crate::entity::subtask::SubtaskScalars;
use crate::entity::task::TaskScalars;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, Getters)]
#[get = "pub"]
pub struct BoardState {
    /// newest first; staged tasks are prepended
    tasks: Vec<Task>,
    members: Vec<TeamMember>,
    loading: bool,
    last_error: Option<String>,
}

impl BoardState {
    pub fn task(&self, id: &EntityId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id() == id)
    }

    pub fn task_index(&self, id: &EntityId) -> Option<usize> {
        self.tasks.iter().position(|task| task.id() == id)
    }

    pub fn subtask(&self, id: &EntityId) -> Option<&Subtask> {
        self.tasks
            .iter()
            .flat_map(|task| task.subtasks().iter())
            .find(|subtask| subtask.id() == id)
    }

    /// Index of the subtask within its owning task's list.
    pub fn subtask_position(&self, id: &EntityId) -> Option<(EntityId, usize)> {
        self.tasks.iter().find_map(|task| {
            task.subtasks()
                .iter()
                .position(|subtask| subtask.id() == id)
                .map(|index| (task.id().clone(), index))
        })
    }

    pub fn comment(&self, id: &EntityId) -> Option<&Comment> {
        self.tasks.iter().find_map(|task| {
            task.comments()
                .iter()
                .find(|comment| comment.id() == id)
                .or_else(|| {
                    task.subtasks()
                        .iter()
                        .flat_map(|subtask| subtask.comments().iter())
                        .find(|comment| comment.id() == id)
                })
        })
    }

    fn task_mut(&mut self, id: &EntityId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id() == id)
    }

    fn subtask_mut(&mut self, id: &EntityId) -> Option<&mut Subtask> {
        self.tasks
            .iter_mut()
            .flat_map(|task| task.subtasks.iter_mut())
            .find(|subtask| subtask.id() == id)
    }

    fn comment_mut(&mut self, id: &EntityId) -> Option<&mut Comment> {
        self.tasks.iter_mut().find_map(|task| {
            if let Some(index) = task.comments.iter().position(|comment| comment.id() == id) {
                return task.comments.get_mut(index);
            }

            task.subtasks
                .iter_mut()
                .flat_map(|subtask| subtask.comments.iter_mut())
                .find(|comment| comment.id() == id)
        })
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    TaskStaged(Task),
    TaskReconciled { draft: String, id: EntityId },
    TaskPatched { id: EntityId, patch: TaskPatch },
    TaskScalarsReplaced { id: EntityId, scalars: TaskScalars },
    TaskRemoved { id: EntityId },
    TaskRestored { index: usize, task: Task },
    TaskMerged(Task),
    SubtaskStaged(Subtask),
    SubtaskReconciled { draft: String, id: EntityId },
    SubtaskPatched { id: EntityId, patch: SubtaskPatch },
    SubtaskScalarsReplaced { id: EntityId, scalars: SubtaskScalars },
    SubtaskRemoved { id: EntityId },
    SubtaskRestored { task_id: EntityId, index: usize, subtask: Subtask },
    SubtaskMerged(Subtask),
    CommentStaged(Comment),
    CommentReconciled {
        draft: String,
        id: EntityId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
    CommentStatusChanged { id: EntityId, status: UploadStatus },
    CommentScalarsReplaced {
        id: EntityId,
        content: String,
        updated_at: DateTime<Utc>,
    },
    CommentRemoved { id: EntityId },
    CommentMerged(Comment),
    AssigneesReplaced {
        target: EntityRef,
        assignees: BTreeSet<String>,
    },
    BoardLoaded {
        tasks: Vec<Task>,
        members: Vec<TeamMember>,
    },
    LoadingChanged(bool),
    ErrorNoted(Option<String>),
}

/// Applies one action and returns the next state.
pub fn reduce(mut state: BoardState, action: Action) -> BoardState {
    match action {
        Action::TaskStaged(task) => {
            state.tasks.insert(0, task);
        }
        Action::TaskReconciled { draft, id } => {
            // the feed echo of this very insert may have been merged before
            // the reconciliation landed; the draft's position wins
            state.tasks.retain(|task| task.id() != &id);
            if let Some(task) = state
                .tasks
                .iter_mut()
                .find(|task| task.id().is_pending() && task.id().as_str() == draft)
            {
                task.reconcile(id);
            }
        }
        Action::TaskPatched { id, patch } => {
            if let Some(task) = state.task_mut(&id) {
                task.apply_patch(&patch);
            }
        }
        Action::TaskScalarsReplaced { id, scalars } => {
            if let Some(task) = state.task_mut(&id) {
                task.set_scalars(scalars);
            }
        }
        Action::TaskRemoved { id } => {
            state.tasks.retain(|task| task.id() != &id);
        }
        Action::TaskRestored { index, task } => {
            let index = index.min(state.tasks.len());
            state.tasks.insert(index, task);
        }
        Action::TaskMerged(task) => {
            // the feed echoes our own confirmed writes; merging an id we
            // already hold must be a no-op
            if state.task(task.id()).is_none() {
                state.tasks.insert(0, task);
            }
        }
        Action::SubtaskStaged(subtask) => {
            let task_id = subtask.task_id().clone();
            if let Some(task) = state.task_mut(&task_id) {
                task.subtasks.push(subtask);
            }
        }
        Action::SubtaskReconciled { draft, id } => {
            for task in state.tasks.iter_mut() {
                task.subtasks.retain(|subtask| subtask.id() != &id);
            }
            if let Some(subtask) = state
                .tasks
                .iter_mut()
                .flat_map(|task| task.subtasks.iter_mut())
                .find(|subtask| subtask.id().is_pending() && subtask.id().as_str() == draft)
            {
                subtask.id = id.clone();
                for comment in subtask.comments.iter_mut() {
                    comment.parent = EntityRef::Subtask(id.clone());
                }
            }
        }
        Action::SubtaskPatched { id, patch } => {
            if let Some(subtask) = state.subtask_mut(&id) {
                subtask.apply_patch(&patch);
            }
        }
        Action::SubtaskScalarsReplaced { id, scalars } => {
            if let Some(subtask) = state.subtask_mut(&id) {
                subtask.set_scalars(scalars);
            }
        }
        Action::SubtaskRemoved { id } => {
            for task in state.tasks.iter_mut() {
                task.subtasks.retain(|subtask| subtask.id() != &id);
            }
        }
        Action::SubtaskRestored {
            task_id,
            index,
            subtask,
        } => {
            if let Some(task) = state.task_mut(&task_id) {
                let index = index.min(task.subtasks.len());
                task.subtasks.insert(index, subtask);
            }
        }
        Action::SubtaskMerged(subtask) => {
            if state.subtask(subtask.id()).is_some() {
                return state;
            }
            let task_id = subtask.task_id().clone();
            if let Some(task) = state.task_mut(&task_id) {
                task.subtasks.push(subtask);
                task.subtasks.sort_by_key(|subtask| *subtask.order_index());
            }
        }
        Action::CommentStaged(comment) => {
            attach_comment(&mut state, comment, false);
        }
        Action::CommentReconciled {
            draft,
            id,
            created_at,
            updated_at,
        } => {
            for task in state.tasks.iter_mut() {
                task.comments.retain(|comment| comment.id() != &id);
                for subtask in task.subtasks.iter_mut() {
                    subtask.comments.retain(|comment| comment.id() != &id);
                }
            }
            if let Some(comment) = state
                .tasks
                .iter_mut()
                .flat_map(|task| {
                    task.comments
                        .iter_mut()
                        .chain(task.subtasks.iter_mut().flat_map(|s| s.comments.iter_mut()))
                })
                .find(|comment| comment.id().is_pending() && comment.id().as_str() == draft)
            {
                comment.id = id;
                comment.created_at = created_at;
                comment.updated_at = updated_at;
                comment.upload_status = UploadStatus::Success;
            }
        }
        Action::CommentStatusChanged { id, status } => {
            if let Some(comment) = state.comment_mut(&id) {
                comment.upload_status = status;
            }
        }
        Action::CommentScalarsReplaced {
            id,
            content,
            updated_at,
        } => {
            if let Some(comment) = state.comment_mut(&id) {
                comment.content = content;
                comment.updated_at = updated_at;
            }
        }
        Action::CommentRemoved { id } => {
            for task in state.tasks.iter_mut() {
                task.comments.retain(|comment| comment.id() != &id);
                for subtask in task.subtasks.iter_mut() {
                    subtask.comments.retain(|comment| comment.id() != &id);
                }
            }
        }
        Action::CommentMerged(comment) => {
            if state.comment(comment.id()).is_none() {
                attach_comment(&mut state, comment, true);
            }
        }
        Action::AssigneesReplaced { target, assignees } => match &target {
            EntityRef::Task(id) => {
                if let Some(task) = state.task_mut(id) {
                    task.assignees = assignees;
                }
            }
            EntityRef::Subtask(id) => {
                if let Some(subtask) = state.subtask_mut(id) {
                    subtask.assignees = assignees;
                }
            }
        },
        Action::BoardLoaded { tasks, members } => {
            // a load never discards drafts that are still awaiting their id
            let mut drafts: Vec<Task> = state
                .tasks
                .into_iter()
                .filter(|task| task.id().is_pending())
                .collect();
            drafts.extend(tasks);

            state.tasks = drafts;
            state.members = members;
            state.loading = false;
            state.last_error = None;
        }
        Action::LoadingChanged(loading) => {
            state.loading = loading;
        }
        Action::ErrorNoted(error) => {
            state.last_error = error;
        }
    }

    state
}

fn attach_comment(state: &mut BoardState, comment: Comment, sort: bool) {
    match comment.parent().clone() {
        EntityRef::Task(task_id) => {
            if let Some(task) = state.task_mut(&task_id) {
                task.comments.push(comment);
                if sort {
                    task.comments.sort_by_key(|comment| *comment.created_at());
                }
            }
        }
        EntityRef::Subtask(subtask_id) => {
            if let Some(subtask) = state.subtask_mut(&subtask_id) {
                subtask.comments.push(comment);
                if sort {
                    subtask.comments.sort_by_key(|comment| *comment.created_at());
                }
            }
        }
    }
}

/// Applies an action to the shared state, deriving the next state from the
/// latest one under the lock.
pub(crate) fn dispatch(state: &Arc<Mutex<BoardState>>, action: Action) {
    let mut guard = state.lock().unwrap();
    let previous = std::mem::take(&mut *guard);
    *guard = reduce(previous, action);
}

#[cfg(test)]
mod tests {
    use crate::board::{reduce, Action, BoardState};
    use crate::entity::task::Task;
    use crate::prelude::*;

    fn staged_task(title: &str) -> Task {
        Task::staged(
            TaskDraft {
                title: title.to_owned(),
                department: "Engineering".to_owned(),
                ..TaskDraft::default()
            },
            "tm:1",
        )
    }

    #[test]
    fn test_reconcile_preserves_position() {
        let mut state = BoardState::default();
        for title in ["one", "two", "three"] {
            state = reduce(state, Action::TaskStaged(staged_task(title)));
        }
        let draft = state.tasks()[1].id().as_str().to_owned();

        let state = reduce(
            state,
            Action::TaskReconciled {
                draft: draft.clone(),
                id: EntityId::persisted("tasks:7"),
            },
        );

        assert_eq!(state.tasks().len(), 3);
        assert_eq!(state.tasks()[1].id().persisted_id(), Some("tasks:7"));
        assert_eq!(state.tasks()[1].title(), "two");
    }

    #[test]
    fn test_merge_existing_id_is_noop() {
        let mut state = BoardState::default();
        state = reduce(state, Action::TaskStaged(staged_task("one")));
        let draft = state.tasks()[0].id().as_str().to_owned();
        state = reduce(
            state,
            Action::TaskReconciled {
                draft,
                id: EntityId::persisted("tasks:1"),
            },
        );
        let before = state.tasks().clone();

        let mut echo = staged_task("one");
        echo.reconcile(EntityId::persisted("tasks:1"));
        let state = reduce(state, Action::TaskMerged(echo));

        assert_eq!(state.tasks(), &before);
    }

    #[test]
    fn test_restore_at_original_index() {
        let mut state = BoardState::default();
        for title in ["one", "two", "three"] {
            state = reduce(state, Action::TaskStaged(staged_task(title)));
        }
        let removed = state.tasks()[1].clone();
        let id = removed.id().clone();

        let state = reduce(state, Action::TaskRemoved { id });
        assert_eq!(state.tasks().len(), 2);

        let state = reduce(
            state,
            Action::TaskRestored {
                index: 1,
                task: removed.clone(),
            },
        );
        assert_eq!(state.tasks().len(), 3);
        assert_eq!(state.tasks()[1], removed);
    }

    #[test]
    fn test_load_keeps_pending_drafts() {
        let mut state = BoardState::default();
        state = reduce(state, Action::TaskStaged(staged_task("draft")));
        state = reduce(state, Action::LoadingChanged(true));

        let mut loaded = staged_task("loaded");
        loaded.reconcile(EntityId::persisted("tasks:1"));
        let state = reduce(
            state,
            Action::BoardLoaded {
                tasks: vec![loaded],
                members: Vec::new(),
            },
        );

        assert_eq!(state.tasks().len(), 2);
        assert!(state.tasks()[0].id().is_pending());
        assert!(!state.loading());
    }
}
