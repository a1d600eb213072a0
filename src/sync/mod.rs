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

//! The optimistic synchronizer: every mutation is applied to local state
//! immediately and written to the store asynchronously. Drafts are
//! reconciled in place once the store assigns an id; failed writes revert
//! the local mutation or mark the entity so the caller can retry. Remote
//! failures never escape unlogged and never leave the board in an
//! unexplained state.

use crate::auth::permission::{
    ASSIGNMENT_WRITE, COMMENT_WRITE, SUBTASK_WRITE, TASK_DELETE, TASK_WRITE,
};
use crate::board::{dispatch, Action, BoardState};
use crate::mapper;
use crate::mapper::assignment::AssignmentRow;
use crate::prelude::*;
use crate::store::relation;
use crate::sync::diff::AssignmentDiff;
use crate::sync::queue::WriteQueue;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

pub mod diff;
pub mod queue;
pub mod relay;

/// Children staged while their parent was still a draft, in creation order.
/// They are flushed as a batch once the parent reconciles.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeferredChild {
    Subtask(String),
    Comment(String),
}

pub struct Synchronizer<S> {
    store: Arc<S>,
    state: Arc<Mutex<BoardState>>,
    queue: WriteQueue,
    principal: Principal,
    config: SyncConfig,
    deferred: Mutex<HashMap<String, Vec<DeferredChild>>>,
    /// draft id -> store id, so a second persist of the same draft settles
    /// to the id the first one obtained
    reconciled: Mutex<HashMap<String, String>>,
}

impl<S> Synchronizer<S>
where
    S: RemoteStore,
{
    pub fn new(store: Arc<S>, principal: Principal, config: SyncConfig) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(BoardState::default())),
            queue: WriteQueue::default(),
            principal,
            config,
            deferred: Mutex::new(HashMap::new()),
            reconciled: Mutex::new(HashMap::new()),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Current board state, cloned for the caller. Store rows never reach
    /// this surface; everything here is UI-shaped.
    pub fn snapshot(&self) -> BoardState {
        self.state.lock().unwrap().clone()
    }

    pub fn spawn_relay(&self) -> RelayHandle {
        relay::spawn(self)
    }

    pub(crate) fn state_handle(&self) -> Arc<Mutex<BoardState>> {
        self.state.clone()
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn apply(&self, action: Action) {
        dispatch(&self.state, action);
    }

    /// Stages a new task with a draft id, immediately visible. Fails
    /// synchronously when required fields are missing; nothing is staged
    /// in that case.
    #[instrument(skip_all)]
    pub fn create_task(&self, draft: TaskDraft) -> Result<Task> {
        self.principal.require(&TASK_WRITE)?;
        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(SyncError::MissingFields(missing));
        }

        // assignee references are a soft invariant, logged but accepted
        {
            let state = self.state.lock().unwrap();
            for assignee in &draft.assignees {
                if !state.members().iter().any(|member| member.id() == assignee) {
                    warn!("staging task with unknown assignee {assignee}");
                }
            }
        }

        let task = Task::staged(draft, self.principal.id());
        self.apply(Action::TaskStaged(task.clone()));

        Ok(task)
    }

    /// Writes a staged task to the store and replaces the draft id in
    /// place. A failed write keeps the draft, pending and retryable, on
    /// the board; calling this again is the retry.
    #[instrument(skip_all)]
    pub async fn persist_task(&self, id: &EntityId) -> Result<EntityId> {
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let draft = self.task_snapshot(id)?.id().as_str().to_owned();

        let _guard = self.queue.acquire(&draft).await;
        // a queued earlier write may have settled the draft in the meantime
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let task = self.task_snapshot(id)?;

        let row = mapper::task::to_row(&task)?;
        let stored = match self.store.insert(relation::TASKS, serde_json::to_value(&row)?).await {
            Ok(stored) => stored,
            Err(error) => {
                warn!("task create failed, keeping draft for retry: {error}");
                return Err(SyncError::RemoteWrite {
                    relation: relation::TASKS,
                    source: error,
                });
            }
        };

        let stored: mapper::task::TaskRow = serde_json::from_value(stored)?;
        let real_id = stored
            .id
            .ok_or_else(|| SyncError::Validation("store returned a task row without id".to_owned()))?;
        let real = EntityId::persisted(real_id.clone());
        self.reconciled
            .lock()
            .unwrap()
            .insert(draft.clone(), real_id.clone());
        self.apply(Action::TaskReconciled {
            draft: draft.clone(),
            id: real.clone(),
        });
        info!("task {draft} reconciled to {real_id}");

        // assignment rows for the assignees picked while drafting
        let mut synced = BTreeSet::new();
        for member in task.assignees() {
            match self
                .insert_assignment(relation::TASK_ASSIGNMENTS, &real_id, member)
                .await
            {
                Ok(()) => {
                    synced.insert(member.clone());
                }
                Err(error) => warn!("assignment write for {member} failed: {error}"),
            }
        }
        if synced.len() != task.assignees().len() {
            self.apply(Action::AssigneesReplaced {
                target: EntityRef::Task(real.clone()),
                assignees: synced,
            });
        }

        self.flush_deferred(&draft).await;

        Ok(real)
    }

    /// Convenience: stage and persist in one call.
    pub async fn submit_task(&self, draft: TaskDraft) -> Result<Task> {
        let task = self.create_task(draft)?;
        let id = self.persist_task(task.id()).await?;

        self.task_snapshot(&id)
    }

    #[instrument(skip_all)]
    pub async fn update_task(&self, id: &EntityId, patch: TaskPatch) -> Result<()> {
        self.principal.require(&TASK_WRITE)?;
        let previous = self.task_snapshot(id)?;
        let scalars = previous.scalars();

        self.apply(Action::TaskPatched {
            id: id.clone(),
            patch: patch.clone(),
        });

        // a draft is written in full once it is persisted
        let Some(real) = id.persisted_id() else {
            return Ok(());
        };

        let _guard = self.queue.acquire(real).await;
        if let Err(error) = self
            .store
            .update(
                relation::TASKS,
                real.to_owned(),
                mapper::task::patch_value(&patch),
            )
            .await
        {
            warn!("task update failed, reverting: {error}");
            self.apply(Action::TaskScalarsReplaced {
                id: id.clone(),
                scalars,
            });
            return Err(SyncError::RemoteWrite {
                relation: relation::TASKS,
                source: error,
            });
        }

        Ok(())
    }

    /// Optimistic delete: the task disappears immediately and is restored
    /// at its original position if the store refuses the delete.
    #[instrument(skip_all)]
    pub async fn delete_task(&self, id: &EntityId) -> Result<()> {
        self.principal.require(&TASK_DELETE)?;
        let (index, task) = {
            let state = self.state.lock().unwrap();
            let index = state
                .task_index(id)
                .ok_or_else(|| SyncError::Validation(format!("unknown task {id}")))?;
            (index, state.tasks()[index].clone())
        };

        self.apply(Action::TaskRemoved { id: id.clone() });

        let Some(real) = id.persisted_id() else {
            // the draft never reached the store, drop its deferred children
            let mut deferred = self.deferred.lock().unwrap();
            deferred.remove(id.as_str());
            return Ok(());
        };

        let _guard = self.queue.acquire(real).await;
        if let Err(error) = self.store.delete(relation::TASKS, real.to_owned()).await {
            warn!("task delete failed, restoring: {error}");
            self.apply(Action::TaskRestored { index, task });
            return Err(SyncError::RemoteWrite {
                relation: relation::TASKS,
                source: error,
            });
        }

        Ok(())
    }

    /// Stages a subtask under a task. While the task is itself still a
    /// draft the subtask stays local and is flushed when the task
    /// reconciles.
    #[instrument(skip_all)]
    pub fn create_subtask(&self, task_id: &EntityId, draft: SubtaskDraft) -> Result<Subtask> {
        self.principal.require(&SUBTASK_WRITE)?;
        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(SyncError::MissingFields(missing));
        }

        let (parent_pending, order_index) = {
            let state = self.state.lock().unwrap();
            let task = state
                .task(task_id)
                .ok_or_else(|| SyncError::Validation(format!("unknown task {task_id}")))?;
            (task.id().is_pending(), task.subtasks().len() as i64)
        };

        let subtask = Subtask::staged(task_id.clone(), draft, order_index);
        self.apply(Action::SubtaskStaged(subtask.clone()));

        if parent_pending {
            self.deferred
                .lock()
                .unwrap()
                .entry(task_id.as_str().to_owned())
                .or_default()
                .push(DeferredChild::Subtask(subtask.id().as_str().to_owned()));
        }

        Ok(subtask)
    }

    /// Writes a staged subtask. Deferred silently while the owning task is
    /// still a draft; reverted (removed from the board) when the store
    /// refuses the create.
    #[instrument(skip_all)]
    pub async fn persist_subtask(&self, id: &EntityId) -> Result<EntityId> {
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let snapshot = self.subtask_snapshot(id)?;
        if snapshot.task_id().is_pending() {
            // flushed by persist_task once the parent has its id
            return Ok(snapshot.id().clone());
        }

        let draft = snapshot.id().as_str().to_owned();
        let _guard = self.queue.acquire(&draft).await;
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let subtask = self.subtask_snapshot(id)?;

        let row = mapper::subtask::to_row(&subtask)?;
        let stored = match self
            .store
            .insert(relation::SUBTASKS, serde_json::to_value(&row)?)
            .await
        {
            Ok(stored) => stored,
            Err(error) => {
                warn!("subtask create failed, reverting: {error}");
                self.apply(Action::SubtaskRemoved {
                    id: subtask.id().clone(),
                });
                return Err(SyncError::RemoteWrite {
                    relation: relation::SUBTASKS,
                    source: error,
                });
            }
        };

        let stored: mapper::subtask::SubtaskRow = serde_json::from_value(stored)?;
        let real_id = stored.id.ok_or_else(|| {
            SyncError::Validation("store returned a subtask row without id".to_owned())
        })?;
        let real = EntityId::persisted(real_id.clone());
        self.reconciled
            .lock()
            .unwrap()
            .insert(draft.clone(), real_id.clone());
        self.apply(Action::SubtaskReconciled {
            draft: draft.clone(),
            id: real.clone(),
        });

        let mut synced = BTreeSet::new();
        for member in subtask.assignees() {
            match self
                .insert_assignment(relation::SUBTASK_ASSIGNMENTS, &real_id, member)
                .await
            {
                Ok(()) => {
                    synced.insert(member.clone());
                }
                Err(error) => warn!("assignment write for {member} failed: {error}"),
            }
        }
        if synced.len() != subtask.assignees().len() {
            self.apply(Action::AssigneesReplaced {
                target: EntityRef::Subtask(real.clone()),
                assignees: synced,
            });
        }

        self.flush_deferred(&draft).await;

        Ok(real)
    }

    pub async fn submit_subtask(&self, task_id: &EntityId, draft: SubtaskDraft) -> Result<Subtask> {
        let subtask = self.create_subtask(task_id, draft)?;
        let id = self.persist_subtask(subtask.id()).await?;

        self.subtask_snapshot(&id)
    }

    #[instrument(skip_all)]
    pub async fn update_subtask(&self, id: &EntityId, patch: SubtaskPatch) -> Result<()> {
        self.principal.require(&SUBTASK_WRITE)?;
        let previous = self.subtask_snapshot(id)?;
        let scalars = previous.scalars();

        self.apply(Action::SubtaskPatched {
            id: id.clone(),
            patch: patch.clone(),
        });

        let Some(real) = id.persisted_id() else {
            return Ok(());
        };

        let patched = self.subtask_snapshot(id)?;
        let _guard = self.queue.acquire(real).await;
        if let Err(error) = self
            .store
            .update(
                relation::SUBTASKS,
                real.to_owned(),
                mapper::subtask::patch_value(&patch, &patched),
            )
            .await
        {
            warn!("subtask update failed, reverting: {error}");
            self.apply(Action::SubtaskScalarsReplaced {
                id: id.clone(),
                scalars,
            });
            return Err(SyncError::RemoteWrite {
                relation: relation::SUBTASKS,
                source: error,
            });
        }

        Ok(())
    }

    /// Flips the completion flag; `completed_at` follows it.
    pub async fn toggle_subtask(&self, id: &EntityId) -> Result<()> {
        let completed = *self.subtask_snapshot(id)?.completed();

        self.update_subtask(
            id,
            SubtaskPatch {
                completed: Some(!completed),
                ..SubtaskPatch::default()
            },
        )
        .await
    }

    /// Optimistic delete with restore at the original index on failure.
    #[instrument(skip_all)]
    pub async fn delete_subtask(&self, id: &EntityId) -> Result<()> {
        self.principal.require(&SUBTASK_WRITE)?;
        let (task_id, index, subtask) = {
            let state = self.state.lock().unwrap();
            let (task_id, index) = state
                .subtask_position(id)
                .ok_or_else(|| SyncError::Validation(format!("unknown subtask {id}")))?;
            let subtask = state.subtask(id).cloned().ok_or_else(|| {
                SyncError::Validation(format!("unknown subtask {id}"))
            })?;
            (task_id, index, subtask)
        };

        self.apply(Action::SubtaskRemoved { id: id.clone() });

        let Some(real) = id.persisted_id() else {
            let mut deferred = self.deferred.lock().unwrap();
            deferred.remove(id.as_str());
            if let Some(bucket) = deferred.get_mut(task_id.as_str()) {
                bucket.retain(|child| child != &DeferredChild::Subtask(id.as_str().to_owned()));
            }
            return Ok(());
        };

        let _guard = self.queue.acquire(real).await;
        if let Err(error) = self.store.delete(relation::SUBTASKS, real.to_owned()).await {
            warn!("subtask delete failed, restoring: {error}");
            self.apply(Action::SubtaskRestored {
                task_id,
                index,
                subtask,
            });
            return Err(SyncError::RemoteWrite {
                relation: relation::SUBTASKS,
                source: error,
            });
        }

        Ok(())
    }

    /// Stages a comment under a task or subtask, visible immediately with
    /// `uploading` status.
    #[instrument(skip_all)]
    pub fn add_comment(&self, parent: EntityRef, content: &str) -> Result<Comment> {
        self.principal.require(&COMMENT_WRITE)?;
        if content.trim().is_empty() {
            return Err(SyncError::MissingFields(vec!["content".to_owned()]));
        }

        let parent_pending = {
            let state = self.state.lock().unwrap();
            match &parent {
                EntityRef::Task(id) => state.task(id).map(|task| task.id().is_pending()),
                EntityRef::Subtask(id) => {
                    state.subtask(id).map(|subtask| subtask.id().is_pending())
                }
            }
            .ok_or_else(|| SyncError::Validation(format!("unknown parent {}", parent.id())))?
        };

        let comment = Comment::staged(parent.clone(), self.principal.id(), content);
        self.apply(Action::CommentStaged(comment.clone()));

        if parent_pending {
            self.deferred
                .lock()
                .unwrap()
                .entry(parent.id().as_str().to_owned())
                .or_default()
                .push(DeferredChild::Comment(comment.id().as_str().to_owned()));
        }

        Ok(comment)
    }

    /// Writes a staged comment. A failed write marks it `failed` but keeps
    /// it, content intact, so the author can retry.
    #[instrument(skip_all)]
    pub async fn persist_comment(&self, id: &EntityId) -> Result<EntityId> {
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let snapshot = self.comment_snapshot(id)?;
        if snapshot.parent().id().is_pending() {
            return Ok(snapshot.id().clone());
        }

        let draft = snapshot.id().as_str().to_owned();
        let _guard = self.queue.acquire(&draft).await;
        if let Some(real) = self.settled(id) {
            return Ok(real);
        }
        let comment = self.comment_snapshot(id)?;

        let row = mapper::comment::to_row(&comment)?;
        let stored = match self
            .store
            .insert(relation::COMMENTS, serde_json::to_value(&row)?)
            .await
        {
            Ok(stored) => stored,
            Err(error) => {
                warn!("comment write failed, marked for retry: {error}");
                self.apply(Action::CommentStatusChanged {
                    id: comment.id().clone(),
                    status: UploadStatus::Failed,
                });
                return Err(SyncError::RemoteWrite {
                    relation: relation::COMMENTS,
                    source: error,
                });
            }
        };

        let stored: mapper::comment::CommentRow = serde_json::from_value(stored)?;
        let real_id = stored.id.ok_or_else(|| {
            SyncError::Validation("store returned a comment row without id".to_owned())
        })?;
        let real = EntityId::persisted(real_id.clone());
        self.reconciled.lock().unwrap().insert(draft.clone(), real_id);
        self.apply(Action::CommentReconciled {
            draft,
            id: real.clone(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        });

        Ok(real)
    }

    pub async fn submit_comment(&self, parent: EntityRef, content: &str) -> Result<Comment> {
        let comment = self.add_comment(parent, content)?;
        let id = self.persist_comment(comment.id()).await?;

        self.comment_snapshot(&id)
    }

    /// Re-attempts a failed comment with its original content.
    #[instrument(skip_all)]
    pub async fn retry_comment(&self, id: &EntityId) -> Result<EntityId> {
        self.principal.require(&COMMENT_WRITE)?;
        self.apply(Action::CommentStatusChanged {
            id: id.clone(),
            status: UploadStatus::Uploading,
        });

        self.persist_comment(id).await
    }

    /// Replaces a task's assignee set writing only the delta. The local
    /// swap is a single action, so no intermediate set is ever visible;
    /// equal sets perform zero writes.
    pub async fn set_task_assignees(
        &self,
        task_id: &EntityId,
        desired: BTreeSet<String>,
    ) -> Result<AssignmentDiff> {
        let current = self
            .task_snapshot(task_id)?
            .assignees()
            .clone();

        self.replace_assignees(
            EntityRef::Task(task_id.clone()),
            relation::TASK_ASSIGNMENTS,
            current,
            desired,
        )
        .await
    }

    pub async fn set_subtask_assignees(
        &self,
        subtask_id: &EntityId,
        desired: BTreeSet<String>,
    ) -> Result<AssignmentDiff> {
        let current = self
            .subtask_snapshot(subtask_id)?
            .assignees()
            .clone();

        self.replace_assignees(
            EntityRef::Subtask(subtask_id.clone()),
            relation::SUBTASK_ASSIGNMENTS,
            current,
            desired,
        )
        .await
    }

    #[instrument(skip_all)]
    async fn replace_assignees(
        &self,
        target: EntityRef,
        relation: &'static str,
        current: BTreeSet<String>,
        desired: BTreeSet<String>,
    ) -> Result<AssignmentDiff> {
        self.principal.require(&ASSIGNMENT_WRITE)?;
        let diff = AssignmentDiff::between(&current, &desired);
        if diff.is_empty() {
            return Ok(diff);
        }

        self.apply(Action::AssigneesReplaced {
            target: target.clone(),
            assignees: desired,
        });

        // drafts get their rows written on reconciliation
        let Some(entity_id) = target.id().persisted_id() else {
            return Ok(diff);
        };

        let _guard = self.queue.acquire(entity_id).await;
        if let Err(error) = self.apply_assignment_delta(relation, entity_id, &diff).await {
            warn!("assignment update failed, reverting: {error}");
            self.apply(Action::AssigneesReplaced {
                target,
                assignees: current,
            });
            return Err(error);
        }

        Ok(diff)
    }

    async fn apply_assignment_delta(
        &self,
        relation: &'static str,
        entity_id: &str,
        diff: &AssignmentDiff,
    ) -> Result<()> {
        if !diff.to_remove().is_empty() {
            let rows = self
                .store
                .select(relation)
                .await
                .map_err(|source| SyncError::RemoteRead { relation, source })?;

            for row in rows {
                let assignment: AssignmentRow = serde_json::from_value(row)?;
                if assignment.entity_id != entity_id
                    || !diff.to_remove().contains(&assignment.team_member_id)
                {
                    continue;
                }
                if let Some(row_id) = assignment.id {
                    self.store
                        .delete(relation, row_id)
                        .await
                        .map_err(|source| SyncError::RemoteWrite { relation, source })?;
                }
            }
        }

        for member in diff.to_add() {
            self.insert_assignment(relation, entity_id, member).await?;
        }

        Ok(())
    }

    async fn insert_assignment(
        &self,
        relation: &'static str,
        entity_id: &str,
        member: &str,
    ) -> Result<()> {
        let row = AssignmentRow::new(
            entity_id,
            member,
            self.principal.id(),
            self.config.assignment_role(),
        );
        self.store
            .insert(relation, serde_json::to_value(&row)?)
            .await
            .map_err(|source| SyncError::RemoteWrite { relation, source })?;

        Ok(())
    }

    /// Bulk read of the whole board, guarded by the emergency timeout.
    /// Neither a failure nor the cutoff discards entities that are already
    /// loaded; both only clear the loading flag and note the error.
    #[instrument(skip_all)]
    pub async fn fetch_board(&self) -> Result<()> {
        self.apply(Action::LoadingChanged(true));

        match tokio::time::timeout(self.config.fetch_timeout(), self.load_board()).await {
            Ok(Ok((tasks, members))) => {
                self.apply(Action::BoardLoaded { tasks, members });
                Ok(())
            }
            Ok(Err(error)) => {
                warn!("board fetch failed: {error}");
                self.apply(Action::LoadingChanged(false));
                self.apply(Action::ErrorNoted(Some(error.to_string())));
                Err(error)
            }
            Err(_) => {
                warn!(
                    "board fetch exceeded {}ms, clearing loading state",
                    self.config.fetch_timeout_ms()
                );
                let error = SyncError::RemoteRead {
                    relation: relation::TASKS,
                    source: StoreError("fetch timed out".to_owned()),
                };
                self.apply(Action::LoadingChanged(false));
                self.apply(Action::ErrorNoted(Some(error.to_string())));
                Err(error)
            }
        }
    }

    async fn load_board(&self) -> Result<(Vec<Task>, Vec<TeamMember>)> {
        let select = |relation: &'static str| async move {
            self.store
                .select(relation)
                .await
                .map_err(|source| SyncError::RemoteRead { relation, source })
        };

        let tasks = select(relation::TASKS).await?;
        let subtasks = select(relation::SUBTASKS).await?;
        let comments = select(relation::COMMENTS).await?;
        let task_assignments = select(relation::TASK_ASSIGNMENTS).await?;
        let subtask_assignments = select(relation::SUBTASK_ASSIGNMENTS).await?;
        let members = select(relation::TEAM_MEMBERS).await?;

        mapper::assemble_board(
            tasks,
            subtasks,
            comments,
            task_assignments,
            subtask_assignments,
            members,
        )
    }

    /// Flushes the children staged under a draft, in their original
    /// relative order, now that the parent has a real id. Individual
    /// failures follow the per-entity recovery rules and never abort the
    /// batch. Boxed: flushing a subtask flushes its own comment bucket in
    /// turn.
    fn flush_deferred<'a>(
        &'a self,
        draft: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let children = self
                .deferred
                .lock()
                .unwrap()
                .remove(draft)
                .unwrap_or_default();

            for child in children {
                let result = match &child {
                    DeferredChild::Subtask(subtask_draft) => self
                        .persist_subtask(&EntityId::parse(subtask_draft))
                        .await
                        .map(|_| ()),
                    DeferredChild::Comment(comment_draft) => self
                        .persist_comment(&EntityId::parse(comment_draft))
                        .await
                        .map(|_| ()),
                };

                if let Err(error) = result {
                    warn!("deferred flush of {child:?} failed: {error}");
                }
            }
        })
    }

    /// The store id an entity already settled to: either the id itself or
    /// the id its draft was reconciled to by an earlier persist.
    fn settled(&self, id: &EntityId) -> Option<EntityId> {
        match id {
            EntityId::Persisted { id } => Some(EntityId::persisted(id.clone())),
            EntityId::Pending { draft } => self
                .reconciled
                .lock()
                .unwrap()
                .get(draft)
                .cloned()
                .map(EntityId::persisted),
        }
    }

    fn task_snapshot(&self, id: &EntityId) -> Result<Task> {
        self.state
            .lock()
            .unwrap()
            .task(id)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("unknown task {id}")))
    }

    fn subtask_snapshot(&self, id: &EntityId) -> Result<Subtask> {
        self.state
            .lock()
            .unwrap()
            .subtask(id)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("unknown subtask {id}")))
    }

    fn comment_snapshot(&self, id: &EntityId) -> Result<Comment> {
        self.state
            .lock()
            .unwrap()
            .comment(id)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("unknown comment {id}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::store::memory::OpKind;
    use crate::store::{relation, StoreFuture};
    use crate::tests::TestSuite;
    use serde_json::Value;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn members(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reconciliation_preserves_position() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();

        let mut drafts = Vec::new();
        for title in ["one", "two", "three"] {
            drafts.push(sync.create_task(TestSuite::task_draft(title)).unwrap());
        }
        // staged tasks are prepended, "two" sits in the middle
        let middle = sync.snapshot().tasks()[1].id().clone();

        let real = sync.persist_task(&middle).await.unwrap();

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.tasks().len(), 3);
        assert_eq!(snapshot.tasks()[1].id(), &real);
        assert_eq!(snapshot.tasks()[1].title(), "two");
        assert!(snapshot.tasks()[0].id().is_pending());
        assert!(snapshot.tasks()[2].id().is_pending());
    }

    #[tokio::test]
    async fn test_create_task_requires_fields() {
        let suite = TestSuite::init();

        let result = suite.synchronizer().create_task(TaskDraft::default());

        assert!(matches!(result, Err(SyncError::MissingFields(_))));
        assert!(suite.synchronizer().snapshot().tasks().is_empty());
        assert!(suite.store().operations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_draft_retryable() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        suite.store().fail_next(relation::TASKS, OpKind::Insert, 1);

        let task = sync.create_task(TestSuite::task_draft("one")).unwrap();
        let error = sync.persist_task(task.id()).await.unwrap_err();
        assert!(error.is_retryable());

        // the draft is still on the board, pending
        let snapshot = sync.snapshot();
        assert_eq!(snapshot.tasks().len(), 1);
        assert!(snapshot.tasks()[0].id().is_pending());

        // calling persist again is the retry
        let real = sync.persist_task(task.id()).await.unwrap();
        assert_eq!(sync.snapshot().tasks()[0].id(), &real);
    }

    #[tokio::test]
    async fn test_failed_comment_keeps_content_and_retries() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("one")).await.unwrap();

        suite.store().fail_next(relation::COMMENTS, OpKind::Insert, 1);
        let comment = sync
            .add_comment(EntityRef::Task(task.id().clone()), "do not lose me")
            .unwrap();
        assert!(sync.persist_comment(comment.id()).await.is_err());

        let held = sync.snapshot().comment(comment.id()).cloned().unwrap();
        assert_eq!(*held.upload_status(), UploadStatus::Failed);
        assert_eq!(held.content(), "do not lose me");

        let real = sync.retry_comment(comment.id()).await.unwrap();
        let held = sync.snapshot().comment(&real).cloned().unwrap();
        assert_eq!(*held.upload_status(), UploadStatus::Success);
        assert_eq!(held.content(), "do not lose me");

        let rows = suite.store().rows(relation::COMMENTS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["content"], json!("do not lose me"));
    }

    #[tokio::test]
    async fn test_comment_parent_must_exist() {
        let suite = TestSuite::init();

        let result = suite.synchronizer().add_comment(
            EntityRef::Task(EntityId::persisted("tasks:404")),
            "orphan",
        );

        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deferred_children_flush_after_parent() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();

        let task = sync.create_task(TestSuite::task_draft("parent")).unwrap();
        let first = sync
            .create_subtask(task.id(), TestSuite::subtask_draft("first"))
            .unwrap();
        let second = sync
            .create_subtask(task.id(), TestSuite::subtask_draft("second"))
            .unwrap();
        let note = sync
            .add_comment(EntityRef::Subtask(first.id().clone()), "on a draft")
            .unwrap();

        // persisting children of a draft parent must not hit the store
        assert!(sync.persist_subtask(first.id()).await.unwrap().is_pending());
        assert!(sync.persist_comment(note.id()).await.unwrap().is_pending());
        assert!(suite
            .store()
            .operations()
            .iter()
            .all(|op| op.relation != relation::SUBTASKS && op.relation != relation::COMMENTS));

        let real = sync.persist_task(task.id()).await.unwrap();

        // both subtasks were created against the real parent id, in order
        let rows = suite.store().rows(relation::SUBTASKS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], json!("first"));
        assert_eq!(rows[0]["task_id"], json!(real.as_str()));
        assert_eq!(rows[0]["order_index"], json!(0));
        assert_eq!(rows[1]["title"], json!("second"));
        assert_eq!(rows[1]["task_id"], json!(real.as_str()));
        assert_eq!(rows[1]["order_index"], json!(1));

        // the comment followed its subtask
        let comments = suite.store().rows(relation::COMMENTS);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0]["subtask_id"], suite.store().rows(relation::SUBTASKS)[0]["id"]);

        // and nothing pending is left on the board
        let snapshot = sync.snapshot();
        let held = &snapshot.tasks()[0];
        assert!(!held.id().is_pending());
        assert!(held.subtasks().iter().all(|s| !s.id().is_pending()));
        assert_eq!(held.subtasks()[0].title(), "first");
        assert_eq!(held.subtasks()[1].title(), "second");
        assert_ne!(held.subtasks()[1].id(), second.id());
    }

    #[tokio::test]
    async fn test_subtask_delete_reverts_on_failure() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("parent")).await.unwrap();
        for title in ["first", "second", "third"] {
            sync.submit_subtask(task.id(), TestSuite::subtask_draft(title))
                .await
                .unwrap();
        }
        let victim = sync.snapshot().tasks()[0].subtasks()[1].clone();

        suite.store().fail_next(relation::SUBTASKS, OpKind::Delete, 1);
        assert!(sync.delete_subtask(victim.id()).await.is_err());

        let subtasks = sync.snapshot().tasks()[0].subtasks().clone();
        assert_eq!(subtasks.len(), 3);
        assert_eq!(&subtasks[1], &victim);

        // without the failure the delete sticks
        sync.delete_subtask(victim.id()).await.unwrap();
        assert_eq!(sync.snapshot().tasks()[0].subtasks().len(), 2);
        assert_eq!(suite.store().rows(relation::SUBTASKS).len(), 2);
    }

    #[tokio::test]
    async fn test_task_delete_reverts_on_failure() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        sync.submit_task(TestSuite::task_draft("one")).await.unwrap();
        let victim = sync.submit_task(TestSuite::task_draft("two")).await.unwrap();
        // "two" was staged later and sits on top
        assert_eq!(sync.snapshot().tasks()[0].title(), "two");

        suite.store().fail_next(relation::TASKS, OpKind::Delete, 1);
        assert!(sync.delete_task(victim.id()).await.is_err());

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.tasks().len(), 2);
        assert_eq!(snapshot.tasks()[0].title(), "two");
    }

    #[tokio::test]
    async fn test_assignment_delta_is_minimal() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("one")).await.unwrap();

        sync.set_task_assignees(task.id(), members(&["a", "b", "c"]))
            .await
            .unwrap();
        let before = suite.store().operations().len();

        let diff = sync
            .set_task_assignees(task.id(), members(&["b", "c", "d"]))
            .await
            .unwrap();
        assert_eq!(diff.to_add(), &members(&["d"]));
        assert_eq!(diff.to_remove(), &members(&["a"]));

        let written: Vec<_> = suite.store().operations()[before..]
            .iter()
            .filter(|op| op.relation == relation::TASK_ASSIGNMENTS)
            .map(|op| op.kind)
            .collect();
        assert_eq!(written, vec![OpKind::Select, OpKind::Delete, OpKind::Insert]);

        let rows = suite.store().rows(relation::TASK_ASSIGNMENTS);
        let held: BTreeSet<String> = rows
            .iter()
            .map(|row| row["team_member_id"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(held, members(&["b", "c", "d"]));

        // equal sets perform zero writes
        let count = suite.store().operations().len();
        let diff = sync
            .set_task_assignees(task.id(), members(&["b", "c", "d"]))
            .await
            .unwrap();
        assert!(diff.is_empty());
        assert_eq!(suite.store().operations().len(), count);
    }

    #[tokio::test]
    async fn test_assignment_failure_reverts_the_whole_set() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("one")).await.unwrap();
        sync.set_task_assignees(task.id(), members(&["a"])).await.unwrap();

        suite
            .store()
            .fail_next(relation::TASK_ASSIGNMENTS, OpKind::Insert, 1);
        assert!(sync
            .set_task_assignees(task.id(), members(&["a", "b"]))
            .await
            .is_err());

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.tasks()[0].assignees(), &members(&["a"]));
    }

    #[tokio::test]
    async fn test_update_task_reverts_on_failure() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("original")).await.unwrap();

        suite.store().fail_next(relation::TASKS, OpKind::Update, 1);
        let patch = TaskPatch {
            title: Some("renamed".to_owned()),
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        assert!(sync.update_task(task.id(), patch.clone()).await.is_err());

        let held = sync.snapshot().tasks()[0].clone();
        assert_eq!(held.title(), "original");
        assert_eq!(*held.status(), TaskStatus::Todo);

        sync.update_task(task.id(), patch).await.unwrap();
        assert_eq!(sync.snapshot().tasks()[0].title(), "renamed");
        let row = suite.store().row(relation::TASKS, task.id().persisted_id().unwrap());
        assert_eq!(row.unwrap()["title"], json!("renamed"));
    }

    #[tokio::test]
    async fn test_toggle_subtask_writes_completion_pair() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        let task = sync.submit_task(TestSuite::task_draft("parent")).await.unwrap();
        let subtask = sync
            .submit_subtask(task.id(), TestSuite::subtask_draft("step"))
            .await
            .unwrap();

        sync.toggle_subtask(subtask.id()).await.unwrap();

        let row = suite
            .store()
            .row(relation::SUBTASKS, subtask.id().persisted_id().unwrap())
            .unwrap();
        assert_eq!(row["completed"], json!(true));
        assert!(row["completed_at"].is_string());

        sync.toggle_subtask(subtask.id()).await.unwrap();
        let row = suite
            .store()
            .row(relation::SUBTASKS, subtask.id().persisted_id().unwrap())
            .unwrap();
        assert_eq!(row["completed"], json!(false));
        assert!(row["completed_at"].is_null());
    }

    #[tokio::test]
    async fn test_viewer_cannot_mutate() {
        let suite = TestSuite::with_role(Role::Viewer);

        let result = suite.synchronizer().create_task(TestSuite::task_draft("one"));

        assert!(matches!(result, Err(SyncError::Permission { .. })));
        assert!(suite.synchronizer().snapshot().tasks().is_empty());
        assert!(suite.store().operations().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_board_assembles_relations() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();

        // seed through one client, read through another
        let task = sync.submit_task(TestSuite::task_draft("seeded")).await.unwrap();
        let subtask = sync
            .submit_subtask(task.id(), TestSuite::subtask_draft("step"))
            .await
            .unwrap();
        sync.submit_comment(EntityRef::Subtask(subtask.id().clone()), "note")
            .await
            .unwrap();
        sync.set_task_assignees(task.id(), members(&["tm:5"])).await.unwrap();

        let reader_sync = Synchronizer::new(
            suite.store().clone(),
            Principal::new("tm:9", "reader@canopus.works", Role::Administrator),
            SyncConfig::default(),
        );
        reader_sync.fetch_board().await.unwrap();

        let snapshot = reader_sync.snapshot();
        assert_eq!(snapshot.tasks().len(), 1);
        let loaded = &snapshot.tasks()[0];
        assert_eq!(loaded.title(), "seeded");
        assert_eq!(loaded.assignees(), &members(&["tm:5"]));
        assert_eq!(loaded.subtasks().len(), 1);
        assert_eq!(loaded.subtasks()[0].comments().len(), 1);
        assert_eq!(loaded.subtasks()[0].comments()[0].content(), "note");
        assert!(!snapshot.loading());
    }

    #[tokio::test]
    async fn test_fetch_failure_preserves_loaded_entities() {
        let suite = TestSuite::init();
        let sync = suite.synchronizer();
        sync.submit_task(TestSuite::task_draft("keep me")).await.unwrap();

        suite.store().fail_next(relation::TASKS, OpKind::Select, 1);
        assert!(sync.fetch_board().await.is_err());

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.tasks().len(), 1);
        assert!(!snapshot.loading());
        assert!(snapshot.last_error().is_some());
    }

    /// Store whose reads never resolve, for the emergency cutoff.
    struct StalledStore;

    impl RemoteStore for StalledStore {
        fn select(&self, _: &'static str) -> StoreFuture<'_, Vec<Value>> {
            Box::pin(std::future::pending())
        }

        fn insert(&self, _: &'static str, _: Value) -> StoreFuture<'_, Value> {
            Box::pin(std::future::pending())
        }

        fn update(&self, _: &'static str, _: String, _: Value) -> StoreFuture<'_, Value> {
            Box::pin(std::future::pending())
        }

        fn delete(&self, _: &'static str, _: String) -> StoreFuture<'_, ()> {
            Box::pin(std::future::pending())
        }

        fn subscribe(&self, _: &'static str) -> kanal::AsyncReceiver<ChangeEvent> {
            let (_, receiver) = kanal::unbounded_async();
            receiver
        }
    }

    #[tokio::test]
    async fn test_fetch_cutoff_clears_loading() {
        let mut config = SyncConfig::default();
        config.set_fetch_timeout_ms(25);
        let sync = Synchronizer::new(
            Arc::new(StalledStore),
            Principal::new("tm:1", "admin@canopus.works", Role::Administrator),
            config,
        );
        let draft = sync.create_task(TestSuite::task_draft("still here")).unwrap();

        let error = sync.fetch_board().await.unwrap_err();
        assert!(error.is_retryable());

        let snapshot = sync.snapshot();
        assert!(!snapshot.loading());
        assert!(snapshot.last_error().is_some());
        assert!(snapshot.task(draft.id()).is_some());
    }
}
