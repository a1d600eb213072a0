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

//! Merges the store's change feed into local state: inserts only for ids
//! not held yet, updates replace-by-id, deletes remove-by-id. A per-entity
//! high-water version with delete tombstones drops stale and out-of-order
//! deliveries, so a late update can never resurrect a deleted entity.

use crate::board::{dispatch, Action, BoardState};
use crate::mapper;
use crate::prelude::*;
use crate::store::{relation, row_id, row_version};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const TOMBSTONE: u64 = u64::MAX;

pub struct RelayHandle {
    shutdown: kanal::AsyncSender<()>,
    handle: JoinHandle<()>,
}

impl RelayHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.handle.await;
    }
}

/// Subscribes to the watched relations and spawns the relay loop.
pub fn spawn<S>(synchronizer: &Synchronizer<S>) -> RelayHandle
where
    S: RemoteStore,
{
    let state = synchronizer.state_handle();
    let tasks = synchronizer.store().subscribe(relation::TASKS);
    let subtasks = synchronizer.store().subscribe(relation::SUBTASKS);
    let comments = synchronizer.store().subscribe(relation::COMMENTS);
    let (shutdown_sender, shutdown_receiver) = kanal::unbounded_async::<()>();

    let handle = tokio::spawn(async move {
        let mut versions: HashMap<String, u64> = HashMap::new();

        loop {
            tokio::select! {
                event = tasks.recv() => match event {
                    Ok(event) => apply_event(&state, &mut versions, event),
                    Err(_) => break,
                },
                event = subtasks.recv() => match event {
                    Ok(event) => apply_event(&state, &mut versions, event),
                    Err(_) => break,
                },
                event = comments.recv() => match event {
                    Ok(event) => apply_event(&state, &mut versions, event),
                    Err(_) => break,
                },
                _ = shutdown_receiver.recv() => {
                    warn!("Received shutdown signal on kanal receiver");
                    break;
                }
            }
        }
    });

    RelayHandle {
        shutdown: shutdown_sender,
        handle,
    }
}

fn apply_event(
    state: &Arc<Mutex<BoardState>>,
    versions: &mut HashMap<String, u64>,
    event: ChangeEvent,
) {
    let Some(id) = row_id(&event.row).map(str::to_owned) else {
        warn!("dropping {} event without id", event.relation);
        return;
    };
    let version = row_version(&event.row);
    let key = format!("{}/{id}", event.relation);

    if let Some(&seen) = versions.get(&key) {
        if seen == TOMBSTONE {
            debug!("dropping {} event for deleted {id}", event.relation);
            return;
        }
        // deletes always win; inserts and updates must be newer than the
        // high-water mark
        if event.kind != ChangeKind::Delete && version != 0 && version <= seen {
            debug!("dropping stale {} event for {id}", event.relation);
            return;
        }
    }

    match event.kind {
        ChangeKind::Delete => {
            versions.insert(key, TOMBSTONE);
            let entity = EntityId::persisted(id);
            let action = match event.relation {
                relation::TASKS => Action::TaskRemoved { id: entity },
                relation::SUBTASKS => Action::SubtaskRemoved { id: entity },
                relation::COMMENTS => Action::CommentRemoved { id: entity },
                other => {
                    warn!("delete event for unwatched relation {other}");
                    return;
                }
            };
            dispatch(state, action);
        }
        ChangeKind::Insert | ChangeKind::Update => {
            if version != 0 {
                versions.insert(key, version);
            }
            match translate(&event) {
                Ok(action) => dispatch(state, action),
                Err(error) => warn!("dropping malformed {} event: {error}", event.relation),
            }
        }
    }
}

fn translate(event: &ChangeEvent) -> Result<Action> {
    match (event.relation, event.kind) {
        (relation::TASKS, ChangeKind::Insert) => {
            let row: mapper::task::TaskRow = serde_json::from_value(event.row.clone())?;
            Ok(Action::TaskMerged(mapper::task::from_row(row)?))
        }
        (relation::TASKS, ChangeKind::Update) => {
            let row: mapper::task::TaskRow = serde_json::from_value(event.row.clone())?;
            let id = row
                .id
                .clone()
                .ok_or_else(|| SyncError::Validation("task row without id".to_owned()))?;
            Ok(Action::TaskScalarsReplaced {
                id: EntityId::persisted(id),
                scalars: mapper::task::scalars_from_row(&row)?,
            })
        }
        (relation::SUBTASKS, ChangeKind::Insert) => {
            let row: mapper::subtask::SubtaskRow = serde_json::from_value(event.row.clone())?;
            Ok(Action::SubtaskMerged(mapper::subtask::from_row(row)?))
        }
        (relation::SUBTASKS, ChangeKind::Update) => {
            let row: mapper::subtask::SubtaskRow = serde_json::from_value(event.row.clone())?;
            let id = row
                .id
                .clone()
                .ok_or_else(|| SyncError::Validation("subtask row without id".to_owned()))?;
            Ok(Action::SubtaskScalarsReplaced {
                id: EntityId::persisted(id),
                scalars: mapper::subtask::scalars_from_row(&row)?,
            })
        }
        (relation::COMMENTS, ChangeKind::Insert) => {
            let row: mapper::comment::CommentRow = serde_json::from_value(event.row.clone())?;
            Ok(Action::CommentMerged(mapper::comment::from_row(row)?))
        }
        (relation::COMMENTS, ChangeKind::Update) => {
            let row: mapper::comment::CommentRow = serde_json::from_value(event.row.clone())?;
            let id = row
                .id
                .clone()
                .ok_or_else(|| SyncError::Validation("comment row without id".to_owned()))?;
            Ok(Action::CommentScalarsReplaced {
                id: EntityId::persisted(id),
                content: row.content,
                updated_at: row.updated_at,
            })
        }
        (other, _) => Err(SyncError::Validation(format!(
            "event for unwatched relation {other}"
        ))),
    }
}
