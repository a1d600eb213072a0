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

use crate::store::{
    row_id, row_version, ChangeEvent, ChangeKind, RemoteStore, StoreError, StoreFuture,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use strum::AsRefStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum OpKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// One attempted store operation, recorded in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub relation: &'static str,
    pub kind: OpKind,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<&'static str, Vec<Value>>,
    subscribers: HashMap<&'static str, Vec<kanal::AsyncSender<ChangeEvent>>>,
    sequence: u64,
    log: Vec<Operation>,
    failures: HashMap<(&'static str, OpKind), usize>,
}

/// In-process implementation of the store contract. Assigns `<relation>:<n>`
/// ids, keeps a per-row monotonic `version` column, broadcasts every write
/// to the relation's change-feed subscribers and records an operation log.
///
/// The test-suite drives it directly, including per-relation failure
/// injection and synthetic feed events.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` operations of the given kind against the
    /// relation fail with an injected error.
    pub fn fail_next(&self, relation: &'static str, kind: OpKind, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        *inner.failures.entry((relation, kind)).or_insert(0) += count;
    }

    /// Every operation attempted so far, failed ones included.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn rows(&self, relation: &'static str) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .get(relation)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, relation: &'static str, id: &str) -> Option<Value> {
        self.rows(relation)
            .into_iter()
            .find(|row| row_id(row) == Some(id))
    }

    /// Pushes a synthetic event to the relation's subscribers without
    /// touching the stored rows.
    pub async fn publish(&self, event: ChangeEvent) {
        let senders = self.senders(event.relation);
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    fn senders(&self, relation: &'static str) -> Vec<kanal::AsyncSender<ChangeEvent>> {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .get(relation)
            .cloned()
            .unwrap_or_default()
    }

    /// Records the attempt and consumes one injected failure if armed.
    fn admit(
        inner: &mut Inner,
        relation: &'static str,
        kind: OpKind,
    ) -> std::result::Result<(), StoreError> {
        inner.log.push(Operation { relation, kind });

        if let Some(remaining) = inner.failures.get_mut(&(relation, kind)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError(format!(
                    "injected {} failure on {relation}",
                    kind.as_ref()
                )));
            }
        }

        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn select(&self, relation: &'static str) -> StoreFuture<'_, Vec<Value>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            Self::admit(&mut inner, relation, OpKind::Select)?;

            Ok(inner.rows.get(relation).cloned().unwrap_or_default())
        })
    }

    fn insert(&self, relation: &'static str, row: Value) -> StoreFuture<'_, Value> {
        Box::pin(async move {
            let (stored, senders) = {
                let mut inner = self.inner.lock().unwrap();
                Self::admit(&mut inner, relation, OpKind::Insert)?;

                let mut stored = row;
                let object = stored
                    .as_object_mut()
                    .ok_or_else(|| StoreError("row must be an object".to_owned()))?;
                inner.sequence += 1;
                object.insert("id".to_owned(), json!(format!("{relation}:{}", inner.sequence)));
                object.insert("version".to_owned(), json!(1));

                inner.rows.entry(relation).or_default().push(stored.clone());

                let senders = inner.subscribers.get(relation).cloned().unwrap_or_default();
                (stored, senders)
            };

            let event = ChangeEvent {
                relation,
                kind: ChangeKind::Insert,
                row: stored.clone(),
            };
            for sender in senders {
                let _ = sender.send(event.clone()).await;
            }

            Ok(stored)
        })
    }

    fn update(&self, relation: &'static str, id: String, patch: Value) -> StoreFuture<'_, Value> {
        Box::pin(async move {
            let (updated, senders) = {
                let mut inner = self.inner.lock().unwrap();
                Self::admit(&mut inner, relation, OpKind::Update)?;

                let patch = patch
                    .as_object()
                    .ok_or_else(|| StoreError("patch must be an object".to_owned()))?
                    .clone();

                let rows = inner.rows.entry(relation).or_default();
                let row = rows
                    .iter_mut()
                    .find(|row| row_id(row) == Some(id.as_str()))
                    .ok_or_else(|| StoreError(format!("no row {id} in {relation}")))?;

                let version = row_version(row) + 1;
                let object = row.as_object_mut().unwrap();
                for (key, value) in patch {
                    object.insert(key, value);
                }
                object.insert("version".to_owned(), json!(version));
                let updated = row.clone();

                let senders = inner.subscribers.get(relation).cloned().unwrap_or_default();
                (updated, senders)
            };

            let event = ChangeEvent {
                relation,
                kind: ChangeKind::Update,
                row: updated.clone(),
            };
            for sender in senders {
                let _ = sender.send(event.clone()).await;
            }

            Ok(updated)
        })
    }

    fn delete(&self, relation: &'static str, id: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let (version, senders) = {
                let mut inner = self.inner.lock().unwrap();
                Self::admit(&mut inner, relation, OpKind::Delete)?;

                let rows = inner.rows.entry(relation).or_default();
                let index = rows
                    .iter()
                    .position(|row| row_id(row) == Some(id.as_str()))
                    .ok_or_else(|| StoreError(format!("no row {id} in {relation}")))?;
                let removed = rows.remove(index);
                let version = row_version(&removed) + 1;

                let senders = inner.subscribers.get(relation).cloned().unwrap_or_default();
                (version, senders)
            };

            let event = ChangeEvent {
                relation,
                kind: ChangeKind::Delete,
                row: json!({ "id": id, "version": version }),
            };
            for sender in senders {
                let _ = sender.send(event.clone()).await;
            }

            Ok(())
        })
    }

    fn subscribe(&self, relation: &'static str) -> kanal::AsyncReceiver<ChangeEvent> {
        let (sender, receiver) = kanal::unbounded_async();
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .entry(relation)
            .or_default()
            .push(sender);

        receiver
    }
}
