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

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use strum::{AsRefStr, EnumString};

pub mod memory;

/// Named relations of the hosted backend. The core depends on these names
/// and nothing else about the backend.
pub mod relation {
    pub const TASKS: &str = "tasks";
    pub const SUBTASKS: &str = "subtasks";
    pub const COMMENTS: &str = "comments";
    pub const TASK_ASSIGNMENTS: &str = "task_assignments";
    pub const SUBTASK_ASSIGNMENTS: &str = "subtask_assignments";
    pub const TEAM_MEMBERS: &str = "team_members";
    pub const USERS: &str = "users";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Opaque failure reported by the store backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct StoreError(pub String);

#[derive(
    Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One entry of the store's append-only change feed. The row payload always
/// carries the row `id` and, where the backend supports it, a per-row
/// monotonic `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub relation: &'static str,
    pub kind: ChangeKind,
    pub row: Value,
}

pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, StoreError>> + Send + 'a>>;

/// The opaque remote persistence contract: query, insert, update, delete
/// against named relations plus a change-feed subscription. Persistence,
/// authentication and row-level authorization live behind this boundary.
pub trait RemoteStore: Send + Sync {
    fn select(&self, relation: &'static str) -> StoreFuture<'_, Vec<Value>>;

    /// Inserts the row and resolves to the stored row including the
    /// store-assigned id.
    fn insert(&self, relation: &'static str, row: Value) -> StoreFuture<'_, Value>;

    /// Merges the patch object into the row with the given id and resolves
    /// to the updated row.
    fn update(&self, relation: &'static str, id: String, patch: Value) -> StoreFuture<'_, Value>;

    fn delete(&self, relation: &'static str, id: String) -> StoreFuture<'_, ()>;

    fn subscribe(&self, relation: &'static str) -> kanal::AsyncReceiver<ChangeEvent>;
}

/// Reads the `id` column out of a raw row.
pub fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

/// Reads the per-row version out of a raw row; rows from backends without
/// versioning report 0 and bypass the relay's staleness guard.
pub fn row_version(row: &Value) -> u64 {
    row.get("version").and_then(Value::as_u64).unwrap_or(0)
}
