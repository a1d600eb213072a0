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

//! Client-side synchronization core of the Canopus Works task board.
//!
//! Local mutations are applied optimistically through a reducer-owned
//! [`board::BoardState`], persisted against an opaque [`store::RemoteStore`]
//! and reconciled in place once the store assigns an authoritative id. The
//! [`sync::relay`] merges the store's change feed back into local state.

#[macro_use]
extern crate serde;
#[macro_use]
extern crate thiserror;
#[macro_use]
extern crate getset;
#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde_json;

pub mod auth;
pub mod board;
pub mod config;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod store;
pub mod sync;

pub mod prelude {
    pub use crate::auth::{Principal, Role};
    pub use crate::board::{Action, BoardState};
    pub use crate::config::SyncConfig;
    pub use crate::entity::comment::{Comment, UploadStatus};
    pub use crate::entity::id::EntityId;
    pub use crate::entity::member::{MemberStatus, TeamMember};
    pub use crate::entity::subtask::{Subtask, SubtaskDraft, SubtaskPatch};
    pub use crate::entity::task::{
        Attachment, Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus,
    };
    pub use crate::entity::EntityRef;
    pub use crate::error::{Result, SyncError};
    pub use crate::store::{ChangeEvent, ChangeKind, RemoteStore, StoreError};
    pub use crate::sync::diff::AssignmentDiff;
    pub use crate::sync::relay::RelayHandle;
    pub use crate::sync::Synchronizer;
}
