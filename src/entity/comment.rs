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

use crate::entity::id::EntityId;
use crate::entity::EntityRef;
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumString};

/// Local-only delivery state of a comment. Never persisted; a comment whose
/// write failed stays visible with its content intact until retried.
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
pub enum UploadStatus {
    #[default]
    Uploading,
    Success,
    Failed,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Comment {
    pub(crate) id: EntityId,
    pub(crate) parent: EntityRef,
    pub(crate) author_id: String,
    pub(crate) content: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) upload_status: UploadStatus,
}

impl Comment {
    pub(crate) fn staged(parent: EntityRef, author_id: &str, content: &str) -> Self {
        let now = Utc::now();

        Self {
            id: EntityId::draft("comment"),
            parent,
            author_id: author_id.to_owned(),
            content: content.to_owned(),
            created_at: now,
            updated_at: now,
            upload_status: UploadStatus::Uploading,
        }
    }
}
