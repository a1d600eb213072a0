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

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("write against {relation} failed: {source}")]
    RemoteWrite {
        relation: &'static str,
        source: StoreError,
    },
    #[error("read against {relation} failed: {source}")]
    RemoteRead {
        relation: &'static str,
        source: StoreError,
    },
    #[error("role {role} is not permitted to {action}")]
    Permission { role: String, action: String },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] envy::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// True for the failures a caller can recover from by retrying the
    /// same operation against the store.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteWrite { .. } | SyncError::RemoteRead { .. }
        )
    }
}
