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

use crate::prelude::*;
use std::time::Duration;

/// Environment prefix for all configuration variables.
const ENV_PREFIX: &str = "CANOPUS_";

#[derive(Deserialize, Debug, Clone, Getters, Setters)]
#[get = "pub"]
#[set = "pub"]
pub struct SyncConfig {
    /// emergency cutoff for the bulk board fetch, after which the loading
    /// flag is cleared while already loaded entities are kept
    #[serde(default = "default_fetch_timeout_ms")]
    fetch_timeout_ms: u64,
    /// role recorded on assignment rows written by this client
    #[serde(default = "default_assignment_role")]
    assignment_role: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let config = envy::prefixed(ENV_PREFIX).from_env::<SyncConfig>()?;

        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            assignment_role: default_assignment_role(),
        }
    }
}

fn default_fetch_timeout_ms() -> u64 {
    15_000
}

fn default_assignment_role() -> String {
    "assignee".to_owned()
}
