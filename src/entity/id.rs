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

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire prefix marking ids the store has not assigned yet.
pub const DRAFT_PREFIX: &str = "temp-";

/// Identity of an entity, with "is this saved yet" as a type-level
/// distinction instead of a string prefix check.
///
/// A `Pending` id is generated locally when an entity is staged and is
/// replaced in place by the store-assigned `Persisted` id once the create
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityId {
    Pending { draft: String },
    Persisted { id: String },
}

impl EntityId {
    /// Generates a fresh draft id of the form `temp-<kind>-<millis>-<random>`.
    pub fn draft(kind: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();

        Self::Pending {
            draft: format!("{DRAFT_PREFIX}{kind}-{millis}-{}", nanoid::nanoid!(6)),
        }
    }

    pub fn persisted(id: impl Into<String>) -> Self {
        Self::Persisted { id: id.into() }
    }

    /// Splits a raw wire id back into the two variants. The `temp-` prefix
    /// is the wire convention; everything else is store-assigned.
    pub fn parse(value: &str) -> Self {
        if value.starts_with(DRAFT_PREFIX) {
            return Self::Pending {
                draft: value.to_owned(),
            };
        }

        Self::Persisted {
            id: value.to_owned(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending { draft } => draft.as_str(),
            Self::Persisted { id } => id.as_str(),
        }
    }

    /// The store-assigned id, if the entity has one.
    pub fn persisted_id(&self) -> Option<&str> {
        match self {
            Self::Pending { .. } => None,
            Self::Persisted { id } => Some(id.as_str()),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        Ok(Self::parse(raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::id::{EntityId, DRAFT_PREFIX};

    #[test]
    fn test_draft_shape() {
        let id = EntityId::draft("task");

        assert!(id.is_pending());
        assert!(id.as_str().starts_with("temp-task-"));
        assert!(id.persisted_id().is_none());
    }

    #[test]
    fn test_parse() {
        let pending = EntityId::parse("temp-comment-1700000000000-aB3dEf");
        let persisted = EntityId::parse("tasks:42");

        assert!(pending.is_pending());
        assert!(!persisted.is_pending());
        assert_eq!(persisted.persisted_id(), Some("tasks:42"));
    }

    #[test]
    fn test_wire_round_trip() {
        let id = EntityId::persisted("tasks:7");
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, "\"tasks:7\"");

        let decoded: EntityId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(id, decoded);

        let draft: EntityId = serde_json::from_str("\"temp-task-1-x\"").unwrap();
        assert!(draft.is_pending());
        assert!(draft.as_str().starts_with(DRAFT_PREFIX));
    }
}
