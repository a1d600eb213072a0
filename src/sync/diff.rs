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

use std::collections::BTreeSet;

/// Minimal add/remove delta between a current and a desired assignee set.
/// Members present in both sets are never written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Getters)]
#[get = "pub"]
pub struct AssignmentDiff {
    to_add: BTreeSet<String>,
    to_remove: BTreeSet<String>,
}

impl AssignmentDiff {
    pub fn between(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            to_add: desired.difference(current).cloned().collect(),
            to_remove: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::diff::AssignmentDiff;
    use std::collections::BTreeSet;

    fn set(members: &[&str]) -> BTreeSet<String> {
        members.iter().map(|member| member.to_string()).collect()
    }

    #[test]
    fn test_minimal_delta() {
        let diff = AssignmentDiff::between(&set(&["a", "b", "c"]), &set(&["b", "c", "d"]));

        assert_eq!(diff.to_add(), &set(&["d"]));
        assert_eq!(diff.to_remove(), &set(&["a"]));
    }

    #[test]
    fn test_equal_sets_are_empty() {
        let diff = AssignmentDiff::between(&set(&["a", "b"]), &set(&["a", "b"]));

        assert!(diff.is_empty());
    }

    #[test]
    fn test_disjoint_sets() {
        let diff = AssignmentDiff::between(&set(&[]), &set(&["a"]));
        assert_eq!(diff.to_add(), &set(&["a"]));
        assert!(diff.to_remove().is_empty());
    }
}
