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

use crate::auth::Role;
use std::ops::Deref;

#[derive(Debug, Clone, PartialEq, Getters)]
#[get = "pub"]
pub struct Permission {
    name: &'static str,
    roles: &'static [Role],
}

impl Permission {
    pub fn grants(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

macro_rules! permissions {
    ($(($ident:ident, $name:expr, [$($role:ident),*])),* $(,)?) => {
        lazy_static::lazy_static! {
            $(
                pub static ref $ident: Permission = {
                    Permission {
                        name: $name,
                        roles: &[$(Role::$role),*],
                    }
                };
            )*

            pub static ref PERMISSIONS: Vec<&'static Permission> = {
                vec![
                        $(
                            $ident.deref(),
                        )*
                    ]
            };
        }
    };
}

permissions!(
    (TASK_WRITE, "task.write", [Administrator, Manager]),
    (TASK_DELETE, "task.delete", [Administrator, Manager]),
    (SUBTASK_WRITE, "subtask.write", [Administrator, Manager]),
    (COMMENT_WRITE, "comment.write", [Administrator, Manager]),
    (ASSIGNMENT_WRITE, "assignment.write", [Administrator, Manager]),
    (MEMBER_MANAGE, "member.manage", [Administrator]),
);

#[cfg(test)]
mod tests {
    use crate::auth::permission::{ASSIGNMENT_WRITE, MEMBER_MANAGE, PERMISSIONS};
    use crate::auth::Role;

    #[test]
    fn test_grants() {
        assert!(ASSIGNMENT_WRITE.grants(&Role::Administrator));
        assert!(ASSIGNMENT_WRITE.grants(&Role::Manager));
        assert!(!ASSIGNMENT_WRITE.grants(&Role::Viewer));
        assert!(!MEMBER_MANAGE.grants(&Role::Manager));
    }

    #[test]
    fn test_registry_complete() {
        assert_eq!(PERMISSIONS.len(), 6);
        assert!(PERMISSIONS
            .iter()
            .any(|permission| *permission.name() == "task.write"));
    }
}
