//! Built-in roles seeded into every registry

use super::types::{Permission, PermissionScope, Role};

/// Ids in this namespace belong to seeded roles only
pub const SYSTEM_ROLE_PREFIX: &str = "system:";

pub const ROLE_ADMIN: &str = "system:admin";
pub const ROLE_OPERATOR: &str = "system:operator";
pub const ROLE_DEVELOPER: &str = "system:developer";
pub const ROLE_VIEWER: &str = "system:viewer";

pub fn is_reserved_role_id(id: &str) -> bool {
    id.starts_with(SYSTEM_ROLE_PREFIX)
}

fn system_role(id: &str, name: &str, description: &str, priority: i32, permissions: Vec<Permission>) -> Role {
    Role {
        id: id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        permissions,
        is_system: true,
        priority,
    }
}

/// Roles in registration order
pub fn system_roles() -> Vec<Role> {
    use PermissionScope::{Customer, Global};

    vec![
        system_role(
            ROLE_ADMIN,
            "Administrator",
            "Full access to every resource",
            100,
            vec![Permission::new("admin-all", "*", &["*"], Global)],
        ),
        system_role(
            ROLE_OPERATOR,
            "Operator",
            "Manages production configuration for a customer",
            75,
            vec![
                Permission::new(
                    "operator-property",
                    "property",
                    &["read", "list", "create", "update", "activate"],
                    Customer,
                ),
                Permission::new("operator-purge", "purge", &["create", "read"], Customer),
                Permission::new(
                    "operator-dns",
                    "dns",
                    &["read", "list", "create", "update", "delete"],
                    Customer,
                ),
                Permission::new("operator-certificate", "certificate", &["read", "list"], Customer),
            ],
        ),
        system_role(
            ROLE_DEVELOPER,
            "Developer",
            "Builds and tests configuration in staging",
            50,
            vec![
                Permission::new("developer-property-read", "property", &["read", "list"], Customer),
                Permission::new(
                    "developer-property-write",
                    "property",
                    &["create", "update", "activate"],
                    Customer,
                )
                .with_constraint("environment", "staging"),
                Permission::new("developer-dns-read", "dns", &["read", "list"], Customer),
            ],
        ),
        system_role(
            ROLE_VIEWER,
            "Viewer",
            "Read-only access to customer resources",
            10,
            vec![Permission::new("viewer-read", "*", &["read", "list"], Customer)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_roles_are_reserved() {
        let roles = system_roles();
        assert_eq!(roles.len(), 4);
        for role in &roles {
            assert!(role.is_system);
            assert!(is_reserved_role_id(&role.id));
            assert!(!role.permissions.is_empty());
        }
    }

    #[test]
    fn test_priorities_are_ordered() {
        let priorities: Vec<i32> = system_roles().iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
    }
}
