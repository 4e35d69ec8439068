/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Roles carried in a token expand to the permissions defined here.
 */

use lazy_static::lazy_static;
use std::collections::HashMap;

use super::permissions::consts;

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}

lazy_static! {
    pub static ref ROLES: HashMap<String, Role> = {
        let mut roles = HashMap::new();

        // Admin role - has all permissions
        roles.insert(
            "admin".to_string(),
            Role {
                name: "admin".to_string(),
                description: "Administrator with full access".to_string(),
                permissions: vec!["*".to_string()],
            },
        );

        roles.insert(
            "fulfillment".to_string(),
            Role {
                name: "fulfillment".to_string(),
                description: "Warehouse staff who hand orders over to buyers".to_string(),
                permissions: vec![
                    consts::ORDERS_READ_ALL.to_string(),
                    consts::ORDERS_DELIVER.to_string(),
                ],
            },
        );

        roles.insert(
            "customer".to_string(),
            Role {
                name: "customer".to_string(),
                description: "Buyer with access to their own orders".to_string(),
                permissions: vec![],
            },
        );

        roles
    };
}

/// Permissions granted by `role`; unknown roles grant nothing.
pub fn role_permissions(role: &str) -> &'static [String] {
    ROLES
        .get(role)
        .map(|r| r.permissions.as_slice())
        .unwrap_or(&[])
}
