use tracing::debug;

use super::permissions::{consts, permission_matches};
use super::rbac::role_permissions;
use super::AuthUser;

/// Privileged operations on orders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    ViewAllOrders,
    MarkDelivered,
    ViewOrphanedSessions,
}

impl Capability {
    pub fn permission(&self) -> &'static str {
        match self {
            Capability::ViewAllOrders => consts::ORDERS_READ_ALL,
            Capability::MarkDelivered => consts::ORDERS_DELIVER,
            Capability::ViewOrphanedSessions => consts::ORDERS_RECONCILE,
        }
    }
}

/// Decides whether an authenticated caller may exercise a capability.
pub trait Authorizer: Send + Sync {
    fn is_allowed(&self, user: &AuthUser, capability: Capability) -> bool;
}

/// Grants a capability through an explicit token permission or a role grant.
#[derive(Debug, Clone, Default)]
pub struct PermissionAuthorizer;

impl Authorizer for PermissionAuthorizer {
    fn is_allowed(&self, user: &AuthUser, capability: Capability) -> bool {
        let required = capability.permission();

        let explicit = user
            .permissions
            .iter()
            .any(|granted| permission_matches(granted, required));
        let via_role = user.roles.iter().any(|role| {
            role_permissions(role)
                .iter()
                .any(|granted| permission_matches(granted, required))
        });

        debug!(user_id = %user.user_id, ?capability, explicit, via_role, "authorization check");
        explicit || via_role
    }
}
