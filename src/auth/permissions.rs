/*!
 * # Permissions Module
 *
 * Permission strings take the form `resource:action`. A granted `resource:*`
 * covers every action on that resource and a bare `*` covers everything.
 */

/// Permission string constants for compile-time safety
pub mod consts {
    pub const ORDERS_READ_ALL: &str = "orders:read_all";
    pub const ORDERS_DELIVER: &str = "orders:deliver";
    pub const ORDERS_RECONCILE: &str = "orders:reconcile";
}

/// True when `granted` covers `required`.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((g_resource, "*")), Some((r_resource, _))) => g_resource == r_resource,
        _ => false,
    }
}
