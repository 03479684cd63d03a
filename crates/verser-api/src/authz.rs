//! Community moderation rules, applied by handlers on top of the plain role
//! lookups of the membership store.

use verser_types::models::Role;

/// Whether `actor` may set a member currently holding `target` to `new_role`.
///
/// Moderators may change roles; only admins may hand out admin or touch an
/// existing admin.
pub fn can_change_role(actor: Role, target: Role, new_role: Role) -> bool {
    if !actor.is_moderator() {
        return false;
    }
    if new_role == Role::Admin || target == Role::Admin {
        return actor == Role::Admin;
    }
    true
}

/// Whether `actor` may remove a member holding `target`.
pub fn can_remove_member(actor: Role, target: Role) -> bool {
    if !actor.is_moderator() {
        return false;
    }
    target != Role::Admin || actor == Role::Admin
}

pub fn can_delete_community(actor: Role) -> bool {
    actor == Role::Admin
}
