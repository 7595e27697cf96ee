//! Role gate for privileged actions

use super::FlowError;
use crate::db::Role;

/// Roles allowed to moderate, view callbacks and broadcast
pub const STAFF: &[Role] = &[Role::Dekanat, Role::Admin];

/// Roles allowed to assign roles
pub const ADMINS: &[Role] = &[Role::Admin];

pub fn allows(role: Role, required: &[Role]) -> bool {
    required.contains(&role)
}

pub fn require(role: Role, required: &[Role]) -> Result<(), FlowError> {
    if allows(role, required) {
        Ok(())
    } else {
        Err(FlowError::Unauthorized)
    }
}
