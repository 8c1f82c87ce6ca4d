//! Pure SPM role transitions
//!
//! The role moves `FREE -> CONTEND -> ACQUIRED -> FREE`, with
//! `CONTEND -> FREE` on a failed or interrupted acquisition. Transition
//! checks are effect-free so the coordinator can apply them under its
//! instance lock without doing I/O.

use spm_core::{Role, SpmError};

/// A role change that the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid SPM role transition {from} -> {to}")]
pub struct RoleTransitionError {
    /// Role before the attempted change
    pub from: Role,
    /// Requested role
    pub to: Role,
}

/// Check a transition and return the new role.
pub fn transition(from: Role, to: Role) -> Result<Role, RoleTransitionError> {
    match (from, to) {
        (Role::Free, Role::Contend)
        | (Role::Contend, Role::Acquired)
        | (Role::Contend, Role::Free)
        | (Role::Acquired, Role::Free) => Ok(to),
        _ => Err(RoleTransitionError { from, to }),
    }
}

impl From<RoleTransitionError> for SpmError {
    fn from(err: RoleTransitionError) -> Self {
        SpmError::InvalidRoleTransition {
            from: err.from,
            to: err.to,
        }
    }
}

/// Whether `transition(from, to)` would succeed
pub fn is_allowed(from: Role, to: Role) -> bool {
    transition(from, to).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Free), Just(Role::Contend), Just(Role::Acquired)]
    }

    #[test]
    fn test_election_cycle() {
        let role = transition(Role::Free, Role::Contend).unwrap();
        let role = transition(role, Role::Acquired).unwrap();
        assert_eq!(transition(role, Role::Free).unwrap(), Role::Free);
    }

    #[test]
    fn test_no_shortcut_to_acquired() {
        let err = transition(Role::Free, Role::Acquired).unwrap_err();
        assert_eq!(err.from, Role::Free);
        assert_eq!(err.to, Role::Acquired);
    }

    #[test]
    fn test_self_transitions_rejected() {
        for role in [Role::Free, Role::Contend, Role::Acquired] {
            assert!(!is_allowed(role, role));
        }
    }

    proptest! {
        #[test]
        fn acquired_is_only_reached_through_contend(
            requests in proptest::collection::vec(any_role(), 0..64)
        ) {
            let mut role = Role::Free;
            for next in requests {
                let before = role;
                if let Ok(after) = transition(role, next) {
                    if after == Role::Acquired {
                        prop_assert_eq!(before, Role::Contend);
                    }
                    role = after;
                }
            }
        }

        #[test]
        fn rejected_transitions_leave_role_unchanged(from in any_role(), to in any_role()) {
            match transition(from, to) {
                Ok(role) => prop_assert_eq!(role, to),
                Err(err) => prop_assert_eq!(err, RoleTransitionError { from, to }),
            }
        }
    }
}
