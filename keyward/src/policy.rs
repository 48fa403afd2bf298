use std::fmt;

use thiserror::Error;

use crate::{AuthError, RoleSet};

/// Decides whether held roles satisfy a route's required role groups
///
/// `None` always matches. Otherwise `required` is a list of alternatives: each
/// entry is a whitespace-separated group of role names that must all be held,
/// and the roles match if any one group is fully held. An empty list matches
/// nothing, while an empty group is trivially satisfied.
///
/// ```
/// use keyward::{matches, Role, RoleSet};
///
/// let roles: RoleSet = [Role::from_static("a"), Role::from_static("b")]
///     .into_iter()
///     .collect();
///
/// assert!(matches(&roles, Some(&["a b", "c"])));
/// assert!(!matches(&roles, Some(&["a c"])));
/// assert!(matches(&roles, None::<&[&str]>));
/// ```
pub fn matches<I, S>(roles: &RoleSet, required: Option<I>) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match required {
        None => true,
        Some(groups) => groups
            .into_iter()
            .any(|group| roles.contains_all(group.as_ref().split_whitespace())),
    }
}

/// Indicates that the caller's roles did not satisfy a [`RolePolicy`]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Error)]
#[error("insufficient roles")]
pub struct InsufficientRoles;

/// A route-level access policy over the caller's roles
///
/// The policy holds alternatives. Each alternative is a group of roles that
/// must all be held. A policy without alternatives denies every request.
///
/// ```
/// use aliri_traits::Policy;
/// use keyward::{Role, RolePolicy, RoleSet};
///
/// let policy = RolePolicy::allow_one("admin").or_allow("ops audit");
///
/// let ops: RoleSet = [Role::from_static("ops"), Role::from_static("audit")]
///     .into_iter()
///     .collect();
/// assert!(policy.evaluate(&ops).is_ok());
///
/// let auditor: RoleSet = [Role::from_static("audit")].into_iter().collect();
/// assert!(policy.evaluate(&auditor).is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct RolePolicy {
    inner: RolePolicyInner,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum RolePolicyInner {
    #[default]
    DenyAll,
    AllowAny,
    AllowMany(Vec<String>),
}

impl RolePolicy {
    /// Constructs a policy that has no permissible alternatives
    #[inline]
    pub const fn deny_all() -> Self {
        Self {
            inner: RolePolicyInner::DenyAll,
        }
    }

    /// Constructs a policy that places no requirement on roles
    #[inline]
    pub const fn allow_any() -> Self {
        Self {
            inner: RolePolicyInner::AllowAny,
        }
    }

    /// Constructs a policy that requires every role in this
    /// whitespace-separated group
    #[inline]
    pub fn allow_one(group: impl Into<String>) -> Self {
        Self::deny_all().or_allow(group)
    }

    /// Adds an alternative group of roles
    pub fn or_allow(self, group: impl Into<String>) -> Self {
        let group = group.into();
        match self.inner {
            RolePolicyInner::AllowAny => Self::allow_any(),
            RolePolicyInner::DenyAll => Self {
                inner: RolePolicyInner::AllowMany(vec![group]),
            },
            RolePolicyInner::AllowMany(mut groups) => {
                groups.push(group);
                Self {
                    inner: RolePolicyInner::AllowMany(groups),
                }
            }
        }
    }

    /// Adds an alternative group of roles
    pub fn allow(&mut self, group: impl Into<String>) {
        let this = std::mem::take(self);
        *self = this.or_allow(group);
    }

    /// The alternative role groups, or `None` if any roles are accepted
    pub fn required(&self) -> Option<&[String]> {
        match &self.inner {
            RolePolicyInner::DenyAll => Some(&[]),
            RolePolicyInner::AllowAny => None,
            RolePolicyInner::AllowMany(groups) => Some(groups),
        }
    }

    /// Checks the roles, producing the caller-facing error on denial
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InsufficientScope`] naming the accepted groups.
    pub fn check(&self, roles: &RoleSet) -> Result<(), AuthError> {
        if matches(roles, self.required()) {
            Ok(())
        } else {
            tracing::debug!(required = %self, "caller lacks required roles");
            Err(AuthError::InsufficientScope {
                required: self.to_string(),
            })
        }
    }
}

impl aliri_traits::Policy for RolePolicy {
    type Request = RoleSet;
    type Denial = InsufficientRoles;

    fn evaluate(&self, held: &Self::Request) -> Result<(), Self::Denial> {
        if matches(held, self.required()) {
            Ok(())
        } else {
            Err(InsufficientRoles)
        }
    }
}

impl fmt::Display for RolePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.required() {
            None => f.write_str("*"),
            Some(groups) => {
                f.write_str("[")?;
                for (i, group) in groups.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{group:?}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_traits::Policy;

    use super::*;
    use crate::Role;

    fn roles(names: &[&'static str]) -> RoleSet {
        names.iter().copied().map(Role::from_static).collect()
    }

    #[test]
    fn no_requirement_always_matches() {
        assert!(matches(&RoleSet::empty(), None::<&[&str]>));
        assert!(matches(&roles(&["a"]), None::<&[&str]>));
    }

    #[test]
    fn all_roles_of_one_group_match() {
        assert!(matches(&roles(&["a", "b"]), Some(&["a b", "c"])));
    }

    #[test]
    fn partial_group_does_not_match() {
        assert!(!matches(&roles(&["a"]), Some(&["a b"])));
        assert!(!matches(&roles(&["a"]), Some(&["a b", "c"])));
    }

    #[test]
    fn any_alternative_matches() {
        assert!(matches(&roles(&["c"]), Some(&["a b", "c"])));
    }

    #[test]
    fn extra_whitespace_in_groups_is_ignored() {
        assert!(matches(&roles(&["a", "b"]), Some(&["  a\t b "])));
    }

    #[test]
    fn empty_requirement_list_matches_nothing() {
        let none: &[&str] = &[];
        assert!(!matches(&roles(&["a"]), Some(none)));
    }

    #[test]
    fn empty_group_is_trivially_satisfied() {
        assert!(matches(&RoleSet::empty(), Some(&[""])));
    }

    #[test]
    fn deny_all_policy_denies_everyone() {
        let policy = RolePolicy::deny_all();

        assert_eq!(policy.evaluate(&roles(&["admin"])), Err(InsufficientRoles));
    }

    #[test]
    fn allow_any_absorbs_alternatives() {
        let policy = RolePolicy::allow_any().or_allow("admin");

        assert_eq!(policy, RolePolicy::allow_any());
        assert!(policy.evaluate(&RoleSet::empty()).is_ok());
    }

    #[test]
    fn allow_adds_alternatives_in_place() {
        let mut policy = RolePolicy::deny_all();
        policy.allow("a b");
        policy.allow("c");

        assert_eq!(
            policy.required(),
            Some(&[String::from("a b"), String::from("c")][..])
        );
    }

    #[test]
    fn check_names_required_groups() {
        let policy = RolePolicy::allow_one("a b").or_allow("c");

        let err = policy.check(&roles(&["a"])).unwrap_err();

        assert_eq!(
            err.to_string(),
            r#"Token has insufficient scope. Route requires: ["a b", "c"]"#
        );
    }
}
