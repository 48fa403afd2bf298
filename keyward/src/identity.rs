use std::collections::{btree_set, BTreeMap, BTreeSet};

use aliri::jwt;
use aliri_braid::braid;
use aliri_clock::UnixTime;
use serde::{de::IgnoredAny, Deserialize, Serialize};

/// A role granted to a subject by the identity provider
#[braid(serde)]
pub struct Role;

/// The roles held by an authenticated subject
///
/// When deserializing, both a list of role names and an object keyed by role
/// name are accepted. For an object, only the keys are kept. Absent roles
/// deserialize as an empty set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<RolesDto>", into = "Vec<Role>")]
pub struct RoleSet(BTreeSet<Role>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RolesDto {
    List(Vec<Role>),
    Map(BTreeMap<Role, IgnoredAny>),
}

impl From<Option<RolesDto>> for RoleSet {
    fn from(dto: Option<RolesDto>) -> Self {
        match dto {
            Some(RolesDto::List(roles)) => roles.into_iter().collect(),
            Some(RolesDto::Map(roles)) => roles.into_keys().collect(),
            None => Self::empty(),
        }
    }
}

impl From<RoleSet> for Vec<Role> {
    fn from(roles: RoleSet) -> Self {
        roles.0.into_iter().collect()
    }
}

impl RoleSet {
    /// An empty role set
    #[inline]
    pub const fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Adds a role to the set
    #[inline]
    pub fn insert(&mut self, role: Role) {
        self.0.insert(role);
    }

    /// Checks whether the set holds the given role
    #[inline]
    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(RoleRef::from_str(role))
    }

    /// Checks whether the set holds every one of the given roles
    #[inline]
    pub fn contains_all<'a, I>(&self, roles: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        roles.into_iter().all(|r| self.contains(r))
    }

    /// Iterates over the roles in the set
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RoleRef> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// The number of roles in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no roles
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for RoleSet {
    type Item = Role;
    type IntoIter = btree_set::IntoIter<Role>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The normalized identity of an authenticated caller
///
/// Produced only once a token has been judged valid, either by local
/// verification or by introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// The subject identifier (`sub`)
    #[serde(rename = "sub")]
    pub subject: jwt::Subject,

    /// The subject's email address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// The subject's preferred display name (`preferred_username`)
    #[serde(
        rename = "preferred_username",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,

    /// The roles granted to the subject
    pub roles: RoleSet,

    /// When the presented token stops being valid (`exp`)
    #[serde(rename = "exp", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTime>,
}

/// Indicates that the type carries roles that can be checked against a
/// [`RolePolicy`][crate::RolePolicy]
pub trait HasRoles {
    /// The roles held
    fn roles(&self) -> &RoleSet;
}

impl HasRoles for Identity {
    #[inline]
    fn roles(&self) -> &RoleSet {
        &self.roles
    }
}

impl HasRoles for RoleSet {
    #[inline]
    fn roles(&self) -> &RoleSet {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default)]
        roles: RoleSet,
    }

    #[test]
    fn roles_from_object_keys() -> color_eyre::Result<()> {
        let holder: Holder = serde_json::from_str(
            r#"{ "roles": { "admin": { "248289761001": "example.com" }, "editor": {} } }"#,
        )?;

        let roles: Vec<_> = holder.roles.iter().map(RoleRef::as_str).collect();
        assert_eq!(roles, ["admin", "editor"]);
        Ok(())
    }

    #[test]
    fn roles_from_list() -> color_eyre::Result<()> {
        let holder: Holder = serde_json::from_str(r#"{ "roles": ["viewer", "admin"] }"#)?;

        assert!(holder.roles.contains_all(["admin", "viewer"]));
        assert_eq!(holder.roles.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_or_null_roles_are_empty() -> color_eyre::Result<()> {
        let missing: Holder = serde_json::from_str("{}")?;
        let null: Holder = serde_json::from_str(r#"{ "roles": null }"#)?;

        assert!(missing.roles.is_empty());
        assert!(null.roles.is_empty());
        Ok(())
    }

    #[test]
    fn identity_serializes_with_claim_names() -> color_eyre::Result<()> {
        let identity = Identity {
            subject: jwt::Subject::from_static("user-1"),
            email: Some(String::from("user@example.com")),
            display_name: None,
            roles: [Role::from_static("admin")].into_iter().collect(),
            expires_at: Some(UnixTime(1_700_000_000)),
        };

        let value = serde_json::to_value(&identity)?;

        assert_eq!(
            value,
            serde_json::json!({
                "sub": "user-1",
                "email": "user@example.com",
                "roles": ["admin"],
                "exp": 1_700_000_000u64,
            })
        );
        Ok(())
    }
}
