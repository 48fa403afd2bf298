//! Types used to assert that an authenticated caller holds the roles a route
//! requires

/// Constructs an extractor that asserts the caller holds the expected roles.
///
/// For a more concise way to construct several role guards, see
/// [`role_guards!`][crate::role_guards!].
///
/// In the simplest case, a single role is required:
///
/// ```
/// use keyward_axum::role_guard;
///
/// role_guard!(Admin; "admin");
/// ```
///
/// Alternative groups of roles can be accepted by separating them with the
/// logical or operator (`||`):
///
/// ```
/// use keyward_axum::role_guard;
///
/// role_guard!(AdminOrAuditor; ["admin" || "auditor"]);
/// ```
///
/// When several roles must all be held, they are combined into a single
/// space-separated group:
///
/// ```
/// use keyward_axum::role_guard;
///
/// role_guard!(OpsAuditOrAdmin; ["ops audit" || "admin"]);
/// ```
///
/// A guard declared with `*` only requires an authenticated caller, and one
/// declared with `[]` refuses everyone.
///
/// The guard authenticates the caller just like
/// [`CurrentUser`][crate::CurrentUser] and then checks the caller's roles:
///
/// ```no_run
/// use axum::{routing::get, Router};
/// use keyward_axum::role_guard;
///
/// role_guard!(Admin; "admin");
///
/// async fn admin_only(Admin(identity): Admin) -> String {
///     format!("You're an admin, {}!", identity.subject)
/// }
///
/// let router: Router = Router::new().route("/admin", get(admin_only));
/// ```
#[macro_export]
macro_rules! role_guard {
    ($vis:vis $i:ident; *) => {
        $crate::__role_guard_impl!(
            $vis $i;
            "A guard that admits any authenticated caller";
            $crate::__private::RolePolicy::allow_any()
        );
    };
    ($vis:vis $i:ident; $group:literal) => {
        $crate::role_guard!($vis $i; [$group]);
    };
    ($vis:vis $i:ident; [$($group:literal)||* $(,)?]) => {
        $crate::__role_guard_impl!(
            $vis $i;
            concat!(
                "Ensures that the caller holds all roles of at least one of the following groups:\n",
                $("\n* `", $group, "`",)*
            );
            $crate::__private::RolePolicy::deny_all()
            $(
                .or_allow($group)
            )*
        );
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __role_guard_impl {
    ($vis:vis $i:ident; $doc:expr; $policy:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug)]
        $vis struct $i($vis $crate::__private::Identity);

        impl $i {
            #[allow(dead_code)]
            $vis fn into_identity(self) -> $crate::__private::Identity {
                self.0
            }

            #[allow(dead_code)]
            $vis fn identity(&self) -> &$crate::__private::Identity {
                &self.0
            }
        }

        impl $crate::RoleGuardPolicy for $i {
            fn role_policy() -> &'static $crate::__private::RolePolicy {
                static POLICY: $crate::__private::OnceCell<$crate::__private::RolePolicy> =
                    $crate::__private::OnceCell::new();
                POLICY.get_or_init(|| $policy)
            }
        }

        #[$crate::__private::async_trait]
        impl<S> $crate::__private::FromRequestParts<S> for $i
        where
            S: Send + Sync,
        {
            type Rejection = $crate::AuthFailed;

            async fn from_request_parts(
                req: &mut $crate::__private::Parts,
                _state: &S,
            ) -> Result<Self, Self::Rejection> {
                $crate::__private::from_request(
                    req,
                    <Self as $crate::RoleGuardPolicy>::role_policy(),
                )
                .await
                .map(Self)
            }
        }
    };
}

/// Convenience macro for services that need to define many role guards.
///
/// # Example
///
/// ```
/// use keyward_axum::role_guards;
///
/// role_guards! {
///     role Admin = "admin";
///     role OpsAudit = "ops audit";
///     role AuditOrAdmin = ["ops audit" || "admin"];
///     role Anyone = *;
///     role Nobody = [];
/// }
/// ```
///
/// The above will define a role guard type for each entry, similar to the
/// [`role_guard!`] macro.
#[macro_export]
macro_rules! role_guards {
    ($($vis:vis role $i:ident = $roles:tt);* $(;)?) => {
        $(
            $crate::role_guard!($vis $i; $roles);
        )*
    };
}
