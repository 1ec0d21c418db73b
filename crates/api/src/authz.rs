//! API-side authorization for loan endpoints.
//!
//! Turns the request's principal into an auth-layer [`Principal`] whose
//! permissions come from its roles. Loan actions are checked by the
//! dispatcher before the engine runs; plain endpoints call [`require`].

use circulation_auth::{AuthzError, Permission, Principal, Role, authorize};

use crate::context::PrincipalContext;

pub const LOAN_CREATE: &str = "circulation.loan.create";
pub const LOAN_READ: &str = "circulation.loan.read";

/// Resolve the principal of the current request.
pub fn principal(ctx: &PrincipalContext) -> Principal {
    Principal {
        principal_id: ctx.principal_id(),
        roles: ctx.roles().to_vec(),
        permissions: permissions_from_roles(ctx.roles()),
    }
}

/// Check a single permission for the current request.
pub fn require(ctx: &PrincipalContext, permission: &'static str) -> Result<Principal, AuthzError> {
    let principal = principal(ctx);
    authorize(&principal, &Permission::new(permission))?;
    Ok(principal)
}

/// Static role→permission mapping.
///
/// - `admin`, `librarian`: every permission
/// - `patron`: place requests and read loans
fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles
        .iter()
        .any(|r| matches!(r.as_str(), "admin" | "librarian"))
    {
        return vec![Permission::new("*")];
    }

    let mut permissions = Vec::new();
    if roles.iter().any(|r| r.as_str() == "patron") {
        permissions.push(Permission::loan_action("request"));
        permissions.push(Permission::new(LOAN_READ));
    }
    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use circulation_auth::PrincipalId;

    fn ctx(roles: &[&'static str]) -> PrincipalContext {
        PrincipalContext::new(PrincipalId::new(), roles.iter().map(|r| Role::new(*r)).collect())
    }

    #[test]
    fn librarian_gets_wildcard() {
        let p = principal(&ctx(&["librarian"]));
        assert_eq!(p.permissions, vec![Permission::new("*")]);
    }

    #[test]
    fn patron_may_request_but_not_create() {
        let patron = ctx(&["patron"]);
        assert!(require(&patron, LOAN_READ).is_ok());
        assert!(authorize(&principal(&patron), &Permission::loan_action("request")).is_ok());
        assert!(require(&patron, LOAN_CREATE).is_err());
    }

    #[test]
    fn unknown_role_has_no_permissions() {
        assert!(principal(&ctx(&["viewer"])).permissions.is_empty());
    }
}
