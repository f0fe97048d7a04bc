use serde::{Deserialize, Serialize};

use crate::model::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Employee,
    Admin,
}

/// Caller identity as asserted by the identity authority. Trusted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: SubjectId,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Admin satisfies every requirement; Employee only `Employee`.
pub fn authorize(principal: &Principal, required: Role) -> bool {
    match required {
        Role::Employee => true,
        Role::Admin => principal.role == Role::Admin,
    }
}

/// Admin, or the subject that owns the record.
pub fn authorize_owner(principal: &Principal, owner: SubjectId) -> bool {
    principal.is_admin() || principal.subject_id == owner
}

/// Shared-secret check for the service front door.
#[derive(Debug, Clone)]
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    /// Constant-time comparison.
    pub fn verify(&self, presented: &str) -> bool {
        let a = self.token.as_bytes();
        let b = presented.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEE: Principal = Principal { subject_id: 7, role: Role::Employee };
    const ADMIN: Principal = Principal { subject_id: 1, role: Role::Admin };

    #[test]
    fn admin_satisfies_everything() {
        assert!(authorize(&ADMIN, Role::Admin));
        assert!(authorize(&ADMIN, Role::Employee));
    }

    #[test]
    fn employee_is_not_admin() {
        assert!(authorize(&EMPLOYEE, Role::Employee));
        assert!(!authorize(&EMPLOYEE, Role::Admin));
    }

    #[test]
    fn owner_or_admin() {
        assert!(authorize_owner(&EMPLOYEE, 7));
        assert!(!authorize_owner(&EMPLOYEE, 8));
        assert!(authorize_owner(&ADMIN, 8));
    }

    #[test]
    fn token_compare() {
        let auth = TokenAuth::new("s3cret".into());
        assert!(auth.verify("s3cret"));
        assert!(!auth.verify("s3cre"));
        assert!(!auth.verify("s3creT"));
        assert!(!auth.verify(""));
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"Admin\"");
        let p: Principal = serde_json::from_str(r#"{"subject_id":3,"role":"Employee"}"#).unwrap();
        assert_eq!(p, Principal { subject_id: 3, role: Role::Employee });
    }
}
