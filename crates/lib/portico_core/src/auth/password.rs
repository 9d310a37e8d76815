//! Password hashing via bcrypt and policy checks.

use super::AuthError;
use crate::config::PasswordPolicy;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

impl PasswordPolicy {
    /// Unmet requirements, empty when the password is acceptable.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut out = Vec::new();
        if password.chars().count() < self.min_length {
            out.push(format!("at least {} characters", self.min_length));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            out.push("an uppercase letter".into());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            out.push("a lowercase letter".into());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            out.push("a digit".into());
        }
        if self.require_special && !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
            out.push("a special character".into());
        }
        out
    }

    pub fn is_satisfied_by(&self, password: &str) -> bool {
        self.violations(password).is_empty()
    }

    pub fn check(&self, password: &str) -> Result<(), AuthError> {
        let missing = self.violations(password);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(format!(
                "password must contain {}",
                missing.join(", ")
            )))
        }
    }
}
