//! Local accounts: Argon2id password hashes stored on the user row.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHashString, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use tracing::{debug, instrument};

use crate::identity::User;
use crate::source::Error;

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(OsRng);

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    let hash = argon
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Configuration(format!("Unable to hash password: {e}")))?;

    Ok(hash.to_string())
}

/// Users without a usable hash never verify.
#[instrument(skip_all, fields(user = %user.name))]
pub fn verify_password(user: &User, password: &str) -> bool {
    if user.passwd.is_empty() {
        debug!("No password set for user");
        return false;
    }

    let hash = match PasswordHashString::new(&user.passwd) {
        Ok(hash) => hash,
        Err(error) => {
            debug!("Stored password hash is invalid: {error}");
            return false;
        }
    };

    match Argon2::default().verify_password(password.as_bytes(), &hash.password_hash()) {
        Ok(()) => true,
        Err(error) => {
            debug!("Password verification failed: {error}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_password_verifies() {
        let user = User {
            name: "alice".to_string(),
            passwd: hash_password("my_secure_password").unwrap(),
            ..User::default()
        };

        assert!(user.passwd.starts_with("$argon2id$"));
        assert!(verify_password(&user, "my_secure_password"));
        assert!(!verify_password(&user, "wrong"));
    }

    #[test]
    fn test_missing_or_garbage_hash_never_verifies() {
        let user = User::default();
        assert!(!verify_password(&user, ""));

        let user = User {
            passwd: "plaintext".to_string(),
            ..User::default()
        };
        assert!(!verify_password(&user, "plaintext"));
    }
}
