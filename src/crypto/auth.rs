//! Server-side authentication policies (spec §4.5): anyone, password,
//! whitelist. Pinned-server-key checking lives on the client side in
//! `handshake::ClientHandshake`.

use crate::errors::AuthError;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use ed25519_dalek::VerifyingKey;
use std::collections::HashSet;

pub enum AuthPolicy {
    /// Default: any client with a self-consistent signature is accepted.
    AllowAny,
    /// Shared password mixed into the KDF; client and server must agree
    /// on the same Argon2-derived value out of band (spec §4.5.b).
    Password { expected_hash: String },
    /// Only client identity keys in this set are accepted.
    Whitelist(HashSet<[u8; 32]>),
}

impl AuthPolicy {
    pub fn check_client(&self, client_identity: &VerifyingKey) -> Result<(), AuthError> {
        match self {
            AuthPolicy::AllowAny => Ok(()),
            AuthPolicy::Password { .. } => Ok(()), // verified out-of-band via check_password
            AuthPolicy::Whitelist(allowed) => {
                if allowed.contains(client_identity.as_bytes()) {
                    Ok(())
                } else {
                    Err(AuthError::NotWhitelisted)
                }
            }
        }
    }

    pub fn check_password(&self, candidate: &str) -> Result<(), AuthError> {
        match self {
            AuthPolicy::Password { expected_hash } => {
                let parsed = argon2::PasswordHash::new(expected_hash)
                    .map_err(|_| AuthError::PasswordMismatch)?;
                Argon2::default()
                    .verify_password(candidate.as_bytes(), &parsed)
                    .map_err(|_| AuthError::PasswordMismatch)
            }
            _ => Ok(()),
        }
    }
}

/// Hash a plaintext password for storage in config (spec §4.5.b).
pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hashing with a generated salt does not fail")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse battery staple");
        let policy = AuthPolicy::Password { expected_hash: hash };
        assert!(policy.check_password("correct horse battery staple").is_ok());
        assert!(policy.check_password("wrong").is_err());
    }

    #[test]
    fn whitelist_rejects_unknown_key() {
        use ed25519_dalek::SigningKey;
        let allowed = SigningKey::generate(&mut rand::rngs::OsRng).verifying_key();
        let stranger = SigningKey::generate(&mut rand::rngs::OsRng).verifying_key();
        let mut set = HashSet::new();
        set.insert(*allowed.as_bytes());
        let policy = AuthPolicy::Whitelist(set);
        assert!(policy.check_client(&allowed).is_ok());
        assert!(policy.check_client(&stranger).is_err());
    }
}
