//! Password hashing capability.
//!
//! The directory and the channel registry never see hashing internals; they
//! talk to a [`SecretHasher`], so the algorithm can be swapped (and unit
//! tests can substitute a cheap double). The default is Argon2id with
//! per-secret salts.

use crate::error::{EngineError, EngineResult};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Salted digest pair as persisted next to an account or channel.
#[derive(Debug, Clone)]
pub struct StoredSecret {
    pub salt: String,
    pub digest: String,
}

/// Injected hashing capability: `hash(plaintext, salt) -> digest`.
///
/// `verify` must be constant-time in the digest comparison, and `burn` must
/// cost roughly one verification so lookups that find no account spend the
/// same time as lookups that find one.
pub trait SecretHasher: Send + Sync {
    fn new_salt(&self) -> String;
    fn hash(&self, plaintext: &str, salt: &str) -> EngineResult<String>;
    fn verify(&self, plaintext: &str, salt: &str, digest: &str) -> bool;
    fn burn(&self, plaintext: &str);

    /// Derive a fresh salt and digest in one step.
    fn derive(&self, plaintext: &str) -> EngineResult<StoredSecret> {
        let salt = self.new_salt();
        let digest = self.hash(plaintext, &salt)?;
        Ok(StoredSecret { salt, digest })
    }
}

/// Argon2id implementation storing PHC strings.
#[derive(Default)]
pub struct Argon2Hasher;

impl SecretHasher for Argon2Hasher {
    fn new_salt(&self) -> String {
        SaltString::generate(&mut OsRng).as_str().to_string()
    }

    fn hash(&self, plaintext: &str, salt: &str) -> EngineResult<String> {
        let salt = SaltString::from_b64(salt)
            .map_err(|e| EngineError::Internal(format!("bad salt: {e}")))?;
        let digest = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| EngineError::Internal(format!("hashing failed: {e}")))?;
        Ok(digest.to_string())
    }

    fn verify(&self, plaintext: &str, _salt: &str, digest: &str) -> bool {
        // The PHC digest embeds the salt it was derived with; the stored salt
        // column stays authoritative for re-derivation.
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    fn burn(&self, plaintext: &str) {
        // Pre-computed Argon2id digest that matches nothing; verifying against
        // it costs the same CPU as a real check, so an unknown account name
        // cannot be told apart from a wrong password by timing.
        const DUMMY_DIGEST: &str = "$argon2id$v=19$m=19456,t=2,p=1$dGltaW5nLW9yYWNsZS1kdW1teQ$K4VZh8k8YL3E8H7E8H7E8H7E8H7E8H7E8H7E8H7E8Hs";
        if let Ok(parsed) = PasswordHash::new(DUMMY_DIGEST) {
            let _ = Argon2::default().verify_password(plaintext.as_bytes(), &parsed);
        }
    }
}
