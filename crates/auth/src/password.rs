//! Salted, slow password hashing (PBKDF2-HMAC-SHA256).
//!
//! Hashes and salts are stored as lowercase hex strings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::error::AuthError;

pub const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const TEMP_PASSWORD_BYTES: usize = 9;

/// A freshly derived `(hash, salt)` pair.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    pub hash: String,
    pub salt: String,
}

impl core::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordDigest").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl PasswordHasher {
    /// Zero iterations would make the derivation a no-op, so it is refused.
    pub fn new(iterations: u32) -> Result<Self, AuthError> {
        if iterations == 0 {
            return Err(AuthError::Configuration(
                "pbkdf2 iteration count must be positive".to_string(),
            ));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hash `password` with `salt`, or with a new random salt when `None`.
    pub fn hash(&self, password: &str, salt: Option<&str>) -> PasswordDigest {
        let salt = match salt {
            Some(s) => s.to_string(),
            None => generate_salt(),
        };
        PasswordDigest {
            hash: hex::encode(self.derive(password, &salt)),
            salt,
        }
    }

    /// Recompute and compare in constant time.
    ///
    /// A stored hash that is not valid hex simply fails verification.
    pub fn verify(&self, password: &str, hash: &str, salt: &str) -> bool {
        let Ok(expected) = hex::decode(hash) else {
            return false;
        };
        constant_time_eq(&self.derive(password, salt), &expected)
    }

    fn derive(&self, password: &str, salt: &str) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), self.iterations, &mut key);
        key
    }
}

/// One-off password handed out by an administrator reset.
pub fn generate_temporary_password() -> String {
    let mut bytes = [0u8; TEMP_PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> PasswordHasher {
        PasswordHasher::new(1_000).unwrap()
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = fast();
        let digest = hasher.hash("Secur3P@ssw0rd!", None);
        assert!(hasher.verify("Secur3P@ssw0rd!", &digest.hash, &digest.salt));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = fast();
        let digest = hasher.hash("correct-horse-battery-staple", None);
        assert!(!hasher.verify("wrong-password", &digest.hash, &digest.salt));
    }

    #[test]
    fn generated_salts_differ_and_are_hex() {
        let hasher = fast();
        let a = hasher.hash("same", None);
        let b = hasher.hash("same", None);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.salt.len(), SALT_LEN * 2);
        assert!(a.salt.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn supplied_salt_is_deterministic() {
        let hasher = fast();
        let a = hasher.hash("pw", Some("fixed-salt"));
        let b = hasher.hash("pw", Some("fixed-salt"));
        assert_eq!(a, b);
        assert_eq!(a.salt, "fixed-salt");
    }

    #[test]
    fn malformed_stored_hash_fails_closed() {
        let hasher = fast();
        assert!(!hasher.verify("anything", "not-hex!", "salt"));
        assert!(!hasher.verify("anything", "abcd", "salt"));
    }

    #[test]
    fn iteration_count_changes_the_hash() {
        let a = PasswordHasher::new(1_000).unwrap().hash("pw", Some("s"));
        let b = PasswordHasher::new(1_001).unwrap().hash("pw", Some("s"));
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn zero_iterations_is_a_configuration_error() {
        assert!(matches!(
            PasswordHasher::new(0),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn temporary_passwords_are_random_and_long_enough() {
        let a = generate_temporary_password();
        assert_eq!(a.len(), 12);
        assert_ne!(a, generate_temporary_password());
    }

    #[test]
    fn digest_debug_hides_material() {
        let digest = fast().hash("pw", None);
        let dbg = format!("{digest:?}");
        assert!(!dbg.contains(&digest.hash));
    }
}
