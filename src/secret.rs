//! The secret manager (C11): cryptographically strong password generation
//! by rejection sampling, so the alphanumeric alphabet is sampled without
//! modulo bias (§8, tested property 10).

use rand::RngCore;

/// The 62-character alphanumeric alphabet every generated password draws
/// from.
pub const ALPHABET: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// The default password length used when a secret spec doesn't override it.
pub const DEFAULT_LENGTH: usize = 32;

/// A single secret this service needs provisioned: the name suffix appended
/// to `<service>-`, and the password length to generate.
#[derive(Debug, Clone)]
pub struct SecretSpec {
    pub name: String,
    pub length: usize,
}

impl SecretSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: DEFAULT_LENGTH,
        }
    }

    #[must_use]
    pub fn with_length(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Generate a cryptographically strong password of `length` characters
/// drawn uniformly from [`ALPHABET`].
///
/// Uses rejection sampling: a random byte is only accepted if it falls
/// below the largest multiple of 62 that fits in a `u8` (`62 * 4 = 248`),
/// so every character of the alphabet has exactly equal probability
/// regardless of the remainder `256 % 62` that a naive `byte % 62` would
/// introduce bias from.
#[must_use]
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let limit = ALPHABET.len() * (256 / ALPHABET.len());
    let mut password = String::with_capacity(length);
    let mut buf = [0u8; 1];

    while password.len() < length {
        rng.fill_bytes(&mut buf);
        let byte = buf[0];
        if (byte as usize) < limit {
            password.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
        }
    }

    password
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_length() {
        assert_eq!(generate_password(32).len(), 32);
        assert_eq!(generate_password(0).len(), 0);
        assert_eq!(generate_password(64).len(), 64);
    }

    #[test]
    fn every_character_is_from_the_alphabet() {
        let password = generate_password(256);
        let alphabet: Vec<u8> = ALPHABET.to_vec();
        assert!(password.bytes().all(|b| alphabet.contains(&b)));
    }

    #[test]
    fn passwords_are_not_trivially_repeated() {
        let a = generate_password(32);
        let b = generate_password(32);
        assert_ne!(a, b);
    }

    #[test]
    fn rejection_sampling_threshold_discards_the_biased_tail() {
        // 256 isn't a multiple of 62; the highest multiple that fits is
        // 62 * 4 = 248, so bytes 248..=255 must be rejected rather than
        // wrapped, which is what would introduce modulo bias.
        let limit = ALPHABET.len() * (256 / ALPHABET.len());
        assert_eq!(limit, 248);
    }
}
