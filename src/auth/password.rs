use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Generate a temporary password for instructor accounts created by an
/// admin. Guarantees at least one character from each class.
pub fn generate_temp_password(length: usize) -> String {
    use rand::Rng;

    const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"0123456789";
    const SPECIAL: &[u8] = b"!@#$%^&*()_+-=";

    let length = length.max(12);
    let mut rng = rand::rng();
    let mut password = Vec::with_capacity(length);

    password.push(UPPERCASE[rng.random_range(0..UPPERCASE.len())]);
    password.push(LOWERCASE[rng.random_range(0..LOWERCASE.len())]);
    password.push(DIGITS[rng.random_range(0..DIGITS.len())]);
    password.push(SPECIAL[rng.random_range(0..SPECIAL.len())]);

    let all_chars: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, SPECIAL].concat();
    for _ in 4..length {
        password.push(all_chars[rng.random_range(0..all_chars.len())]);
    }

    // Shuffle so the guaranteed classes are not always the prefix.
    for i in (1..password.len()).rev() {
        let j = rng.random_range(0..=i);
        password.swap(i, j);
    }

    String::from_utf8(password).unwrap_or_else(|_| "Temp-Password-1!".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery staple").expect("hash failed");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery staple", &hash).expect("verify failed"));
        assert!(!verify_password("wrong password", &hash).expect("verify failed"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same input").expect("hash failed");
        let b = hash_password("same input").expect("hash failed");
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_temp_password_has_all_classes() {
        for _ in 0..10 {
            let pw = generate_temp_password(16);
            assert_eq!(pw.len(), 16);
            assert!(pw.chars().any(|c| c.is_ascii_uppercase()));
            assert!(pw.chars().any(|c| c.is_ascii_lowercase()));
            assert!(pw.chars().any(|c| c.is_ascii_digit()));
            assert!(pw.chars().any(|c| !c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_temp_password_enforces_minimum_length() {
        assert!(generate_temp_password(4).len() >= 12);
    }
}
