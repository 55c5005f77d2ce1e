//! Random token and code generation helpers.

use rand::Rng;
use subtle::ConstantTimeEq;

/// Generate an opaque random token of `n_bytes` entropy, hex-encoded.
pub fn random_token_hex(n_bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..n_bytes).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Generate a fixed-length numeric code (phone OTP).
pub fn random_numeric_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

/// Constant-time string comparison for code/hash checks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_length_and_varies() {
        let a = random_token_hex(32);
        let b = random_token_hex(32);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn numeric_code_is_digits_only() {
        let code = random_numeric_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
