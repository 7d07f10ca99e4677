use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Default credential length used by all recipes.
pub const DEFAULT_LENGTH: usize = 8;

/// Generate a random alphanumeric password of the given length.
///
/// Characters are drawn uniformly from `[A-Za-z0-9]` using the operating
/// system's entropy source. The result is shown exactly once, in the final
/// JSON report; it is never logged.
pub fn generate(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_alphabet() {
        for len in [1, 8, 32] {
            let password = generate(len);
            assert_eq!(password.len(), len);
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_successive_calls_differ() {
        // 62^32 possibilities; a collision here means the RNG is broken.
        assert_ne!(generate(32), generate(32));
    }

    #[test]
    fn test_zero_length() {
        assert_eq!(generate(0), "");
    }
}
