use crate::error::GeneratorError;
use crate::Generator;
use rand::Rng;
use shorturl_core::shortkey::MAX_LENGTH;
use shorturl_core::ShortKey;

/// Symbols a generated key is drawn from: `[a-zA-Z]`.
pub const ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Generates keys of a fixed length drawn uniformly from [`ALPHABET`].
///
/// Uses the thread-local RNG, so concurrent callers need no coordination.
/// Not suitable where keys must be unguessable.
#[derive(Debug, Clone, Copy)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    pub fn new(length: usize) -> Result<Self, GeneratorError> {
        if length == 0 || length > MAX_LENGTH {
            return Err(GeneratorError::InvalidLength {
                length,
                max: MAX_LENGTH,
            });
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_KEY_LENGTH,
        }
    }
}

impl Generator for RandomGenerator {
    type Output = ShortKey;

    fn generate(&self) -> ShortKey {
        let mut rng = rand::thread_rng();
        let key: String = (0..self.length)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        ShortKey::new_unchecked(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_exact_length() {
        for length in [1, 8, 32] {
            let generator = RandomGenerator::new(length).unwrap();
            assert_eq!(generator.generate().as_str().len(), length);
        }
    }

    #[test]
    fn uses_only_ascii_letters() {
        let generator = RandomGenerator::default();
        for _ in 0..200 {
            let key = generator.generate();
            assert!(key.as_str().chars().all(|c| c.is_ascii_alphabetic()));
        }
    }

    #[test]
    fn generated_keys_pass_validation() {
        let generator = RandomGenerator::default();
        let key = generator.generate();
        assert!(ShortKey::new(key.as_str()).is_ok());
    }

    #[test]
    fn rejects_zero_and_oversized_length() {
        assert_eq!(
            RandomGenerator::new(0).unwrap_err(),
            GeneratorError::InvalidLength {
                length: 0,
                max: MAX_LENGTH
            }
        );
        assert!(RandomGenerator::new(MAX_LENGTH + 1).is_err());
    }

    #[test]
    fn covers_both_cases_over_many_draws() {
        let generator = RandomGenerator::new(64).unwrap();
        let seen: HashSet<char> = (0..50)
            .flat_map(|_| generator.generate().as_str().chars().collect::<Vec<_>>())
            .collect();
        assert!(seen.iter().any(|c| c.is_ascii_lowercase()));
        assert!(seen.iter().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomGenerator>();
    }
}
