//! Candidate password generation.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use warden_types::{bail, Result, SecretMaterial};
use zeroize::Zeroizing;

const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
// No quotes, backslash or `$` so the value survives shell and module quoting.
const SYMBOLS: &[u8] = b"!#%*+,-./:=?@^_~";

/// Minimum accepted password length.
pub const MIN_LENGTH: usize = 8;

/// Generates random passwords from the OS RNG.
///
/// Every password contains at least one lowercase letter, uppercase letter,
/// digit and symbol. Look-alike characters (`0`, `O`, `1`, `l`, `I`) are
/// excluded.
#[derive(Debug, Clone, Copy)]
pub struct PasswordGenerator {
    length: usize,
}

impl PasswordGenerator {
    /// Generator for passwords of `length` characters.
    pub fn new(length: usize) -> Result<Self> {
        if length < MIN_LENGTH {
            bail!(
                Config,
                "password length must be at least {} (got {})",
                MIN_LENGTH,
                length
            );
        }
        Ok(Self { length })
    }

    /// Configured length.
    pub fn length(&self) -> usize {
        self.length
    }

    /// A fresh password.
    pub fn generate(&self) -> Zeroizing<String> {
        let mut rng = OsRng;
        let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
        let all: Vec<u8> = classes.concat();

        let mut bytes = Zeroizing::new(Vec::with_capacity(self.length));
        for class in classes {
            bytes.push(class[rng.gen_range(0..class.len())]);
        }
        while bytes.len() < self.length {
            bytes.push(all[rng.gen_range(0..all.len())]);
        }
        bytes.shuffle(&mut rng);

        Zeroizing::new(bytes.iter().map(|&b| b as char).collect())
    }

    /// A fresh password wrapped as secret material.
    pub fn generate_material(&self) -> SecretMaterial {
        let password = self.generate();
        SecretMaterial::from_password(password.as_str())
    }
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self { length: 24 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_length_and_classes() {
        let generator = PasswordGenerator::new(16).unwrap();
        for _ in 0..50 {
            let pw = generator.generate();
            assert_eq!(pw.len(), 16);
            assert!(pw.bytes().any(|b| LOWER.contains(&b)));
            assert!(pw.bytes().any(|b| UPPER.contains(&b)));
            assert!(pw.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pw.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn test_rejects_short_length() {
        assert!(PasswordGenerator::new(4).is_err());
        assert!(PasswordGenerator::new(MIN_LENGTH).is_ok());
    }

    #[test]
    fn test_never_repeats() {
        let generator = PasswordGenerator::default();
        let seen: HashSet<String> = (0..500).map(|_| generator.generate().to_string()).collect();
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn test_material_carries_password_only() {
        let material = PasswordGenerator::default().generate_material();
        assert_eq!(material.password().map(str::len), Some(24));
        assert!(material.public_key().is_none());
    }
}
