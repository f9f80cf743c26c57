//! AES-256-GCM secret codec.
//!
//! Tokens are `base64(nonce || ciphertext)` with a fresh 96-bit nonce per
//! seal, so sealing the same plaintext twice yields different tokens.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use warden_types::config::CodecConfig;
use warden_types::{Result, SealedSecret, SecretCodec, WardenError};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// [`SecretCodec`] backed by AES-256-GCM.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Codec using a raw 32-byte key.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Codec from key text.
    ///
    /// Text that decodes as base64 to exactly 32 bytes is used as the key;
    /// anything else is treated as a passphrase and hashed with SHA-256.
    pub fn from_key_text(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WardenError::Codec("empty key material".to_string()));
        }

        let key = match B64.decode(text) {
            Ok(bytes) if bytes.len() == KEY_LEN => {
                let bytes = Zeroizing::new(bytes);
                let mut key = Zeroizing::new([0u8; KEY_LEN]);
                key.copy_from_slice(&bytes);
                key
            }
            _ => {
                let digest = Sha256::digest(text.as_bytes());
                let mut key = Zeroizing::new([0u8; KEY_LEN]);
                key.copy_from_slice(&digest);
                key
            }
        };

        Ok(Self::new(&key))
    }

    /// Codec from configuration.
    ///
    /// Key sources in order: `codec.key`, the `codec.key_env` environment
    /// variable, then `fallback_key_file`, which is created with a random
    /// key if it does not exist yet.
    pub fn from_config(config: &CodecConfig, fallback_key_file: &Path) -> Result<Self> {
        if let Some(key) = &config.key {
            tracing::debug!("Using codec key from configuration");
            return Self::from_key_text(key);
        }

        if let Ok(key) = std::env::var(&config.key_env) {
            tracing::debug!(env = %config.key_env, "Using codec key from environment");
            let key = Zeroizing::new(key);
            return Self::from_key_text(&key);
        }

        Self::from_key_file(fallback_key_file)
    }

    /// Codec from a base64 key file, generating one if missing.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = Zeroizing::new(fs::read_to_string(path)?);
            let bytes = Zeroizing::new(B64.decode(raw.trim()).map_err(|e| {
                WardenError::Codec(format!("Key file {:?} is not base64: {}", path, e))
            })?);
            if bytes.len() != KEY_LEN {
                return Err(WardenError::Codec(format!(
                    "Key file {:?} has wrong length: {} (expected {})",
                    path,
                    bytes.len(),
                    KEY_LEN
                )));
            }
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&bytes);
            return Ok(Self::new(&key));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let encoded = Zeroizing::new(B64.encode(&key[..]));
        fs::write(path, encoded.as_bytes())?;
        restrict_permissions(path)?;

        tracing::warn!(path = ?path, "Generated new codec key file");
        Ok(Self::new(&key))
    }

    /// Generate a random base64 key suitable for `codec.key`.
    pub fn generate_key_text() -> String {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        B64.encode(&key[..])
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

impl SecretCodec for AesGcmCodec {
    fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| WardenError::Codec("encryption failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);

        Ok(SealedSecret::from_token(B64.encode(token)))
    }

    fn reveal(&self, token: &SealedSecret) -> Result<Zeroizing<Vec<u8>>> {
        let raw = B64
            .decode(token.as_token())
            .map_err(|e| WardenError::Codec(format!("malformed token: {}", e)))?;

        if raw.len() <= NONCE_LEN {
            return Err(WardenError::Codec(format!(
                "token too short: {} bytes",
                raw.len()
            )));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| WardenError::Codec("decryption failed (wrong key or tampered token)".to_string()))?;

        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use warden_types::SecretMaterial;

    fn codec() -> AesGcmCodec {
        AesGcmCodec::new(&[7u8; KEY_LEN])
    }

    #[test]
    fn test_seal_reveal() {
        let codec = codec();
        let token = codec.seal(b"hunter2").unwrap();
        assert!(!token.as_token().contains("hunter2"));
        assert_eq!(codec.reveal(&token).unwrap().as_slice(), b"hunter2");
    }

    #[test]
    fn test_unique_nonces() {
        let codec = codec();
        let a = codec.seal(b"same input").unwrap();
        let b = codec.seal(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_token_fails_without_leaking() {
        let codec = codec();
        let token = codec.seal(b"top-secret-value").unwrap();
        let mut bytes = B64.decode(token.as_token()).unwrap();
        if let Some(b) = bytes.last_mut() {
            *b ^= 0xFF;
        }
        let tampered = SealedSecret::from_token(B64.encode(bytes));

        let err = codec.reveal(&tampered).unwrap_err();
        assert!(matches!(err, WardenError::Codec(_)));
        assert!(!err.to_string().contains("top-secret-value"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let token = codec().seal(b"data").unwrap();
        let other = AesGcmCodec::new(&[8u8; KEY_LEN]);
        assert!(other.reveal(&token).is_err());
    }

    #[test]
    fn test_short_and_malformed_tokens() {
        let codec = codec();
        assert!(codec.reveal(&SealedSecret::from_token("!!!")).is_err());
        assert!(codec.reveal(&SealedSecret::from_token(B64.encode([0u8; 4]))).is_err());
    }

    #[test]
    fn test_material_round_trip() {
        let codec = codec();
        let material = SecretMaterial::new(Some("pw".into()), Some("ssh-ed25519 AAAA".into()), None);
        let token = codec.seal_material(&material).unwrap();
        assert_eq!(codec.reveal_material(&token).unwrap(), material);
    }

    #[test]
    fn test_key_text_forms() {
        let base64_key = AesGcmCodec::generate_key_text();
        let a = AesGcmCodec::from_key_text(&base64_key).unwrap();
        let b = AesGcmCodec::from_key_text(&base64_key).unwrap();
        let token = a.seal(b"x").unwrap();
        assert_eq!(b.reveal(&token).unwrap().as_slice(), b"x");

        let p1 = AesGcmCodec::from_key_text("correct horse battery staple").unwrap();
        let p2 = AesGcmCodec::from_key_text("correct horse battery staple").unwrap();
        let token = p1.seal(b"y").unwrap();
        assert_eq!(p2.reveal(&token).unwrap().as_slice(), b"y");

        assert!(AesGcmCodec::from_key_text("   ").is_err());
    }

    #[test]
    fn test_key_file_created_then_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("master.key");

        let first = AesGcmCodec::from_key_file(&path).unwrap();
        assert!(path.exists());
        let token = first.seal(b"persisted").unwrap();

        let second = AesGcmCodec::from_key_file(&path).unwrap();
        assert_eq!(second.reveal(&token).unwrap().as_slice(), b"persisted");
    }

    #[test]
    fn test_config_key_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let key = AesGcmCodec::generate_key_text();
        let config = CodecConfig {
            key: Some(key.clone()),
            key_env: "WARDEN_TEST_UNSET_KEY_VAR".to_string(),
        };
        let codec = AesGcmCodec::from_config(&config, &dir.path().join("master.key")).unwrap();
        assert!(!dir.path().join("master.key").exists());

        let token = codec.seal(b"z").unwrap();
        let direct = AesGcmCodec::from_key_text(&key).unwrap();
        assert_eq!(direct.reveal(&token).unwrap().as_slice(), b"z");
    }

    proptest! {
        #[test]
        fn prop_reveal_inverts_seal(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let codec = codec();
            let token = codec.seal(&data).unwrap();
            let revealed = codec.reveal(&token).unwrap();
            prop_assert_eq!(revealed.as_slice(), data.as_slice());
        }
    }
}
