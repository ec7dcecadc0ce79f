//! Credential vault (C1): encrypts sensitive plugin-config fields at rest.
//!
//! Grounded on `src/utils/encryption.py` and `src/plugins/encryption.py` of
//! the source system, reimplemented with the RustCrypto stack instead of
//! Fernet: PBKDF2-HMAC-SHA256 (100k iterations, fixed salt) derives a
//! 256-bit key, AES-256-GCM with a random 96-bit nonce does the sealing.
//! The `__encrypted__:` marker and the per-plugin-type sensitive-field
//! registry are preserved so the wire format stays explainable.

mod error;
mod registry;

pub use error::{Result, VaultError};
pub use registry::{register_sensitive_fields, sensitive_fields_for};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;

const ENCRYPTED_MARKER: &str = "__encrypted__:";
const KEY_SALT: &[u8] = b"auris_encryption_salt_v1";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Encrypts/decrypts sensitive plugin config fields. Holds no secret key
/// material unless one was configured; in that case every vault instance
/// derives the same key from the same passphrase, so multiple `Vault`
/// values backed by the same key are interchangeable.
pub struct Vault {
    cipher: Option<Aes256Gcm>,
}

impl Vault {
    /// Builds a vault from a raw passphrase. `None` disables encryption:
    /// fields pass through as plaintext with a warning logged, matching
    /// the source system's "encryption optional in development" stance.
    pub fn new(key: Option<&str>) -> Self {
        let cipher = key.map(derive_cipher);
        if cipher.is_none() {
            tracing::warn!(
                "vault encryption key not set - storing plugin credentials in plaintext"
            );
        }
        Self { cipher }
    }

    /// Convenience constructor mirroring the source's env lookup order:
    /// `ENCRYPTION_KEY`, falling back to `PLUGIN_ENCRYPTION_KEY`.
    pub fn from_config(encryption_key: Option<&str>, plugin_encryption_key: Option<&str>) -> Self {
        Self::new(encryption_key.or(plugin_encryption_key))
    }

    pub fn is_configured(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypts a single field value. Already-encrypted values (carrying
    /// the marker) pass through unchanged to avoid double encryption.
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() || plaintext.starts_with(ENCRYPTED_MARKER) {
            return Ok(plaintext.to_string());
        }

        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_string());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{ENCRYPTED_MARKER}{}", BASE64.encode(payload)))
    }

    /// Decrypts a single field value. Values without the marker are
    /// assumed to be legacy (or never-encrypted) plaintext and returned
    /// as-is, matching the source's backward-compatibility behavior.
    pub fn decrypt_field(&self, value: &str) -> Result<String> {
        let Some(encoded) = value.strip_prefix(ENCRYPTED_MARKER) else {
            return Ok(value.to_string());
        };

        let Some(cipher) = &self.cipher else {
            return Ok(value.to_string());
        };

        let payload = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

        if payload.len() < NONCE_LEN {
            return Err(VaultError::DecryptionFailed(
                "ciphertext shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed("invalid token or wrong key".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| VaultError::DecryptionFailed(e.to_string()))
    }

    /// Encrypts the sensitive fields of a plugin config object in place,
    /// per the registry for `plugin_type`. Non-object configs and
    /// unregistered plugin types pass through unchanged.
    pub fn encrypt_config(&self, plugin_type: &str, config: &Value) -> Result<Value> {
        let Some(obj) = config.as_object() else {
            return Ok(config.clone());
        };
        let sensitive = sensitive_fields_for(plugin_type);
        if sensitive.is_empty() {
            return Ok(config.clone());
        }

        let mut out = obj.clone();
        for field in &sensitive {
            if let Some(Value::String(s)) = out.get(field) {
                if !s.is_empty() {
                    let encrypted = self.encrypt_field(s)?;
                    out.insert(field.clone(), Value::String(encrypted));
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Decrypts the sensitive fields of a plugin config object in place.
    pub fn decrypt_config(&self, plugin_type: &str, config: &Value) -> Result<Value> {
        let Some(obj) = config.as_object() else {
            return Ok(config.clone());
        };
        let sensitive = sensitive_fields_for(plugin_type);
        if sensitive.is_empty() {
            return Ok(config.clone());
        }

        let mut out = obj.clone();
        for field in &sensitive {
            if let Some(Value::String(s)) = out.get(field) {
                let decrypted = self.decrypt_field(s)?;
                out.insert(field.clone(), Value::String(decrypted));
            }
        }
        Ok(Value::Object(out))
    }
}

fn derive_cipher(passphrase: &str) -> Aes256Gcm {
    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), KEY_SALT, PBKDF2_ITERATIONS, &mut key_bytes);
    Aes256Gcm::new_from_slice(&key_bytes).expect("32-byte key is always valid for AES-256-GCM")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_field_through_encrypt_and_decrypt() {
        let vault = Vault::new(Some("test-passphrase"));
        let encrypted = vault.encrypt_field("super-secret-token").unwrap();
        assert!(encrypted.starts_with(ENCRYPTED_MARKER));
        let decrypted = vault.decrypt_field(&encrypted).unwrap();
        assert_eq!(decrypted, "super-secret-token");
    }

    #[test]
    fn without_a_key_fields_pass_through_as_plaintext() {
        let vault = Vault::new(None);
        let encrypted = vault.encrypt_field("plain").unwrap();
        assert_eq!(encrypted, "plain");
    }

    #[test]
    fn decrypting_legacy_plaintext_returns_it_unchanged() {
        let vault = Vault::new(Some("test-passphrase"));
        let decrypted = vault.decrypt_field("not-encrypted-value").unwrap();
        assert_eq!(decrypted, "not-encrypted-value");
    }

    #[test]
    fn double_encryption_is_a_no_op() {
        let vault = Vault::new(Some("test-passphrase"));
        let once = vault.encrypt_field("token").unwrap();
        let twice = vault.encrypt_field(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn decrypting_with_the_wrong_key_fails() {
        let sealed = Vault::new(Some("key-a")).encrypt_field("token").unwrap();
        let err = Vault::new(Some("key-b")).decrypt_field(&sealed).unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed(_)));
    }

    #[test]
    fn encrypt_config_only_touches_registered_sensitive_fields() {
        let vault = Vault::new(Some("test-passphrase"));
        let config = serde_json::json!({
            "enabled": true,
            "bot_token": "abc123",
            "channels": ["1", "2"],
        });
        let encrypted = vault.encrypt_config("discord", &config).unwrap();
        assert_eq!(encrypted["enabled"], serde_json::json!(true));
        assert_eq!(encrypted["channels"], config["channels"]);
        assert!(encrypted["bot_token"]
            .as_str()
            .unwrap()
            .starts_with(ENCRYPTED_MARKER));

        let decrypted = vault.decrypt_config("discord", &encrypted).unwrap();
        assert_eq!(decrypted["bot_token"], serde_json::json!("abc123"));
    }

    #[test]
    fn unregistered_plugin_type_passes_through_unchanged() {
        let vault = Vault::new(Some("test-passphrase"));
        let config = serde_json::json!({"foo": "bar"});
        let out = vault.encrypt_config("unknown_type", &config).unwrap();
        assert_eq!(out, config);
    }
}
