// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{Result, StoreError};

const KEY_LEN: usize = 32;
/// AES-GCM standard 96-bit nonce, generated fresh from OS randomness per call.
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Wire form of an encrypted payload. All fields hex-encoded; the tag is
/// kept separate so tampering with either part is detectable and testable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
}

/// AES-256-GCM over JSON-serializable payloads.
///
/// The key lives in memory for the process lifetime only; it is never
/// persisted and never logged. Supplying the same key to multiple instances
/// (`from_key` / `from_hex_key`) lets them share encrypted data.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Create a cipher with a random per-process key.
    pub fn new() -> Self {
        let mut key_bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key_bytes);
        Self::from_key(&key_bytes)
    }

    pub fn from_key(key_bytes: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| StoreError::Configuration(format!("Encryption key is not hex: {}", e)))?;
        let key_bytes: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::Configuration(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::from_key(&key_bytes))
    }

    /// Serialize and encrypt `data`, returning the envelope as a string.
    pub fn encrypt<T: Serialize>(&self, data: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(data)
            .map_err(|e| StoreError::Encryption(format!("Payload not serializable: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::Encryption("AES-GCM encryption failed".to_string()))?;
        let (ciphertext, auth_tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let envelope = EncryptionEnvelope {
            iv: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
            auth_tag: hex::encode(auth_tag),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| StoreError::Encryption(format!("Envelope serialization failed: {}", e)))
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: tag mismatch, malformed envelope fields, or a payload
    /// that does not deserialize all surface as `Decryption` errors; partial
    /// data is never returned.
    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &str) -> Result<T> {
        let envelope: EncryptionEnvelope = serde_json::from_str(envelope)
            .map_err(|e| StoreError::Decryption(format!("Malformed envelope: {}", e)))?;

        let iv = hex::decode(&envelope.iv)
            .map_err(|e| StoreError::Decryption(format!("Invalid iv encoding: {}", e)))?;
        let ciphertext = hex::decode(&envelope.ciphertext)
            .map_err(|e| StoreError::Decryption(format!("Invalid ciphertext encoding: {}", e)))?;
        let auth_tag = hex::decode(&envelope.auth_tag)
            .map_err(|e| StoreError::Decryption(format!("Invalid auth tag encoding: {}", e)))?;

        if iv.len() != NONCE_LEN {
            return Err(StoreError::Decryption(format!(
                "iv must be {} bytes, got {}",
                NONCE_LEN,
                iv.len()
            )));
        }
        if auth_tag.len() != TAG_LEN {
            return Err(StoreError::Decryption(format!(
                "auth tag must be {} bytes, got {}",
                TAG_LEN,
                auth_tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&auth_tag);
        let nonce = Nonce::from_slice(&iv);

        let plaintext = self
            .cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| StoreError::Decryption("Authentication tag mismatch".to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|e| {
            StoreError::Decryption(format!("Decrypted payload is not valid JSON: {}", e))
        })
    }
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let cipher = Cipher::new();
        let payload = json!({"name": "Jane", "roles": ["admin"], "quota": 42});
        let sealed = cipher.encrypt(&payload).unwrap();
        let opened: serde_json::Value = cipher.decrypt(&sealed).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = Cipher::new();
        let payload = json!({"a": 1});
        let first: EncryptionEnvelope =
            serde_json::from_str(&cipher.encrypt(&payload).unwrap()).unwrap();
        let second: EncryptionEnvelope =
            serde_json::from_str(&cipher.encrypt(&payload).unwrap()).unwrap();
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let cipher = Cipher::new();
        let sealed = cipher.encrypt(&json!({"balance": 100})).unwrap();
        let mut envelope: EncryptionEnvelope = serde_json::from_str(&sealed).unwrap();

        // Flip one bit in the first ciphertext byte.
        let mut bytes = hex::decode(&envelope.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        envelope.ciphertext = hex::encode(bytes);

        let tampered = serde_json::to_string(&envelope).unwrap();
        let result: Result<serde_json::Value> = cipher.decrypt(&tampered);
        assert!(matches!(result, Err(StoreError::Decryption(_))));
    }

    #[test]
    fn test_tampered_auth_tag_fails_closed() {
        let cipher = Cipher::new();
        let sealed = cipher.encrypt(&json!({"balance": 100})).unwrap();
        let mut envelope: EncryptionEnvelope = serde_json::from_str(&sealed).unwrap();

        let mut bytes = hex::decode(&envelope.auth_tag).unwrap();
        bytes[TAG_LEN - 1] ^= 0x80;
        envelope.auth_tag = hex::encode(bytes);

        let tampered = serde_json::to_string(&envelope).unwrap();
        let result: Result<serde_json::Value> = cipher.decrypt(&tampered);
        assert!(matches!(result, Err(StoreError::Decryption(_))));
    }

    #[test]
    fn test_malformed_envelope_rejected() {
        let cipher = Cipher::new();
        let result: Result<serde_json::Value> = cipher.decrypt("not an envelope");
        assert!(matches!(result, Err(StoreError::Decryption(_))));
    }

    #[test]
    fn test_wrong_key_cannot_decrypt() {
        let sealed = Cipher::new().encrypt(&json!({"secret": true})).unwrap();
        let other = Cipher::new();
        let result: Result<serde_json::Value> = other.decrypt(&sealed);
        assert!(matches!(result, Err(StoreError::Decryption(_))));
    }

    #[test]
    fn test_shared_key_across_instances() {
        let key = "a3f1".repeat(16);
        let writer = Cipher::from_hex_key(&key).unwrap();
        let reader = Cipher::from_hex_key(&key).unwrap();
        let sealed = writer.encrypt(&json!({"shared": "state"})).unwrap();
        let opened: serde_json::Value = reader.decrypt(&sealed).unwrap();
        assert_eq!(opened, json!({"shared": "state"}));
    }

    #[test]
    fn test_bad_hex_key_rejected() {
        assert!(Cipher::from_hex_key("zz").is_err());
        assert!(Cipher::from_hex_key("aabb").is_err());
    }
}
