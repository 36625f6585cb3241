//! Field-level encryption
//!
//! Sensitive text columns are sealed with AES-256-GCM under one process-wide
//! key. Tokens are URL-safe base64 of:
//!
//! ```text
//! version (1) | issued_at unix millis, big endian (8) | nonce (12) | ciphertext + tag
//! ```
//!
//! The 21 byte header is bound as associated data, so neither the version nor
//! the timestamp can be altered without failing authentication.

use crate::clock::{system_clock, SharedClock};
use crate::config::EncryptionConfig;
use crate::errors::{AppError, Result};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

const TOKEN_VERSION: u8 = 0x80;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + 8 + NONCE_LEN;
const TAG_LEN: usize = 16;
const MAX_CLOCK_SKEW_MS: i64 = 60_000;

static FIELD_CIPHER: OnceLock<FieldCipher> = OnceLock::new();

/// Symmetric authenticated cipher for sealed fields
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
    clock: SharedClock,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Build from raw key bytes
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(AppError::Configuration {
                message: format!("encryption key must be {} bytes, got {}", KEY_LEN, key.len()),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AppError::Configuration {
            message: "encryption key rejected".to_string(),
        })?;

        Ok(Self {
            cipher,
            clock: system_clock(),
        })
    }

    /// Build from the URL-safe base64 form used in configuration
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let raw = URL_SAFE
            .decode(key.trim().as_bytes())
            .map_err(|e| AppError::Configuration {
                message: format!("encryption key is not valid base64: {}", e),
            })?;
        Self::new(&raw)
    }

    /// Build from configuration; a missing key is fatal
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        let key = config
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "encryption.key is not set".to_string(),
            })?;
        Self::from_base64_key(key)
    }

    /// Replace the time source used for `issued_at` and age checks
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let issued_at = self.clock.now().timestamp_millis().max(0) as u64;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let mut token = Vec::with_capacity(HEADER_LEN + plaintext.len() + TAG_LEN);
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&issued_at.to_be_bytes());
        token.extend_from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &token[..HEADER_LEN],
                },
            )
            .map_err(|_| AppError::Internal {
                message: "field encryption failed".to_string(),
            })?;
        token.extend_from_slice(&sealed);

        Ok(URL_SAFE.encode(token))
    }

    /// Open a token; `max_age` bounds how old the token may be
    pub fn decrypt(&self, token: &str, max_age: Option<Duration>) -> Result<String> {
        let raw = URL_SAFE
            .decode(token.trim().as_bytes())
            .map_err(|_| AppError::InvalidToken)?;

        if raw.len() < HEADER_LEN + TAG_LEN || raw[0] != TOKEN_VERSION {
            return Err(AppError::InvalidToken);
        }

        let (header, sealed) = raw.split_at(HEADER_LEN);
        let mut issued_at = [0u8; 8];
        issued_at.copy_from_slice(&header[1..9]);
        let issued_at = u64::from_be_bytes(issued_at) as i64;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&header[9..HEADER_LEN]),
                Payload {
                    msg: sealed,
                    aad: header,
                },
            )
            .map_err(|_| AppError::InvalidToken)?;

        let now = self.clock.now().timestamp_millis();
        if issued_at > now + MAX_CLOCK_SKEW_MS {
            return Err(AppError::InvalidToken);
        }

        if let Some(max_age) = max_age {
            let age = now - issued_at;
            if age > i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX) {
                return Err(AppError::ExpiredToken);
            }
        }

        String::from_utf8(plaintext).map_err(|_| AppError::InvalidToken)
    }
}

/// Generate a fresh key in the configuration format
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    URL_SAFE.encode(key)
}

/// Install the process-wide cipher used by [`EncryptedText`]
///
/// Must be called once at startup, before any sealed field is read or written.
pub fn install_field_cipher(cipher: FieldCipher) -> Result<()> {
    FIELD_CIPHER.set(cipher).map_err(|_| AppError::Configuration {
        message: "field cipher already installed".to_string(),
    })
}

/// The installed process-wide cipher
pub fn field_cipher() -> Result<&'static FieldCipher> {
    FIELD_CIPHER.get().ok_or_else(|| AppError::Configuration {
        message: "field cipher not installed".to_string(),
    })
}

#[cfg(test)]
pub(crate) fn install_test_cipher() -> &'static FieldCipher {
    FIELD_CIPHER.get_or_init(|| FieldCipher::new(&[7u8; KEY_LEN]).expect("test key"))
}

/// A text value stored encrypted at rest
///
/// Serializes to a token and deserializes by decrypting with the installed
/// cipher. A token that cannot be opened still deserializes: the failure is
/// reported by [`EncryptedText::reveal`] and the original token is written
/// back unchanged, so the surrounding record stays usable.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedText {
    state: Sealed,
}

#[derive(Clone, PartialEq, Eq)]
enum Sealed {
    Open(String),
    Unreadable { token: String, fault: Fault },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
    Invalid,
    NoCipher,
}

impl EncryptedText {
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self {
            state: Sealed::Open(plaintext.into()),
        }
    }

    /// The plaintext, or the reason it could not be decrypted
    pub fn reveal(&self) -> Result<&str> {
        match &self.state {
            Sealed::Open(plaintext) => Ok(plaintext),
            Sealed::Unreadable { fault, .. } => Err(match fault {
                Fault::Invalid => AppError::InvalidToken,
                Fault::NoCipher => AppError::Configuration {
                    message: "field cipher not installed".to_string(),
                },
            }),
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.state, Sealed::Open(_))
    }

    fn open(token: String) -> Self {
        let state = match field_cipher() {
            Ok(cipher) => match cipher.decrypt(&token, None) {
                Ok(plaintext) => Sealed::Open(plaintext),
                Err(_) => Sealed::Unreadable {
                    token,
                    fault: Fault::Invalid,
                },
            },
            Err(_) => Sealed::Unreadable {
                token,
                fault: Fault::NoCipher,
            },
        };
        Self { state }
    }
}

impl From<&str> for EncryptedText {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EncryptedText {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for EncryptedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedText(***)")
    }
}

impl Serialize for EncryptedText {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.state {
            Sealed::Open(plaintext) => {
                let token = field_cipher()
                    .and_then(|cipher| cipher.encrypt(plaintext))
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&token)
            }
            Sealed::Unreadable { token, .. } => serializer.serialize_str(token),
        }
    }
}

impl<'de> Deserialize<'de> for EncryptedText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(EncryptedText::open(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&[42u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        for text in [
            "Hello, World!",
            "Lorem ipsum dolor sit amet, consectetur adipiscing elit.",
            "👋🌍",
            "Μητις",
            "",
        ] {
            let token = cipher.encrypt(text).unwrap();
            assert_ne!(token, text);
            assert_eq!(cipher.decrypt(&token, None).unwrap(), text);
        }
    }

    #[test]
    fn test_same_plaintext_gives_distinct_tokens() {
        let cipher = cipher();
        assert_ne!(cipher.encrypt("x").unwrap(), cipher.encrypt("x").unwrap());
    }

    #[test]
    fn test_zero_max_age_expires_after_delay() {
        let clock = ManualClock::new(chrono::Utc::now());
        let cipher = cipher().with_clock(Arc::new(clock.clone()));

        let token = cipher.encrypt("secret").unwrap();
        assert_eq!(cipher.decrypt(&token, Some(Duration::ZERO)).unwrap(), "secret");

        clock.advance(chrono::Duration::milliseconds(5));
        let err = cipher.decrypt(&token, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, AppError::ExpiredToken));

        // Without a bound the token is still readable
        assert_eq!(cipher.decrypt(&token, None).unwrap(), "secret");
    }

    #[test]
    fn test_max_age_window() {
        let clock = ManualClock::new(chrono::Utc::now());
        let cipher = cipher().with_clock(Arc::new(clock.clone()));
        let token = cipher.encrypt("secret").unwrap();

        clock.advance(chrono::Duration::seconds(30));
        assert!(cipher.decrypt(&token, Some(Duration::from_secs(60))).is_ok());

        clock.advance(chrono::Duration::seconds(31));
        assert!(matches!(
            cipher.decrypt(&token, Some(Duration::from_secs(60))),
            Err(AppError::ExpiredToken)
        ));
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let cipher = cipher();
        let token = cipher.encrypt("secret").unwrap();
        let mut raw = URL_SAFE.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE.encode(&raw);

        assert!(matches!(cipher.decrypt(&tampered, None), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_rewritten_timestamp_is_invalid() {
        let cipher = cipher();
        let token = cipher.encrypt("secret").unwrap();
        let mut raw = URL_SAFE.decode(&token).unwrap();
        raw[8] ^= 0x01;
        let rewritten = URL_SAFE.encode(&raw);

        assert!(matches!(cipher.decrypt(&rewritten, None), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_malformed_tokens_are_invalid() {
        let cipher = cipher();
        let zeroed = URL_SAFE.encode([0u8; 40]);
        for token in ["", "not base64 !!", "gAAAAA==", zeroed.as_str()] {
            assert!(matches!(cipher.decrypt(token, None), Err(AppError::InvalidToken)));
        }
    }

    #[test]
    fn test_wrong_key_is_invalid() {
        let token = cipher().encrypt("secret").unwrap();
        let other = FieldCipher::new(&[1u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&token, None), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_future_token_is_invalid() {
        let start = chrono::Utc::now();
        let issuer = cipher().with_clock(Arc::new(ManualClock::new(
            start + chrono::Duration::minutes(5),
        )));
        let token = issuer.encrypt("secret").unwrap();

        let reader = cipher().with_clock(Arc::new(ManualClock::new(start)));
        assert!(matches!(reader.decrypt(&token, None), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = FieldCipher::from_config(&EncryptionConfig { key: None }).unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));

        let err = FieldCipher::from_base64_key("c2hvcnQ=").unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_huge_max_age_never_expires() {
        let cipher = FieldCipher::new(&[3u8; KEY_LEN]).unwrap();
        let token = cipher.encrypt("still here").unwrap();
        assert_eq!(cipher.decrypt(&token, Some(Duration::MAX)).unwrap(), "still here");
    }

    #[test]
    fn test_generated_key_is_loadable() {
        let key = generate_key();
        let cipher = FieldCipher::from_config(&EncryptionConfig { key: Some(key) }).unwrap();
        let token = cipher.encrypt("ok").unwrap();
        assert_eq!(cipher.decrypt(&token, None).unwrap(), "ok");
    }

    #[test]
    fn test_encrypted_text_serde() {
        install_test_cipher();

        let field = EncryptedText::new("Student requested a different ward");
        let stored = serde_json::to_value(&field).unwrap();
        let token = stored.as_str().unwrap();
        assert!(!token.contains("ward"));

        let loaded: EncryptedText = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(loaded.reveal().unwrap(), "Student requested a different ward");
        assert_eq!(format!("{:?}", loaded), "EncryptedText(***)");
    }

    #[test]
    fn test_unreadable_field_keeps_record_usable() {
        install_test_cipher();

        let loaded: EncryptedText = serde_json::from_value(serde_json::json!("garbage")).unwrap();
        assert!(!loaded.is_readable());
        assert!(matches!(loaded.reveal(), Err(AppError::InvalidToken)));

        // Written back untouched
        assert_eq!(serde_json::to_value(&loaded).unwrap(), serde_json::json!("garbage"));
    }
}
