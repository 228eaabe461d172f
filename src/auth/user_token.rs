//! AES-256-GCM user tokens
//!
//! A token is the URL-safe, unpadded base64 form of
//! `version (1 byte) || nonce (12 bytes) || ciphertext`, where the plaintext is
//! the decimal user id. Tokens are safe to place in a path segment or a query
//! value without further encoding.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::errors::TokenError;
use crate::models::UserId;

/// AES-256-GCM nonce size (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

const KEY_SIZE: usize = 32;

/// Version byte prepended to every token; a key rotation bumps it
const TOKEN_VERSION: u8 = 0x01;

#[derive(Clone)]
pub struct UserTokenCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for UserTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokenCodec")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl UserTokenCodec {
    /// Codec over a 32-byte key
    pub fn new(key_bytes: &[u8]) -> Result<Self, TokenError> {
        if key_bytes.len() != KEY_SIZE {
            return Err(TokenError::Key(format!(
                "key must be exactly {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Codec over a 64-character hex key
    pub fn from_hex(hex_key: &str) -> Result<Self, TokenError> {
        let key_bytes = hex::decode(hex_key.trim()).map_err(|e| TokenError::Key(e.to_string()))?;
        Self::new(&key_bytes)
    }

    /// Codec over a fresh random key; its tokens die with the process
    pub fn ephemeral() -> Self {
        let mut key_bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key_bytes);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)),
        }
    }

    pub fn encode(&self, user: UserId) -> Result<String, TokenError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, user.0.to_string().as_bytes())
            .map_err(|_| TokenError::Authentication)?;

        let mut combined = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        combined.push(TOKEN_VERSION);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    pub fn decode(&self, token: &str) -> Result<UserId, TokenError> {
        let combined = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Encoding)?;
        if combined.len() <= 1 + NONCE_SIZE {
            return Err(TokenError::Truncated);
        }

        let version = combined[0];
        if version != TOKEN_VERSION {
            return Err(TokenError::Version(version));
        }

        let (nonce_bytes, ciphertext) = combined[1..].split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| TokenError::Authentication)?;

        std::str::from_utf8(&plaintext)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .map(UserId)
            .ok_or(TokenError::Payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encode_decode() {
        let codec = UserTokenCodec::from_hex(KEY).unwrap();
        let token = codec.encode(UserId(42)).unwrap();

        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(codec.decode(&token).unwrap(), UserId(42));
    }

    #[test]
    fn test_tokens_are_randomized() {
        let codec = UserTokenCodec::ephemeral();
        assert_ne!(codec.encode(UserId(1)).unwrap(), codec.encode(UserId(1)).unwrap());
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let token = UserTokenCodec::from_hex(KEY).unwrap().encode(UserId(5)).unwrap();
        let other = UserTokenCodec::ephemeral();
        assert!(matches!(other.decode(&token), Err(TokenError::Authentication)));
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = UserTokenCodec::from_hex(KEY).unwrap();
        assert!(matches!(codec.decode("!!!"), Err(TokenError::Encoding)));
        assert!(matches!(codec.decode("AQID"), Err(TokenError::Truncated)));

        let mut bytes = URL_SAFE_NO_PAD
            .decode(codec.encode(UserId(5)).unwrap())
            .unwrap();
        bytes[0] = 0x02;
        assert!(matches!(
            codec.decode(&URL_SAFE_NO_PAD.encode(bytes)),
            Err(TokenError::Version(2))
        ));
    }

    #[test]
    fn test_key_validation() {
        assert!(matches!(UserTokenCodec::from_hex("abcd"), Err(TokenError::Key(_))));
        assert!(matches!(UserTokenCodec::from_hex("zz"), Err(TokenError::Key(_))));
    }
}
