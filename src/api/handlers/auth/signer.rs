//! HMAC-SHA256 signing of session payloads.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

/// Produces and verifies base64url (unpadded) HMAC-SHA256 tags with the
/// process-wide signing key.
#[derive(Clone)]
pub struct Signer {
    // Keyed once; cloned per tag so the raw key is not kept around.
    mac: HmacSha256,
}

impl Signer {
    /// Build a signer from raw key bytes.
    ///
    /// # Errors
    /// Returns `ConfigError::SigningKeyTooShort` when the key has fewer than
    /// [`MIN_KEY_LEN`] bytes.
    pub fn new(key: &[u8]) -> Result<Self, ConfigError> {
        if key.len() < MIN_KEY_LEN {
            return Err(ConfigError::SigningKeyTooShort(key.len()));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|_| ConfigError::SigningKeyTooShort(key.len()))?;
        Ok(Self { mac })
    }

    #[must_use]
    pub fn sign(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }

    /// Recompute the tag over `bytes` and compare it to `tag` in constant time.
    #[must_use]
    pub fn verify(&self, bytes: &[u8], tag: &str) -> bool {
        let expected = self.sign(bytes);
        let expected = expected.as_bytes();
        let tag = tag.as_bytes();
        if expected.len() != tag.len() {
            // Tag length is public (always 43 chars), nothing to hide here.
            return false;
        }
        expected.ct_eq(tag).into()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"***").finish()
    }
}
