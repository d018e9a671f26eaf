//! # Disclosures
//!
//! A disclosure reveals one selectively-disclosable claim. It is the
//! base64url-encoded JSON array `[salt, name, value]` (object property) or
//! `[salt, value]` (array element). The disclosure digest, placed in the
//! credential body in place of the claim, is the base64url-encoded hash of
//! the *encoded* disclosure string.

use std::fmt;
use std::str::FromStr;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{InputError, IntegrityError, Result};
use crate::{ARRAY_ITEM_CLAIM, SD_ALG_CLAIM, SD_CLAIM};

/// Hash algorithm used to compute disclosure digests (the `_sd_alg` claim).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SdAlg {
    /// SHA-256 (the default when `_sd_alg` is absent).
    #[default]
    #[serde(rename = "sha-256")]
    Sha256,

    /// SHA-384.
    #[serde(rename = "sha-384")]
    Sha384,

    /// SHA-512.
    #[serde(rename = "sha-512")]
    Sha512,
}

impl SdAlg {
    /// The IANA hash algorithm name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha384 => "sha-384",
            Self::Sha512 => "sha-512",
        }
    }

    /// Base64url-encoded (unpadded) hash of `value`.
    #[must_use]
    pub fn digest(self, value: &str) -> String {
        match self {
            Self::Sha256 => Base64UrlUnpadded::encode_string(&Sha256::digest(value)),
            Self::Sha384 => Base64UrlUnpadded::encode_string(&Sha384::digest(value)),
            Self::Sha512 => Base64UrlUnpadded::encode_string(&Sha512::digest(value)),
        }
    }
}

impl fmt::Display for SdAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdAlg {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha-256" => Ok(Self::Sha256),
            "sha-384" => Ok(Self::Sha384),
            "sha-512" => Ok(Self::Sha512),
            _ => Err(IntegrityError::UnsupportedSdAlg(s.to_string()).into()),
        }
    }
}

/// A claim disclosure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disclosure {
    /// The salt.
    pub salt: String,

    /// The claim name. `None` for array element disclosures.
    pub name: Option<String>,

    /// The disclosed value.
    pub value: Value,
}

impl Disclosure {
    /// Create an object-property disclosure with a random salt.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self::with_salt(generate_salt(), name, value)
    }

    /// Create an object-property disclosure with the given salt.
    pub fn with_salt(salt: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self { salt: salt.into(), name: Some(name.into()), value }
    }

    /// Create an array element disclosure with the given salt.
    pub fn array_item(salt: impl Into<String>, value: Value) -> Self {
        Self { salt: salt.into(), name: None, value }
    }

    /// `Base64Url` encode the disclosure as a JSON array of the form
    /// `["<salt>","<name>",<value>]` or `["<salt>",<value>]`.
    #[must_use]
    pub fn encode(&self) -> String {
        let array = match &self.name {
            Some(name) => json!([self.salt, name, self.value]),
            None => json!([self.salt, self.value]),
        };
        // serializing a `Value` cannot fail
        let bytes = serde_json::to_vec(&array).unwrap_or_default();
        Base64UrlUnpadded::encode_string(&bytes)
    }

    /// The digest of the encoded disclosure using `sd_alg`.
    #[must_use]
    pub fn digest(&self, sd_alg: SdAlg) -> String {
        sd_alg.digest(&self.encode())
    }

    /// Decode a base64url-encoded disclosure.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the string is not base64url, does not
    /// contain a JSON array of 2 or 3 elements, has a non-string salt or name,
    /// or uses a reserved claim name.
    pub fn parse(encoded: &str) -> Result<Self> {
        let decoded = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| InputError::InvalidBase64("disclosure".into()))?;
        let array: Vec<Value> =
            serde_json::from_slice(&decoded).map_err(|e| InputError::InvalidJson {
                context: "disclosure".into(),
                message: e.to_string(),
            })?;

        let malformed = |reason: &str| InputError::MalformedDisclosure(reason.to_string());
        let mut items = array.into_iter();
        let salt = match items.next() {
            Some(Value::String(salt)) => salt,
            _ => return Err(malformed("salt must be a string").into()),
        };

        match (items.next(), items.next(), items.next()) {
            (Some(value), None, None) => Ok(Self::array_item(salt, value)),
            (Some(Value::String(name)), Some(value), None) => {
                if name == SD_CLAIM || name == SD_ALG_CLAIM || name == ARRAY_ITEM_CLAIM {
                    return Err(malformed(&format!("reserved claim name `{name}`")).into());
                }
                Ok(Self::with_salt(salt, name, value))
            }
            (Some(_), Some(_), None) => Err(malformed("claim name must be a string").into()),
            _ => Err(malformed("expected an array of 2 or 3 elements").into()),
        }
    }
}

impl FromStr for Disclosure {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Generate a 128-bit, base64url-encoded salt.
#[must_use]
pub fn generate_salt() -> String {
    Base64UrlUnpadded::encode_string(&rng().random::<[u8; 16]>())
}

/// Generate a decoy digest: the hash of random bytes, indistinguishable from
/// a real disclosure digest.
#[must_use]
pub fn decoy_digest(sd_alg: SdAlg) -> String {
    let noise = Base64UrlUnpadded::encode_string(&rng().random::<[u8; 32]>());
    sd_alg.digest(&noise)
}
