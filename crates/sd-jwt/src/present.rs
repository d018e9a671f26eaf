//! # SD-JWT Presentation
//!
//! A holder presents an issued SD-JWT by selecting the disclosures to reveal
//! and appending a Key Binding JWT (KB-JWT) signed with the key bound to the
//! credential's `cnf` claim.

use std::collections::HashSet;

use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::disclosure::{Disclosure, SdAlg};
use crate::error::{IntegrityError, Result};
use crate::jose::{self, JwtType, Signer};
use crate::serialize::{self, decode_segment};
use crate::{ARRAY_ITEM_CLAIM, SD_ALG_CLAIM, SD_CLAIM};

/// Key Binding JWT claims.
///
/// A Key Binding JWT is "tied to" an SD-JWT when its payload is signed using
/// the key included in the SD-JWT `cnf` claim, and the KB-JWT contains a hash
/// of the SD-JWT in its `sd_hash` claim.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct KbJwtClaims {
    /// The value of nonce from the Authorization Request.
    pub nonce: String,

    /// The Verifier's Client Identifier.
    pub aud: String,

    /// The time of issuance of the Key Binding JWT.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// The base64url-encoded hash value over the Issuer-signed JWT and the
    /// selected Disclosures.
    pub sd_hash: String,
}

/// Generate an SD-JWT presentation with a Key Binding JWT.
#[derive(Debug)]
pub struct SdJwtVpBuilder<C, A, S> {
    credential: C,
    audience: A,
    nonce: Option<String>,
    disclose: Option<Vec<String>>,
    signer: S,
}

/// Builder has no credential.
#[doc(hidden)]
pub struct NoCredential;
/// Builder has a credential.
#[doc(hidden)]
pub struct HasCredential(String);

/// Builder has no audience.
#[doc(hidden)]
pub struct NoAudience;
/// Builder has an audience.
#[doc(hidden)]
pub struct HasAudience(String);

/// Builder has no signer.
#[doc(hidden)]
pub struct NoSigner;
/// Builder state has a signer.
#[doc(hidden)]
pub struct HasSigner<'a, S: Signer>(pub &'a S);

impl Default for SdJwtVpBuilder<NoCredential, NoAudience, NoSigner> {
    fn default() -> Self {
        Self::new()
    }
}

impl SdJwtVpBuilder<NoCredential, NoAudience, NoSigner> {
    /// Create a new builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            credential: NoCredential,
            audience: NoAudience,
            nonce: None,
            disclose: None,
            signer: NoSigner,
        }
    }
}

// Credential to present
impl<A, S> SdJwtVpBuilder<NoCredential, A, S> {
    /// Set the issued SD-JWT to present.
    #[must_use]
    pub fn credential(self, issued: impl Into<String>) -> SdJwtVpBuilder<HasCredential, A, S> {
        SdJwtVpBuilder {
            credential: HasCredential(issued.into()),
            audience: self.audience,
            nonce: self.nonce,
            disclose: self.disclose,
            signer: self.signer,
        }
    }
}

// Verifier
impl<C, S> SdJwtVpBuilder<C, NoAudience, S> {
    /// Set the Verifier's client identifier (the KB-JWT `aud` claim).
    #[must_use]
    pub fn audience(self, audience: impl Into<String>) -> SdJwtVpBuilder<C, HasAudience, S> {
        SdJwtVpBuilder {
            credential: self.credential,
            audience: HasAudience(audience.into()),
            nonce: self.nonce,
            disclose: self.disclose,
            signer: self.signer,
        }
    }
}

// Optional fields
impl<C, A, S> SdJwtVpBuilder<C, A, S> {
    /// Set the Verifier's nonce.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Reveal only the named claims. All disclosures are revealed when not
    /// set.
    #[must_use]
    pub fn disclose<N: Into<String>>(mut self, names: impl IntoIterator<Item = N>) -> Self {
        self.disclose = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

// Signature
impl<C, A> SdJwtVpBuilder<C, A, NoSigner> {
    /// Set the holder's signer.
    #[must_use]
    pub fn signer<S: Signer>(self, signer: &'_ S) -> SdJwtVpBuilder<C, A, HasSigner<'_, S>> {
        SdJwtVpBuilder {
            credential: self.credential,
            audience: self.audience,
            nonce: self.nonce,
            disclose: self.disclose,
            signer: HasSigner(signer),
        }
    }
}

impl<S: Signer> SdJwtVpBuilder<HasCredential, HasAudience, HasSigner<'_, S>> {
    /// Build the presentation, returning a compact SD-JWT with the format
    /// `<Issuer-signed JWT>~<Disclosure 1>~...~<Disclosure N>~<KB-JWT>`.
    ///
    /// Selected disclosures whose digest is not reachable from the credential
    /// body (or from another selected disclosure) are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the issued credential cannot be parsed or the
    /// KB-JWT cannot be signed.
    #[instrument(level = "debug", skip_all, fields(aud = %self.audience.0))]
    pub fn build(self) -> Result<String> {
        let split = serialize::split(&self.credential.0)?;
        let body = decode_segment(&split.body, "body")?;
        let sd_alg = match body.get(SD_ALG_CLAIM).and_then(Value::as_str) {
            Some(alg) => alg.parse()?,
            None => SdAlg::default(),
        };

        let mut candidates = Vec::with_capacity(split.disclosures.len());
        for encoded in &split.disclosures {
            let disclosure = Disclosure::parse(encoded)?;
            let wanted = match (&self.disclose, &disclosure.name) {
                (None, _) | (Some(_), None) => true,
                (Some(names), Some(name)) => names.contains(name),
            };
            if wanted {
                candidates.push((encoded.as_str(), sd_alg.digest(encoded), disclosure));
            }
        }
        let selected = reachable(&body, candidates);
        tracing::debug!(selected = selected.len(), "disclosures selected");

        let sd_jwt = serialize::combine(&split.issuer_jwt(), &selected, None);
        let claims = KbJwtClaims {
            nonce: self.nonce.unwrap_or_default(),
            aud: self.audience.0,
            iat: Utc::now(),
            sd_hash: sd_alg.digest(&sd_jwt),
        };

        let mut header = Map::new();
        header.insert("typ".into(), Value::String(JwtType::KbJwt.into()));
        let kb_jwt = jose::encode_jws(header, &claims, self.signer.0)?;

        Ok(serialize::combine_with_key_binding(&sd_jwt, &kb_jwt))
    }
}

// Keep candidates whose digest is reachable from the body, directly or via
// another kept disclosure, preserving token order.
fn reachable<'a>(
    body: &Map<String, Value>, candidates: Vec<(&'a str, String, Disclosure)>,
) -> Vec<&'a str> {
    let mut digests = HashSet::new();
    collect_digests(body, &mut digests);

    let mut kept = vec![false; candidates.len()];
    loop {
        let mut changed = false;
        for (i, (_, digest, disclosure)) in candidates.iter().enumerate() {
            if !kept[i] && digests.contains(digest) {
                kept[i] = true;
                changed = true;
                if let Value::Object(object) = &disclosure.value {
                    collect_digests(object, &mut digests);
                } else if let Value::Array(items) = &disclosure.value {
                    collect_array_digests(items, &mut digests);
                }
            }
        }
        if !changed {
            break;
        }
    }

    candidates.into_iter().zip(kept).filter(|(_, keep)| *keep).map(|((e, ..), _)| e).collect()
}

fn collect_digests(object: &Map<String, Value>, digests: &mut HashSet<String>) {
    for (key, value) in object {
        match value {
            Value::Array(items) if key == SD_CLAIM => {
                digests.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
            }
            Value::Object(child) => collect_digests(child, digests),
            Value::Array(items) => collect_array_digests(items, digests),
            _ => {}
        }
    }
}

fn collect_array_digests(items: &[Value], digests: &mut HashSet<String>) {
    for item in items {
        match item {
            Value::Object(object) => {
                if let Some(Value::String(digest)) = object.get(ARRAY_ITEM_CLAIM) {
                    digests.insert(digest.clone());
                } else {
                    collect_digests(object, digests);
                }
            }
            Value::Array(nested) => collect_array_digests(nested, digests),
            _ => {}
        }
    }
}

impl TryFrom<&Map<String, Value>> for KbJwtClaims {
    type Error = crate::Error;

    fn try_from(claims: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(claims.clone()))
            .map_err(|e| IntegrityError::KeyBinding(format!("invalid KB-JWT claims: {e}")).into())
    }
}
