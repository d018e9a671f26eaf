//! # SD-JWT Verification
//!
//! [`validate`] checks that a token's disclosures are unique and its issuer
//! signature is valid. [`verify`] goes further: it checks the credential's
//! type and validity period, reconstructs the disclosed claims, and verifies
//! any key-binding JWT against the holder key in the `cnf` claim.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::disclosure::{Disclosure, SdAlg};
use crate::error::{InputError, IntegrityError, Result, key_binding};
use crate::jose::{self, JwtType, PublicKey, PublicKeyJwk};
use crate::metadata::TypeMetadata;
use crate::present::KbJwtClaims;
use crate::reconstruct::reconstruct;
use crate::serialize::{self, SplitToken};
use crate::SD_ALG_CLAIM;

/// Check that an SD-JWT has no repeated disclosures and that its issuer
/// signature verifies with `key`.
///
/// # Errors
///
/// Returns [`IntegrityError::DuplicateDisclosure`] if a disclosure is
/// repeated, and an `InputError` or `CryptoError` if the token is malformed
/// or its signature does not verify.
#[instrument(level = "debug", skip_all)]
pub fn validate(token: &str, key: &PublicKey) -> Result<bool> {
    let split = serialize::split(token)?;
    check_unique(&split.disclosures)?;
    jose::verify_jws(&split.issuer_jwt(), key)?;
    Ok(true)
}

fn check_unique(disclosures: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for disclosure in disclosures {
        if !seen.insert(disclosure.as_str()) {
            return Err(IntegrityError::DuplicateDisclosure(disclosure.clone()).into());
        }
    }
    Ok(())
}

/// Options for [`verify`].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifyOptions {
    /// Fail when the presentation has no key-binding JWT.
    pub require_key_binding: bool,

    /// Expected key-binding `nonce`.
    pub nonce: Option<String>,

    /// Expected key-binding `aud`.
    pub audience: Option<String>,

    /// Check `exp`, `nbf`, and `iat` against the current time.
    pub validate_time: bool,

    /// Allowed clock skew, in seconds. Must not be negative.
    pub clock_skew: i64,
}

impl VerifyOptions {
    fn skew(&self) -> Result<TimeDelta> {
        TimeDelta::try_seconds(self.clock_skew)
            .filter(|_| self.clock_skew >= 0)
            .ok_or_else(|| InputError::OutOfRange("clock_skew".into()).into())
    }
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            require_key_binding: false,
            nonce: None,
            audience: None,
            validate_time: true,
            clock_skew: 300,
        }
    }
}

/// A verified SD-JWT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    /// The issuer JWT header.
    pub header: Map<String, Value>,

    /// The reconstructed claims.
    pub claims: Map<String, Value>,

    /// The disclosures presented.
    pub disclosures: Vec<Disclosure>,

    /// Selectively disclosed claims by name, with their values as disclosed.
    /// Array element disclosures have no name and are not included.
    pub disclosed: Map<String, Value>,

    /// Type metadata embedded in the `vctm` header, if any.
    pub metadata: Option<TypeMetadata>,

    /// The verified key-binding claims, if presented.
    pub key_binding: Option<KbJwtClaims>,
}

/// Verify an issued or presented SD-JWT VC.
///
/// # Errors
///
/// Returns an error if the token is malformed, its signature does not verify
/// with `key`, it is not an SD-JWT VC, it is outside its validity period, its
/// disclosures do not match the body, or the key-binding JWT is missing (when
/// required) or invalid.
#[instrument(level = "debug", skip_all)]
pub fn verify(token: &str, key: &PublicKey, options: &VerifyOptions) -> Result<Verified> {
    let skew = options.skew()?;
    let split = serialize::split(token)?;
    check_unique(&split.disclosures)?;
    let jws = jose::verify_jws(&split.issuer_jwt(), key)?;

    let typ = jws.header.get("typ").and_then(Value::as_str).unwrap_or_default();
    if typ != JwtType::SdJwt.as_str() && typ != JwtType::VcSdJwt.as_str() {
        return Err(IntegrityError::UnexpectedType(typ.to_string()).into());
    }
    if options.validate_time {
        check_time(&jws.claims, Utc::now(), skew)?;
    }
    if !jws.claims.get("vct").is_some_and(Value::is_string) {
        return Err(IntegrityError::MissingClaim("vct".into()).into());
    }

    let key_binding = match &split.key_binding {
        Some(_) => Some(check_key_binding(
            &split,
            &jws.claims,
            options.nonce.as_deref(),
            options.audience.as_deref(),
        )?),
        None if options.require_key_binding => {
            return Err(key_binding!("key-binding JWT is required"));
        }
        None => None,
    };

    let metadata = embedded_metadata(&jws.header);
    let claims = reconstruct(jws.claims, &split.disclosures)?;
    let disclosures =
        split.disclosures.iter().map(|d| Disclosure::parse(d)).collect::<Result<Vec<_>>>()?;
    let disclosed = disclosures
        .iter()
        .filter_map(|d| Some((d.name.clone()?, d.value.clone())))
        .collect();
    tracing::debug!(disclosures = disclosures.len(), "verified credential");

    Ok(Verified { header: jws.header, claims, disclosures, disclosed, metadata, key_binding })
}

fn check_time(claims: &Map<String, Value>, now: DateTime<Utc>, skew: TimeDelta) -> Result<()> {
    // the claim's time moved by `delta`
    let shifted = |name: &str, delta: TimeDelta| -> Result<Option<DateTime<Utc>>> {
        let Some(time) =
            claims.get(name).and_then(Value::as_i64).and_then(|t| DateTime::from_timestamp(t, 0))
        else {
            return Ok(None);
        };
        let shifted = time
            .checked_add_signed(delta)
            .ok_or_else(|| InputError::OutOfRange(name.to_string()))?;
        Ok(Some(shifted))
    };

    if shifted("exp", skew)?.is_some_and(|exp| exp < now) {
        return Err(IntegrityError::Expired.into());
    }
    if shifted("nbf", -skew)?.is_some_and(|nbf| nbf > now) {
        return Err(IntegrityError::NotYetValid.into());
    }
    if shifted("iat", -skew)?.is_some_and(|iat| iat > now) {
        return Err(IntegrityError::NotYetValid.into());
    }
    Ok(())
}

// `vctm` holds base64url-encoded type metadata documents; the first one that
// decodes describes the credential's own `vct`.
fn embedded_metadata(header: &Map<String, Value>) -> Option<TypeMetadata> {
    let documents = match header.get("vctm")? {
        Value::Array(documents) => documents.iter().filter_map(Value::as_str).collect(),
        Value::String(document) => vec![document.as_str()],
        _ => return None,
    };
    documents.into_iter().find_map(|d| TypeMetadata::decode(d).ok())
}

/// Verify the key-binding JWT of a presented SD-JWT.
///
/// The holder key is taken from the issuer JWT's `cnf.jwk` claim. The issuer
/// signature is NOT checked here; use [`verify`] for full verification.
///
/// # Errors
///
/// Returns an [`IntegrityError::KeyBinding`] if the key-binding JWT is
/// missing, has the wrong `typ`, does not match `nonce` or `audience`, or its
/// `sd_hash` does not match the presented SD-JWT, and a `CryptoError` if its
/// signature does not verify.
#[instrument(level = "debug", skip_all)]
pub fn verify_key_binding(token: &str, nonce: &str, audience: &str) -> Result<KbJwtClaims> {
    let split = serialize::split(token)?;
    let body = serialize::decode_segment(&split.body, "body")?;
    check_key_binding(&split, &body, Some(nonce), Some(audience))
}

fn check_key_binding(
    split: &SplitToken, body: &Map<String, Value>, nonce: Option<&str>, audience: Option<&str>,
) -> Result<KbJwtClaims> {
    let Some(kb_jwt) = &split.key_binding else {
        return Err(key_binding!("presentation has no key-binding JWT"));
    };

    let Some(jwk) = body.get("cnf").and_then(|cnf| cnf.get("jwk")) else {
        return Err(key_binding!("credential has no `cnf.jwk` claim"));
    };
    let jwk: PublicKeyJwk = serde_json::from_value(jwk.clone())
        .map_err(|e| key_binding!("invalid `cnf.jwk`: {e}"))?;
    let holder_key = PublicKey::try_from(&jwk)?;

    let jws = jose::verify_jws(&kb_jwt.compact(), &holder_key)?;
    let typ = jws.header.get("typ").and_then(Value::as_str).unwrap_or_default();
    if typ != JwtType::KbJwt.as_str() {
        return Err(key_binding!("unexpected `typ` {typ}"));
    }
    let claims = KbJwtClaims::try_from(&jws.claims)?;

    let sd_alg = match body.get(SD_ALG_CLAIM).and_then(Value::as_str) {
        Some(alg) => alg.parse()?,
        None => SdAlg::default(),
    };
    if claims.sd_hash != sd_alg.digest(&split.sd_jwt()) {
        return Err(key_binding!("`sd_hash` does not match the presented SD-JWT"));
    }
    if let Some(nonce) = nonce
        && claims.nonce != nonce
    {
        return Err(key_binding!("`nonce` {} is invalid", claims.nonce));
    }
    if let Some(audience) = audience
        && claims.aud != audience
    {
        return Err(key_binding!("`aud` {} is invalid", claims.aud));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Error;

    #[test]
    fn unique_disclosures() {
        let disclosures = vec!["a".to_string(), "b".to_string()];
        assert!(check_unique(&disclosures).is_ok());

        let disclosures = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(
            check_unique(&disclosures).expect_err("should fail"),
            Error::from(IntegrityError::DuplicateDisclosure("a".into()))
        );
    }

    #[test]
    fn time_window() {
        let now = Utc::now();
        let skew = TimeDelta::seconds(60);
        let claims = |exp: i64, nbf: i64| {
            json!({"exp": now.timestamp() + exp, "nbf": now.timestamp() + nbf, "iat": now.timestamp()})
                .as_object()
                .cloned()
                .expect("object")
        };

        assert!(check_time(&claims(3600, -3600), now, skew).is_ok());
        // within skew
        assert!(check_time(&claims(-30, 30), now, skew).is_ok());
        assert_eq!(
            check_time(&claims(-3600, -7200), now, skew).expect_err("should fail"),
            Error::from(IntegrityError::Expired)
        );
        assert_eq!(
            check_time(&claims(7200, 3600), now, skew).expect_err("should fail"),
            Error::from(IntegrityError::NotYetValid)
        );
        assert!(check_time(&Map::new(), now, skew).is_ok());
    }

    #[test]
    fn skew_out_of_range() {
        let options = VerifyOptions { clock_skew: i64::MAX, ..VerifyOptions::default() };
        assert_eq!(
            options.skew().expect_err("should fail"),
            Error::from(InputError::OutOfRange("clock_skew".into()))
        );
        let options = VerifyOptions { clock_skew: -1, ..VerifyOptions::default() };
        assert!(options.skew().is_err());
        let skew = VerifyOptions::default().skew().expect("should convert");
        assert_eq!(skew, TimeDelta::seconds(300));

        let claims = json!({"exp": 1_762_512_008}).as_object().cloned().expect("object");
        assert_eq!(
            check_time(&claims, Utc::now(), TimeDelta::MAX).expect_err("should fail"),
            Error::from(InputError::OutOfRange("exp".into()))
        );
    }

    #[test]
    fn metadata_header() {
        let metadata =
            TypeMetadata { vct: "https://example.com/pda1".into(), ..TypeMetadata::default() };
        let encoded = metadata.encode();

        let header = json!({"vctm": ["not base64!", encoded]});
        let found = embedded_metadata(header.as_object().expect("object"));
        assert_eq!(found.map(|m| m.vct).as_deref(), Some("https://example.com/pda1"));

        assert!(embedded_metadata(&Map::new()).is_none());
    }

    #[test]
    fn default_options() {
        let options: VerifyOptions =
            serde_json::from_value(json!({"nonce": "n"})).expect("should parse");
        assert!(options.validate_time);
        assert_eq!(options.clock_skew, 300);
        assert_eq!(options.nonce.as_deref(), Some("n"));
    }
}
