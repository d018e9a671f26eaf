//! # Credential Reconstruction
//!
//! Rebuilds the claim set of an SD-JWT from its body and the disclosures
//! presented with it.
//!
//! Disclosures are indexed by digest and the claim tree is walked once,
//! replacing each matched `_sd` digest (or `{"...": digest}` array element)
//! with its disclosed claim. Disclosed values are walked in turn, so the
//! order disclosures appear in the token does not matter. Digests without a
//! presented disclosure stay in their `_sd` array; an `_sd` array emptied by
//! reconstruction is removed.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::instrument;

use crate::disclosure::{Disclosure, SdAlg};
use crate::error::{InputError, IntegrityError, Result};
use crate::serialize::{self, KeyBindingJwt};
use crate::{ARRAY_ITEM_CLAIM, SD_ALG_CLAIM, SD_CLAIM};

/// A decoded SD-JWT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    /// The issuer JWT header.
    pub header: Map<String, Value>,

    /// The reconstructed claims.
    pub claims: Map<String, Value>,

    /// The base64url-encoded issuer signature.
    pub signature: String,

    /// The decoded disclosures, in token order.
    pub disclosures: Vec<Disclosure>,

    /// The key-binding JWT, if presented.
    pub key_binding: Option<KeyBindingJwt>,
}

/// Decode a compact SD-JWT and reconstruct its claims. The issuer signature
/// is NOT verified.
///
/// # Errors
///
/// Returns an [`InputError`] if the token or any of its segments is
/// malformed and an [`IntegrityError`] if the disclosures do not match the
/// credential body.
#[instrument(level = "debug", skip_all)]
pub fn construct(token: &str) -> Result<Credential> {
    let split = serialize::split(token)?;
    let header = serialize::decode_segment(&split.header, "header")?;
    let body = serialize::decode_segment(&split.body, "body")?;
    let claims = reconstruct(body, &split.disclosures)?;
    let disclosures =
        split.disclosures.iter().map(|d| Disclosure::parse(d)).collect::<Result<Vec<_>>>()?;

    Ok(Credential {
        header,
        claims,
        signature: split.signature,
        disclosures,
        key_binding: split.key_binding,
    })
}

struct Pending {
    encoded: String,
    disclosure: Disclosure,
    used: bool,
}

/// Re-insert disclosed claims into a credential body.
///
/// The `_sd_alg` claim is consumed (defaulting to `sha-256`) and does not
/// appear in the result.
///
/// # Errors
///
/// Returns an [`InputError`] for an undecodable disclosure or a malformed
/// `_sd` claim, and an [`IntegrityError`] when a disclosure is repeated,
/// matches no digest, is referenced twice, has the wrong kind for its
/// position, or collides with an existing claim.
#[instrument(level = "debug", skip_all, fields(disclosures = disclosures.len()))]
pub fn reconstruct(
    mut body: Map<String, Value>, disclosures: &[impl AsRef<str>],
) -> Result<Map<String, Value>> {
    let sd_alg = match body.remove(SD_ALG_CLAIM) {
        None => SdAlg::default(),
        Some(Value::String(alg)) => alg.parse()?,
        Some(other) => return Err(IntegrityError::UnsupportedSdAlg(other.to_string()).into()),
    };

    let mut pending = BTreeMap::new();
    let mut order = Vec::with_capacity(disclosures.len());
    for encoded in disclosures {
        let encoded = encoded.as_ref();
        let disclosure = Disclosure::parse(encoded)?;
        let digest = sd_alg.digest(encoded);
        if pending.contains_key(&digest) {
            return Err(IntegrityError::DuplicateDisclosure(encoded.to_string()).into());
        }
        order.push(digest.clone());
        pending.insert(digest, Pending { encoded: encoded.to_string(), disclosure, used: false });
    }

    let claims = expand_object(body, &mut pending)?;

    // every disclosure must have been placed
    for digest in &order {
        if let Some(unused) = pending.get(digest).filter(|p| !p.used) {
            return Err(IntegrityError::OrphanDisclosure(unused.encoded.clone()).into());
        }
    }

    Ok(claims)
}

fn expand_object(
    object: Map<String, Value>, pending: &mut BTreeMap<String, Pending>,
) -> Result<Map<String, Value>> {
    let mut expanded = Map::new();
    let mut digests = Vec::new();

    for (key, value) in object {
        if key == SD_CLAIM {
            digests = sd_digests(value)?;
        } else {
            expanded.insert(key, expand_value(value, pending)?);
        }
    }

    let mut undisclosed = Vec::new();
    for digest in digests {
        let Some(entry) = pending.get_mut(&digest) else {
            undisclosed.push(Value::String(digest));
            continue;
        };
        if entry.used {
            return Err(IntegrityError::DigestReused(digest).into());
        }
        entry.used = true;

        let Some(name) = entry.disclosure.name.clone() else {
            return Err(IntegrityError::DisclosureKindMismatch(entry.encoded.clone()).into());
        };
        if expanded.contains_key(&name) {
            return Err(IntegrityError::ClaimCollision(name).into());
        }
        let value = entry.disclosure.value.clone();
        tracing::trace!(claim = %name, "disclosure matched");
        expanded.insert(name, expand_value(value, pending)?);
    }

    if !undisclosed.is_empty() {
        expanded.insert(SD_CLAIM.to_string(), Value::Array(undisclosed));
    }
    Ok(expanded)
}

fn expand_array(items: Vec<Value>, pending: &mut BTreeMap<String, Pending>) -> Result<Vec<Value>> {
    let mut expanded = Vec::with_capacity(items.len());
    for item in items {
        let Some(digest) = array_item_digest(&item) else {
            expanded.push(expand_value(item, pending)?);
            continue;
        };
        let Some(entry) = pending.get_mut(digest) else {
            expanded.push(item);
            continue;
        };
        if entry.used {
            return Err(IntegrityError::DigestReused(digest.to_string()).into());
        }
        entry.used = true;

        if entry.disclosure.name.is_some() {
            return Err(IntegrityError::DisclosureKindMismatch(entry.encoded.clone()).into());
        }
        let value = entry.disclosure.value.clone();
        expanded.push(expand_value(value, pending)?);
    }
    Ok(expanded)
}

fn expand_value(value: Value, pending: &mut BTreeMap<String, Pending>) -> Result<Value> {
    match value {
        Value::Object(object) => Ok(Value::Object(expand_object(object, pending)?)),
        Value::Array(items) => Ok(Value::Array(expand_array(items, pending)?)),
        other => Ok(other),
    }
}

fn sd_digests(value: Value) -> Result<Vec<String>> {
    let malformed = || InputError::MalformedDisclosure("`_sd` must be an array of digests".into());
    let Value::Array(items) = value else {
        return Err(malformed().into());
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(digest) => Ok(digest),
            _ => Err(malformed().into()),
        })
        .collect()
}

// `{"...": "<digest>"}`
fn array_item_digest(item: &Value) -> Option<&str> {
    let object = item.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(ARRAY_ITEM_CLAIM)?.as_str()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builder::{BuildOptions, build};
    use crate::metadata::{ClaimMetadata, TypeMetadata};

    fn document() -> Map<String, Value> {
        json!({
            "first_name": "John",
            "address": {
                "street": "123 Main St",
                "postal": {"code": "12345", "city": "Metropolis"}
            },
            "work_countries": ["SE", "FI"]
        })
        .as_object()
        .cloned()
        .expect("object")
    }

    fn policy(paths: &[&[&str]]) -> TypeMetadata {
        TypeMetadata {
            vct: "urn:test".into(),
            claims: paths.iter().map(|p| ClaimMetadata::always(p.iter().copied())).collect(),
            ..TypeMetadata::default()
        }
    }

    #[test]
    fn round_trip() {
        let policies: [&[&[&str]]; 4] = [
            &[],
            &[&["first_name"]],
            &[&["address", "postal"], &["work_countries"]],
            &[&["address"], &["address", "postal"], &["address", "postal", "code"], &["first_name"]],
        ];
        for paths in policies {
            let built = build(document(), &policy(paths), &BuildOptions::default())
                .expect("should build");
            let claims = reconstruct(built.claims, &built.disclosures).expect("should reconstruct");
            assert_eq!(claims, document());
        }
    }

    #[test]
    fn any_disclosure_order() {
        let built = build(
            document(),
            &policy(&[&["address"], &["address", "postal"], &["first_name"]]),
            &BuildOptions::default(),
        )
        .expect("should build");

        let mut reversed = built.disclosures.clone();
        reversed.reverse();
        let claims = reconstruct(built.claims, &reversed).expect("should reconstruct");
        assert_eq!(claims, document());
    }

    #[test]
    fn subset_keeps_undisclosed_digests() {
        let built = build(
            document(),
            &policy(&[&["first_name"], &["work_countries"]]),
            &BuildOptions::with_salt("mockSalt"),
        )
        .expect("should build");

        // only `work_countries`
        let claims =
            reconstruct(built.claims, &built.disclosures[1..]).expect("should reconstruct");
        assert_eq!(claims["work_countries"], json!(["SE", "FI"]));
        assert!(claims.get("first_name").is_none());
        assert_eq!(claims["_sd"], json!(["xq6gDUGEXZa83npxI5Enxu0pTdQ-Pr2_f20Bd2arexs"]));
        assert!(claims.get("_sd_alg").is_none());
    }

    #[test]
    fn orphan_disclosure() {
        let built = build(document(), &policy(&[&["first_name"]]), &BuildOptions::default())
            .expect("should build");
        let orphan = Disclosure::new("nickname", json!("Johnny")).encode();

        let err = reconstruct(built.claims, &[built.disclosures[0].clone(), orphan.clone()])
            .expect_err("should fail");
        assert_eq!(err, crate::Error::from(IntegrityError::OrphanDisclosure(orphan)));
    }

    #[test]
    fn duplicate_disclosure() {
        let built = build(document(), &policy(&[&["first_name"]]), &BuildOptions::default())
            .expect("should build");
        let repeated = [built.disclosures[0].clone(), built.disclosures[0].clone()];

        let err = reconstruct(built.claims, &repeated).expect_err("should fail");
        assert_eq!(
            err,
            crate::Error::from(IntegrityError::DuplicateDisclosure(repeated[0].clone()))
        );
    }

    #[test]
    fn claim_collision() {
        let disclosure = Disclosure::new("first_name", json!("Jane"));
        let body = json!({
            "first_name": "John",
            "_sd": [disclosure.digest(SdAlg::Sha256)]
        });
        let body = body.as_object().cloned().expect("object");

        let err = reconstruct(body, &[disclosure.encode()]).expect_err("should fail");
        assert_eq!(err, crate::Error::from(IntegrityError::ClaimCollision("first_name".into())));
    }

    #[test]
    fn digest_reused() {
        let disclosure = Disclosure::new("given_name", json!("Jane"));
        let digest = disclosure.digest(SdAlg::Sha256);
        let body = json!({"_sd": [digest], "nested": {"_sd": [digest]}});
        let body = body.as_object().cloned().expect("object");

        let err = reconstruct(body, &[disclosure.encode()]).expect_err("should fail");
        assert_eq!(err, crate::Error::from(IntegrityError::DigestReused(digest)));
    }

    #[test]
    fn array_items() {
        // RFC 9901 example: `nationalities` with "DE" disclosed
        let de = "WyJuUHVvUW5rUkZxM0JJZUFtN0FuWEZBIiwgIkRFIl0";
        let body = json!({
            "_sd_alg": "sha-256",
            "nationalities": [
                "FR",
                {"...": "7Cf6JkPudry3lcbwHgeZ8khAv1U1OSlerP0VkBJrWZ0"},
                {"...": "undisclosed"}
            ]
        });
        let body = body.as_object().cloned().expect("object");

        let claims = reconstruct(body, &[de]).expect("should reconstruct");
        assert_eq!(claims["nationalities"], json!(["FR", "DE", {"...": "undisclosed"}]));
    }

    #[test]
    fn kind_mismatch() {
        let item = Disclosure::array_item("salt", json!("DE"));
        let body = json!({"_sd": [item.digest(SdAlg::Sha256)]});
        let body = body.as_object().cloned().expect("object");

        let err = reconstruct(body, &[item.encode()]).expect_err("should fail");
        assert_eq!(err, crate::Error::from(IntegrityError::DisclosureKindMismatch(item.encode())));
    }

    #[test]
    fn sha_512_digests() {
        let options = BuildOptions { sd_alg: SdAlg::Sha512, ..BuildOptions::default() };
        let built = build(document(), &policy(&[&["address", "street"]]), &options)
            .expect("should build");
        let claims = reconstruct(built.claims, &built.disclosures).expect("should reconstruct");
        assert_eq!(claims, document());
    }

    #[test]
    fn unsupported_sd_alg() {
        let body = json!({"_sd_alg": "md5"}).as_object().cloned().expect("object");
        let err = reconstruct(body, &[] as &[&str]).expect_err("should fail");
        assert_eq!(err, crate::Error::from(IntegrityError::UnsupportedSdAlg("md5".into())));
    }

    #[test]
    fn malformed_sd_claim() {
        let body = json!({"_sd": "digest"}).as_object().cloned().expect("object");
        let err = reconstruct(body, &[] as &[&str]).expect_err("should fail");
        assert!(matches!(err, crate::Error::Input(InputError::MalformedDisclosure(_))));
    }

    #[test]
    fn construct_token() {
        let built = build(document(), &policy(&[&["first_name"]]), &BuildOptions::default())
            .expect("should build");
        let header = serialize::encode_segment(&json!({"alg": "ES256"})).expect("should encode");
        let body = serialize::encode_segment(&built.claims).expect("should encode");
        let token = serialize::combine(&format!("{header}.{body}.c2ln"), &built.disclosures, None);

        let credential = construct(&token).expect("should construct");
        assert_eq!(credential.header["alg"], "ES256");
        assert_eq!(credential.claims, document());
        assert_eq!(credential.signature, "c2ln");
        assert_eq!(credential.disclosures[0].name.as_deref(), Some("first_name"));
        assert!(credential.key_binding.is_none());
    }
}
