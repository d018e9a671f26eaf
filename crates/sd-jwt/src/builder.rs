//! # Credential Builder
//!
//! Applies the selective disclosure rules of a credential's type metadata to
//! a claims document. Every claim whose rule is [`SdRule::Always`] is moved
//! out of the document into a disclosure, leaving its digest behind in the
//! `_sd` array of the object that held it.
//!
//! Rules are applied deepest path first so a nested claim is disclosed before
//! any rule disclosing its parent object. The parent's disclosure then
//! carries the nested claim's digest rather than its value.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::disclosure::{Disclosure, SdAlg, decoy_digest, generate_salt};
use crate::error::{InputError, IntegrityError, PolicyError, Result};
use crate::metadata::{ClaimMetadata, SdRule, TypeMetadata};
use crate::{ARRAY_ITEM_CLAIM, SD_ALG_CLAIM, SD_CLAIM};

/// Options controlling how a credential is built.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildOptions {
    /// Hash algorithm for disclosure digests.
    pub sd_alg: SdAlg,

    /// Number of decoy digests to add to each `_sd` array.
    pub decoy_digests: usize,

    /// Salt source for disclosures.
    #[serde(skip)]
    pub salt: Salt,
}

impl BuildOptions {
    /// Options using the same salt for every disclosure. Only useful for
    /// reproducible fixtures.
    #[must_use]
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self { salt: Salt::Fixed(salt.into()), ..Self::default() }
    }
}

/// Where disclosure salts come from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Salt {
    /// A fresh 128-bit random salt per disclosure.
    #[default]
    Random,

    /// A caller-supplied salt used for every disclosure.
    Fixed(String),
}

impl Salt {
    fn generate(&self) -> String {
        match self {
            Self::Random => generate_salt(),
            Self::Fixed(salt) => salt.clone(),
        }
    }
}

/// The output of [`build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Built {
    /// The claims document with disclosed claims replaced by digests.
    pub claims: Map<String, Value>,

    /// Encoded disclosures, in rule-processing order.
    pub disclosures: Vec<String>,
}

/// Replace every `always` disclosable claim in `claims` with its digest.
///
/// The claims document is consumed and returned, transformed, in
/// [`Built::claims`].
///
/// # Errors
///
/// Returns an [`InputError`] if `claims` already uses a reserved claim name,
/// a [`PolicyError`] if a rule has an empty or null path segment, or a path
/// that does not resolve to a claim (rules are never silently skipped), and
/// [`IntegrityError::DuplicateDigest`] if two rules produce the same
/// disclosure.
#[instrument(level = "debug", skip_all, fields(vct = %metadata.vct))]
pub fn build(
    mut claims: Map<String, Value>, metadata: &TypeMetadata, options: &BuildOptions,
) -> Result<Built> {
    check_reserved(&claims)?;

    let mut rules = Vec::new();
    for rule in &metadata.claims {
        match rule.sd {
            SdRule::Always => rules.push(checked_path(rule)?),
            SdRule::Never | SdRule::Allowed => {
                tracing::trace!(path = %rule.json_path(), sd = ?rule.sd, "rule has no build effect");
            }
        }
    }

    // deepest first, keeping declaration order between equal depths
    rules.sort_by(|a, b| b.len().cmp(&a.len()));

    // identical disclosures under different parents would share a digest
    let mut digests = HashSet::with_capacity(rules.len());
    let mut disclosures = Vec::with_capacity(rules.len());
    for path in &rules {
        let (disclosure, digest) = disclose(&mut claims, path, options)?;
        if !digests.insert(digest.clone()) {
            return Err(IntegrityError::DuplicateDigest(digest).into());
        }
        disclosures.push(disclosure);
    }

    if options.decoy_digests > 0 {
        add_decoys(&mut claims, options.sd_alg, options.decoy_digests);
    }
    claims.insert(SD_ALG_CLAIM.to_string(), Value::String(options.sd_alg.to_string()));

    tracing::debug!(disclosures = disclosures.len(), "built credential claims");
    Ok(Built { claims, disclosures: disclosures.iter().map(Disclosure::encode).collect() })
}

// Resolve a rule's path to plain segments.
fn checked_path(rule: &ClaimMetadata) -> Result<Vec<&str>> {
    if rule.path.is_empty() {
        return Err(PolicyError::EmptyPath.into());
    }
    let mut segments = Vec::with_capacity(rule.path.len());
    for segment in &rule.path {
        let Some(segment) = segment.as_deref() else {
            return Err(PolicyError::NullSegment(rule.json_path()).into());
        };
        if is_reserved(segment) {
            return Err(PolicyError::ReservedName(rule.json_path()).into());
        }
        segments.push(segment);
    }
    Ok(segments)
}

// Move the claim at `path` into a disclosure, leaving its digest in the
// parent's `_sd` array.
fn disclose(
    claims: &mut Map<String, Value>, path: &[&str], options: &BuildOptions,
) -> Result<(Disclosure, String)> {
    let rendered = || format!("$.{}", path.join("."));
    let Some((name, parents)) = path.split_last() else {
        return Err(PolicyError::EmptyPath.into());
    };

    let mut parent = claims;
    for segment in parents {
        parent = match parent.get_mut(*segment) {
            Some(Value::Object(object)) => object,
            Some(_) => return Err(PolicyError::NotAnObject(rendered()).into()),
            None => return Err(PolicyError::Unresolved(rendered()).into()),
        };
    }

    let Some(value) = parent.remove(*name) else {
        return Err(PolicyError::Unresolved(rendered()).into());
    };
    let disclosure = Disclosure::with_salt(options.salt.generate(), *name, value);
    let digest = disclosure.digest(options.sd_alg);

    let sd = parent.entry(SD_CLAIM).or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(digests) = sd else {
        return Err(InputError::ReservedClaim(SD_CLAIM.to_string()).into());
    };
    digests.push(Value::String(digest.clone()));

    tracing::trace!(path = %rendered(), "claim disclosed");
    Ok((disclosure, digest))
}

// Append decoys to every `_sd` array in the document and sort each array so
// decoys cannot be told apart by position.
fn add_decoys(value: &mut Map<String, Value>, sd_alg: SdAlg, count: usize) {
    for (key, child) in value.iter_mut() {
        match child {
            Value::Array(digests) if key == SD_CLAIM => {
                digests.extend((0..count).map(|_| Value::String(decoy_digest(sd_alg))));
                digests.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            }
            Value::Object(object) => add_decoys(object, sd_alg, count),
            Value::Array(items) => {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    add_decoys(item, sd_alg, count);
                }
            }
            _ => {}
        }
    }
}

fn is_reserved(name: &str) -> bool {
    name == SD_CLAIM || name == SD_ALG_CLAIM || name == ARRAY_ITEM_CLAIM
}

// The document must not already contain claim names the builder reserves.
fn check_reserved(claims: &Map<String, Value>) -> Result<()> {
    for (key, value) in claims {
        if is_reserved(key) {
            return Err(InputError::ReservedClaim(key.clone()).into());
        }
        match value {
            Value::Object(object) => check_reserved(object)?,
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    check_reserved(item)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

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
    fn flat_disclosure() {
        let built =
            build(document(), &policy(&[&["first_name"]]), &BuildOptions::with_salt("mockSalt"))
                .expect("should build");

        assert_eq!(built.disclosures, vec!["WyJtb2NrU2FsdCIsImZpcnN0X25hbWUiLCJKb2huIl0"]);
        assert_eq!(
            Value::Object(built.claims),
            json!({
                "_sd": ["xq6gDUGEXZa83npxI5Enxu0pTdQ-Pr2_f20Bd2arexs"],
                "_sd_alg": "sha-256",
                "address": {
                    "street": "123 Main St",
                    "postal": {"code": "12345", "city": "Metropolis"}
                },
                "work_countries": ["SE", "FI"]
            })
        );
    }

    #[test]
    fn nested_disclosure() {
        let built = build(
            document(),
            &policy(&[&["address", "postal"]]),
            &BuildOptions::with_salt("mockSalt"),
        )
        .expect("should build");

        assert_eq!(built.disclosures, vec![
            "WyJtb2NrU2FsdCIsInBvc3RhbCIseyJjaXR5IjoiTWV0cm9wb2xpcyIsImNvZGUiOiIxMjM0NSJ9XQ"
        ]);
        assert_eq!(
            built.claims["address"],
            json!({
                "street": "123 Main St",
                "_sd": ["2ZfQ55Pa9xnCPzhqs6w8hpNzBcCFhPn_uAHHcT4CGPc"]
            })
        );
        assert_eq!(built.claims["first_name"], "John");
    }

    // The shallower rule is declared first but must be applied last.
    #[test]
    fn overlapping_paths_deepest_first() {
        let built = build(
            document(),
            &policy(&[&["address"], &["address", "postal"]]),
            &BuildOptions::with_salt("mockSalt"),
        )
        .expect("should build");

        assert_eq!(built.disclosures, vec![
            "WyJtb2NrU2FsdCIsInBvc3RhbCIseyJjaXR5IjoiTWV0cm9wb2xpcyIsImNvZGUiOiIxMjM0NSJ9XQ",
            "WyJtb2NrU2FsdCIsImFkZHJlc3MiLHsiX3NkIjpbIjJaZlE1NVBhOXhuQ1B6aHFzNnc4aHBOekJjQ0ZoUG5fdUFISGNUNENHUGMiXSwic3RyZWV0IjoiMTIzIE1haW4gU3QifV0"
        ]);
        assert_eq!(built.claims["_sd"], json!(["XsM3SJ51E5MFx3HjFD9JFlyxNk1Ow2kGvGCIfDrZ0OI"]));
        assert!(built.claims.get("address").is_none());
    }

    #[test]
    fn equal_depth_keeps_declaration_order() {
        let built = build(
            document(),
            &policy(&[&["work_countries"], &["first_name"]]),
            &BuildOptions::with_salt("mockSalt"),
        )
        .expect("should build");

        assert_eq!(built.disclosures, vec![
            "WyJtb2NrU2FsdCIsIndvcmtfY291bnRyaWVzIixbIlNFIiwiRkkiXV0",
            "WyJtb2NrU2FsdCIsImZpcnN0X25hbWUiLCJKb2huIl0"
        ]);
        assert_eq!(
            built.claims["_sd"],
            json!([
                "bgoclU545vwovowO14hHsmkm6NWhjgnq6Mz7myRGUIc",
                "xq6gDUGEXZa83npxI5Enxu0pTdQ-Pr2_f20Bd2arexs"
            ])
        );
    }

    #[test]
    fn inert_rules() {
        let mut metadata = policy(&[&["first_name"], &["address"]]);
        metadata.claims[0].sd = SdRule::Never;
        metadata.claims[1].sd = SdRule::Allowed;

        let built = build(document(), &metadata, &BuildOptions::default()).expect("should build");
        assert!(built.disclosures.is_empty());

        let mut expected = document();
        expected.insert("_sd_alg".into(), json!("sha-256"));
        assert_eq!(built.claims, expected);
    }

    #[test]
    fn unresolved_path_fails() {
        let err = build(document(), &policy(&[&["address", "country"]]), &BuildOptions::default())
            .expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::Unresolved("$.address.country".into())));

        let err =
            build(document(), &policy(&[&["nickname", "short"]]), &BuildOptions::default())
                .expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::Unresolved("$.nickname.short".into())));
    }

    #[test]
    fn non_object_parent_fails() {
        let err =
            build(document(), &policy(&[&["first_name", "initial"]]), &BuildOptions::default())
                .expect_err("should fail");
        assert_eq!(
            err,
            crate::Error::from(PolicyError::NotAnObject("$.first_name.initial".into()))
        );
    }

    #[test]
    fn malformed_rules_fail() {
        let mut metadata = policy(&[&["address"]]);
        metadata.claims[0].path = vec![];
        let err = build(document(), &metadata, &BuildOptions::default()).expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::EmptyPath));

        metadata.claims[0].path = vec![Some("work_countries".into()), None];
        let err = build(document(), &metadata, &BuildOptions::default()).expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::NullSegment("$.work_countries.*".into())));

        let err = build(document(), &policy(&[&["_sd"]]), &BuildOptions::default())
            .expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::ReservedName("$._sd".into())));
    }

    #[test]
    fn reserved_input_fails() {
        let mut claims = document();
        claims.insert("nested".into(), json!({"_sd": []}));
        let err = build(claims, &policy(&[]), &BuildOptions::default()).expect_err("should fail");
        assert_eq!(err, crate::Error::from(InputError::ReservedClaim("_sd".into())));
    }

    // A repeated rule finds its claim already disclosed.
    #[test]
    fn repeated_rule_fails() {
        let claims = json!({"a": {"x": 1}}).as_object().cloned().expect("object");
        let mut metadata = policy(&[&["a", "x"]]);
        metadata.claims.push(ClaimMetadata::always(["a", "x"]));

        let err = build(claims, &metadata, &BuildOptions::with_salt("s")).expect_err("should fail");
        assert_eq!(err, crate::Error::from(PolicyError::Unresolved("$.a.x".into())));
    }

    // Same name and value under two parents with one salt: same digest.
    #[test]
    fn identical_disclosures_fail() {
        let claims = || json!({"a": {"x": 1}, "b": {"x": 1}}).as_object().cloned().expect("object");
        let metadata = policy(&[&["a", "x"], &["b", "x"]]);

        let err = build(claims(), &metadata, &BuildOptions::with_salt("mockSalt"))
            .expect_err("should fail");
        let digest = SdAlg::Sha256.digest("WyJtb2NrU2FsdCIsIngiLDFd");
        assert_eq!(err, crate::Error::from(IntegrityError::DuplicateDigest(digest)));

        let built = build(claims(), &metadata, &BuildOptions::default()).expect("should build");
        assert_eq!(built.disclosures.len(), 2);
        assert_ne!(built.disclosures[0], built.disclosures[1]);
    }

    #[test]
    fn sd_not_an_array_fails() {
        let mut claims = json!({"x": 1, "_sd": "digest"}).as_object().cloned().expect("object");
        let err = disclose(&mut claims, &["x"], &BuildOptions::default()).expect_err("should fail");
        assert_eq!(err, crate::Error::from(InputError::ReservedClaim("_sd".into())));
    }

    #[test]
    fn random_salts_are_distinct() {
        let built = build(
            document(),
            &policy(&[&["first_name"], &["address", "street"], &["address", "postal", "code"]]),
            &BuildOptions::default(),
        )
        .expect("should build");

        assert_eq!(built.disclosures.len(), 3);
        let salts = built
            .disclosures
            .iter()
            .map(|d| Disclosure::parse(d).expect("should parse").salt)
            .collect::<std::collections::BTreeSet<_>>();
        assert_eq!(salts.len(), 3);
    }

    #[test]
    fn decoys_added() {
        let options = BuildOptions { decoy_digests: 2, ..BuildOptions::default() };
        let built = build(document(), &policy(&[&["first_name"], &["address", "street"]]), &options)
            .expect("should build");

        let top = built.claims["_sd"].as_array().expect("array");
        let nested = built.claims["address"]["_sd"].as_array().expect("array");
        assert_eq!(top.len(), 3);
        assert_eq!(nested.len(), 3);
        assert!(built.claims["address"]["postal"].get("_sd").is_none());

        let mut sorted = top.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        assert_eq!(top, &sorted);
    }

    #[test]
    fn sd_alg_recorded() {
        let options = BuildOptions { sd_alg: SdAlg::Sha512, ..BuildOptions::default() };
        let built = build(document(), &policy(&[]), &options).expect("should build");
        assert_eq!(built.claims["_sd_alg"], "sha-512");
    }
}
