//! # Type Metadata
//!
//! Verifiable Credential Type Metadata (VCTM) for SD-JWT VCs. The metadata
//! describes a credential type: how to display it and, for each claim, where
//! the claim lives in the credential (`path`) and whether the issuer must
//! make it selectively disclosable (`sd`).
//!
//! See [SD-JWT VC Type Metadata].
//!
//! [SD-JWT VC Type Metadata]: https://www.ietf.org/archive/id/draft-ietf-oauth-sd-jwt-vc-10.html#name-type-metadata

use std::collections::BTreeMap;

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{InputError, PolicyError, Result};
use crate::{ARRAY_ITEM_CLAIM, REGISTERED_CLAIMS, SD_ALG_CLAIM, SD_CLAIM};

/// Credential type metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TypeMetadata {
    /// The credential type identifier, matching the credential's `vct` claim.
    pub vct: String,

    /// Human-readable name for developers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human-readable description for developers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Developer notes.
    #[serde(rename = "$comment")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Locale-specific display information.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<Display>,

    /// Claim rules, in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<ClaimMetadata>,

    /// URL of a JSON schema for the credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,

    /// Subresource integrity of `schema_url`.
    #[serde(rename = "schema_url#integrity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_url_integrity: Option<String>,

    /// URI of the type this type extends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Subresource integrity of `extends`.
    #[serde(rename = "extends#integrity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends_integrity: Option<String>,
}

/// Locale-specific credential display information.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Display {
    /// Language tag (RFC 5646).
    pub lang: String,

    /// Name for end users.
    pub name: String,

    /// Description for end users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Rendering methods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendering: Option<Rendering>,
}

/// Credential rendering methods.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Rendering {
    /// Simple rendering for wallets without SVG support.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple: Option<SimpleRendering>,

    /// SVG templates.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub svg_templates: Vec<SvgTemplate>,
}

/// Simple rendering properties.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimpleRendering {
    /// Logo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<Image>,

    /// Background image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<Image>,

    /// Background color (CSS color).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,

    /// Text color (CSS color).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
}

/// An image reference.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Image {
    /// Image URI.
    pub uri: String,

    /// Subresource integrity of `uri`.
    #[serde(rename = "uri#integrity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_integrity: Option<String>,

    /// Alternative text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// An SVG rendering template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SvgTemplate {
    /// Template URI.
    pub uri: String,

    /// Subresource integrity of `uri`.
    #[serde(rename = "uri#integrity")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_integrity: Option<String>,

    /// Template properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<SvgProperties>,
}

/// SVG template selection properties.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SvgProperties {
    /// `portrait` or `landscape`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,

    /// `light` or `dark`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<String>,

    /// `normal` or `high`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<String>,
}

/// Metadata for a single claim.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaimMetadata {
    /// Location of the claim in the credential. A `null` segment selects all
    /// elements of an array.
    pub path: Vec<Option<String>>,

    /// Locale-specific labels.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display: Vec<ClaimDisplay>,

    /// Selective disclosure rule.
    pub sd: SdRule,

    /// Whether the claim must be present in the credential.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mandatory: bool,

    /// Placeholder identifier used by SVG templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svg_id: Option<String>,
}

/// Locale-specific claim label.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClaimDisplay {
    /// Language tag (RFC 5646).
    pub lang: String,

    /// Label for end users.
    pub label: String,

    /// Description for end users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Selective disclosure rule for a claim.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SdRule {
    /// The issuer must make the claim selectively disclosable.
    Always,

    /// The issuer must not make the claim selectively disclosable.
    Never,

    /// The issuer may make the claim selectively disclosable. Has no effect
    /// when building a credential.
    #[default]
    Allowed,
}

/// JSON paths of the claims described by type metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaimPaths {
    /// Paths of claims with an `svg_id`, keyed by `svg_id`.
    pub displayable: BTreeMap<String, String>,

    /// Paths of all claims, in declaration order.
    pub all_claims: Vec<String>,
}

impl ClaimPaths {
    /// The values of displayable claims, keyed by `svg_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Unresolved`] if a displayable claim is missing
    /// from `claims`.
    pub fn extract(&self, claims: &Map<String, Value>) -> Result<Map<String, Value>> {
        extract_claims(claims, &self.displayable)
    }
}

/// Extract claim values by JSON path, keyed by label.
///
/// Paths take the form produced by [`ClaimMetadata::json_path`]: `$` followed
/// by `.`-separated segments. A numeric segment indexes an array and `*`
/// selects every element (or object member), yielding an array of matches.
///
/// # Errors
///
/// Returns [`PolicyError::Unresolved`] naming the first path that does not
/// resolve.
pub fn extract_claims(
    claims: &Map<String, Value>, paths: &BTreeMap<String, String>,
) -> Result<Map<String, Value>> {
    let mut extracted = Map::new();
    for (label, path) in paths {
        let unresolved = || PolicyError::Unresolved(path.clone());
        let segments: Vec<&str> = match path.strip_prefix('$').ok_or_else(unresolved)? {
            "" => vec![],
            rest => rest.strip_prefix('.').ok_or_else(unresolved)?.split('.').collect(),
        };
        let Some((first, rest)) = segments.split_first() else {
            extracted.insert(label.clone(), Value::Object(claims.clone()));
            continue;
        };
        let value = if *first == "*" {
            Some(Value::Array(claims.values().filter_map(|v| select(v, rest)).collect()))
        } else {
            claims.get(*first).and_then(|v| select(v, rest))
        };
        extracted.insert(label.clone(), value.ok_or_else(unresolved)?);
    }
    Ok(extracted)
}

fn select(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    if *first == "*" {
        let matches: Vec<Value> = match value {
            Value::Array(items) => items.iter().filter_map(|v| select(v, rest)).collect(),
            Value::Object(object) => object.values().filter_map(|v| select(v, rest)).collect(),
            _ => return None,
        };
        return Some(Value::Array(matches));
    }
    let child = match value {
        Value::Object(object) => object.get(*first)?,
        Value::Array(items) => items.get(first.parse::<usize>().ok()?)?,
        _ => return None,
    };
    select(child, rest)
}

impl TypeMetadata {
    /// Base64url-encoded JSON metadata, suitable for the `vctm` JWS header.
    #[must_use]
    pub fn encode(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        Base64UrlUnpadded::encode_string(&bytes)
    }

    /// Decode base64url-encoded JSON metadata.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the value is not base64url-encoded
    /// metadata.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| InputError::InvalidBase64("vctm".into()))?;
        let metadata = serde_json::from_slice(&bytes).map_err(|e| InputError::InvalidJson {
            context: "vctm".into(),
            message: e.to_string(),
        })?;
        Ok(metadata)
    }

    /// The JSON paths of all claims, and of displayable claims by `svg_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoClaims`] when the metadata has no claims.
    pub fn claim_json_paths(&self) -> Result<ClaimPaths> {
        if self.claims.is_empty() {
            return Err(PolicyError::NoClaims.into());
        }

        let mut paths = ClaimPaths::default();
        for claim in &self.claims {
            let path = claim.json_path();
            if let Some(svg_id) = &claim.svg_id {
                paths.displayable.insert(svg_id.clone(), path.clone());
            }
            paths.all_claims.push(path);
        }
        Ok(paths)
    }

    /// Claim path segments keyed by language, then by display label.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        let mut attributes: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for claim in &self.claims {
            for display in &claim.display {
                let segments = attributes
                    .entry(display.lang.clone())
                    .or_default()
                    .entry(display.label.clone())
                    .or_default();
                segments.extend(claim.path.iter().flatten().cloned());
            }
        }
        attributes
    }

    /// Check that every mandatory claim is present in `claims`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Unresolved`] naming the first missing claim.
    pub fn check_mandatory(&self, claims: &Map<String, Value>) -> Result<()> {
        for claim in self.claims.iter().filter(|c| c.mandatory) {
            if claim.resolve(claims).is_none() {
                return Err(PolicyError::Unresolved(claim.json_path()).into());
            }
        }
        Ok(())
    }

    /// Check mandatory claims and, when `strict`, that every top-level claim
    /// in `claims` is described by a claim rule. Registered JWT claims and
    /// selective disclosure claims are always allowed.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Unresolved`] for a missing mandatory claim and
    /// [`PolicyError::UndeclaredClaim`] for a claim no rule describes.
    pub fn check_claim_paths(&self, claims: &Map<String, Value>, strict: bool) -> Result<()> {
        self.check_mandatory(claims)?;
        if !strict {
            return Ok(());
        }

        let declared = self
            .claims
            .iter()
            .filter_map(|claim| claim.path.first()?.as_deref())
            .collect::<Vec<_>>();
        for name in claims.keys() {
            let name = name.as_str();
            if REGISTERED_CLAIMS.contains(&name)
                || [SD_CLAIM, SD_ALG_CLAIM, ARRAY_ITEM_CLAIM].contains(&name)
            {
                continue;
            }
            if !declared.contains(&name) {
                return Err(PolicyError::UndeclaredClaim(name.to_string()).into());
            }
        }
        Ok(())
    }
}

impl ClaimMetadata {
    /// Create an `always` disclosable claim rule from path segments.
    pub fn always<S: Into<String>>(path: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into_iter().map(|s| Some(s.into())).collect(),
            sd: SdRule::Always,
            ..Self::default()
        }
    }

    /// The claim path as a JSON path expression, e.g. `$.address.street`.
    /// `null` segments render as `*`.
    #[must_use]
    pub fn json_path(&self) -> String {
        let segments =
            self.path.iter().map(|s| s.as_deref().unwrap_or("*")).collect::<Vec<_>>().join(".");
        format!("$.{segments}")
    }

    // Walk the claim path through nested objects.
    fn resolve<'a>(&self, claims: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.path.split_first()?;
        let mut current = claims.get(first.as_deref()?)?;
        for segment in rest {
            current = current.as_object()?.get(segment.as_deref()?)?;
        }
        Some(current)
    }
}
