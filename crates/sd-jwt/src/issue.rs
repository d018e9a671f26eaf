//! # SD-JWT VC Issuance
//!
//! Issues an IETF `dc+sd-jwt` credential: claims named by the type metadata
//! as always disclosable are replaced with digests, registered claims are
//! added, and the result is signed by the issuer.
//!
//! [I-D.ietf-oauth-sd-jwt-vc]: https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::instrument;
use uuid::Uuid;

use crate::builder::{self, BuildOptions};
use crate::disclosure::SdAlg;
use crate::error::{InputError, PolicyError, Result};
use crate::jose::{self, JwtType, PublicKeyJwk, Signer};
use crate::metadata::{SdRule, TypeMetadata};
use crate::{REGISTERED_CLAIMS, serialize};

/// Issuance settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct IssuanceConfig {
    /// Days from issuance until the credential expires. Must not be negative.
    pub expiration_days: i64,

    /// The issuer JWT `typ` header.
    pub typ: JwtType,

    /// Digest algorithm for `_sd` digests.
    pub sd_alg: SdAlg,

    /// Number of decoy digests to add to each `_sd` array.
    pub decoy_digests: usize,

    /// Embed the type metadata in the `vctm` header.
    pub embed_metadata: bool,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            expiration_days: 365,
            typ: JwtType::SdJwt,
            sd_alg: SdAlg::Sha256,
            decoy_digests: 0,
            embed_metadata: true,
        }
    }
}

/// Generate an IETF `dc+sd-jwt` format credential.
#[derive(Debug)]
pub struct SdJwtVcBuilder<M, I, C, S> {
    metadata: M,
    issuer: I,
    claims: C,
    key_binding: Option<PublicKeyJwk>,
    holder: Option<String>,
    status: Option<Value>,
    config: IssuanceConfig,
    signer: S,
}

/// Builder has no type metadata.
#[doc(hidden)]
pub struct NoMetadata;
/// Builder has type metadata.
#[doc(hidden)]
pub struct HasMetadata(TypeMetadata);

/// Builder has no issuer.
#[doc(hidden)]
pub struct NoIssuer;
/// Builder has issuer.
#[doc(hidden)]
pub struct HasIssuer(String);

/// Builder has no claims.
#[doc(hidden)]
pub struct NoClaims;
/// Builder has claims.
#[doc(hidden)]
pub struct HasClaims(Map<String, Value>);

/// Builder has no signer.
#[doc(hidden)]
pub struct NoSigner;
/// Builder state has a signer.
#[doc(hidden)]
pub struct HasSigner<'a, S: Signer>(pub &'a S);

impl Default for SdJwtVcBuilder<NoMetadata, NoIssuer, NoClaims, NoSigner> {
    fn default() -> Self {
        Self::new()
    }
}

impl SdJwtVcBuilder<NoMetadata, NoIssuer, NoClaims, NoSigner> {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: NoMetadata,
            issuer: NoIssuer,
            claims: NoClaims,
            key_binding: None,
            holder: None,
            status: None,
            config: IssuanceConfig::default(),
            signer: NoSigner,
        }
    }
}

// Type metadata
impl<I, C, S> SdJwtVcBuilder<NoMetadata, I, C, S> {
    /// Set the credential type metadata. The metadata `vct` becomes the
    /// credential `vct` claim and its claim rules drive selective disclosure.
    #[must_use]
    pub fn metadata(self, metadata: TypeMetadata) -> SdJwtVcBuilder<HasMetadata, I, C, S> {
        SdJwtVcBuilder {
            metadata: HasMetadata(metadata),
            issuer: self.issuer,
            claims: self.claims,
            key_binding: self.key_binding,
            holder: self.holder,
            status: self.status,
            config: self.config,
            signer: self.signer,
        }
    }
}

// Issuer
impl<M, C, S> SdJwtVcBuilder<M, NoIssuer, C, S> {
    /// Set the credential issuer (the `iss` claim).
    #[must_use]
    pub fn issuer(self, issuer: impl Into<String>) -> SdJwtVcBuilder<M, HasIssuer, C, S> {
        SdJwtVcBuilder {
            metadata: self.metadata,
            issuer: HasIssuer(issuer.into()),
            claims: self.claims,
            key_binding: self.key_binding,
            holder: self.holder,
            status: self.status,
            config: self.config,
            signer: self.signer,
        }
    }
}

// Claims
impl<M, I, S> SdJwtVcBuilder<M, I, NoClaims, S> {
    /// Set the credential claims.
    #[must_use]
    pub fn claims(self, claims: Map<String, Value>) -> SdJwtVcBuilder<M, I, HasClaims, S> {
        SdJwtVcBuilder {
            metadata: self.metadata,
            issuer: self.issuer,
            claims: HasClaims(claims),
            key_binding: self.key_binding,
            holder: self.holder,
            status: self.status,
            config: self.config,
            signer: self.signer,
        }
    }
}

// Optional fields
impl<M, I, C, S> SdJwtVcBuilder<M, I, C, S> {
    /// Bind the credential to the holder's public key (the `cnf` claim).
    #[must_use]
    pub fn key_binding(mut self, jwk: PublicKeyJwk) -> Self {
        self.key_binding = Some(jwk);
        self
    }

    /// Set the credential Holder (the `sub` claim).
    #[must_use]
    pub fn holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Set the credential status.
    #[must_use]
    pub fn status(mut self, status: Value) -> Self {
        self.status = Some(status);
        self
    }

    /// Override the default issuance settings.
    #[must_use]
    pub fn config(mut self, config: IssuanceConfig) -> Self {
        self.config = config;
        self
    }
}

// Signature
impl<M, I, C> SdJwtVcBuilder<M, I, C, NoSigner> {
    /// Set the issuer's signer.
    #[must_use]
    pub fn signer<S: Signer>(self, signer: &'_ S) -> SdJwtVcBuilder<M, I, C, HasSigner<'_, S>> {
        SdJwtVcBuilder {
            metadata: self.metadata,
            issuer: self.issuer,
            claims: self.claims,
            key_binding: self.key_binding,
            holder: self.holder,
            status: self.status,
            config: self.config,
            signer: HasSigner(signer),
        }
    }
}

impl<S: Signer> SdJwtVcBuilder<HasMetadata, HasIssuer, HasClaims, HasSigner<'_, S>> {
    /// Build the SD-JWT credential, returning a compact SD-JWT with the format
    /// `<Issuer-signed JWT>~<Disclosure 1>~<Disclosure 2>~...~`.
    ///
    /// # Errors
    ///
    /// Returns a `PolicyError` if a mandatory claim is missing or a disclosure
    /// rule cannot be applied or targets a registered claim, an `InputError`
    /// if the claims use a reserved or registered name or the expiry is out of
    /// range, and a `CryptoError` if signing fails.
    #[instrument(level = "debug", skip_all, fields(vct = %self.metadata.0.vct))]
    pub fn build(self) -> Result<String> {
        let metadata = self.metadata.0;
        check_registered(&self.claims.0, &metadata)?;
        metadata.check_mandatory(&self.claims.0)?;

        let now = Utc::now();
        let expires = TimeDelta::try_days(self.config.expiration_days)
            .filter(|_| self.config.expiration_days >= 0)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| InputError::OutOfRange("expiration_days".into()))?;

        let options = BuildOptions {
            sd_alg: self.config.sd_alg,
            decoy_digests: self.config.decoy_digests,
            ..BuildOptions::default()
        };
        let built = builder::build(self.claims.0, &metadata, &options)?;

        // registered claims are never selectively disclosable
        let mut claims = built.claims;
        claims.insert("iss".into(), Value::String(self.issuer.0));
        claims.insert("iat".into(), json!(now.timestamp()));
        claims.insert("nbf".into(), json!(now.timestamp()));
        claims.insert("exp".into(), json!(expires.timestamp()));
        claims.insert("jti".into(), Value::String(Uuid::new_v4().to_string()));
        claims.insert("vct".into(), Value::String(metadata.vct.clone()));
        if let Some(jwk) = self.key_binding {
            claims.insert("cnf".into(), json!({"jwk": jwk}));
        }
        if let Some(holder) = self.holder {
            claims.insert("sub".into(), Value::String(holder));
        }
        if let Some(status) = self.status {
            claims.insert("status".into(), status);
        }

        let mut header = Map::new();
        header.insert("typ".into(), Value::String(self.config.typ.into()));
        if self.config.embed_metadata {
            header.insert("vctm".into(), json!([metadata.encode()]));
        }
        let jwt = jose::encode_jws(header, &claims, self.signer.0)?;
        tracing::debug!(disclosures = built.disclosures.len(), "issued credential");

        Ok(serialize::combine(&jwt, &built.disclosures, None))
    }
}

// Registered claims are set by the issuer. The document must not supply them
// and no rule may make them disclosable.
fn check_registered(claims: &Map<String, Value>, metadata: &TypeMetadata) -> Result<()> {
    for rule in metadata.claims.iter().filter(|rule| rule.sd == SdRule::Always) {
        if let Some(Some(name)) = rule.path.first()
            && REGISTERED_CLAIMS.contains(&name.as_str())
        {
            return Err(PolicyError::ReservedName(rule.json_path()).into());
        }
    }
    if let Some(name) = claims.keys().find(|name| REGISTERED_CLAIMS.contains(&name.as_str())) {
        return Err(InputError::ReservedClaim(name.clone()).into());
    }
    Ok(())
}
