//! # JOSE
//!
//! Compact JWS signing and verification for issuer-signed JWTs and
//! key-binding JWTs. Signing is delegated to a [`Signer`] so private keys
//! never pass through the engine.

use std::fmt;
use std::str::FromStr;

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::Verifier as _;
use p256::ecdsa::signature::Verifier as _;
use p256::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CryptoError, Error, InputError, Result};
use crate::serialize::{decode_segment, encode_segment};

/// Signs JWTs on behalf of an issuer or holder.
pub trait Signer {
    /// The signing algorithm.
    fn algorithm(&self) -> Algorithm;

    /// The key identifier to place in the JWS `kid` header.
    fn key_id(&self) -> Option<String> {
        None
    }

    /// The public key corresponding to the signing key.
    fn public_key(&self) -> PublicKey;

    /// Sign `msg`, returning the raw JWS signature (`r || s` for ECDSA).
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be signed.
    fn try_sign(&self, msg: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Supported JWS algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Algorithm {
    /// ECDSA using P-256 and SHA-256.
    #[default]
    ES256,

    /// `EdDSA` using Ed25519.
    EdDSA,
}

impl Algorithm {
    /// The JWS `alg` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::EdDSA => "EdDSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ES256" => Ok(Self::ES256),
            "EdDSA" => Ok(Self::EdDSA),
            _ => Err(CryptoError::UnsupportedAlgorithm(s.to_string()).into()),
        }
    }
}

/// JWT `typ` header values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum JwtType {
    /// SD-JWT VC.
    #[default]
    #[serde(rename = "dc+sd-jwt")]
    SdJwt,

    /// SD-JWT VC, pre-draft-09 media type.
    #[serde(rename = "vc+sd-jwt")]
    VcSdJwt,

    /// Key-binding JWT.
    #[serde(rename = "kb+jwt")]
    KbJwt,
}

impl JwtType {
    /// The `typ` header value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SdJwt => "dc+sd-jwt",
            Self::VcSdJwt => "vc+sd-jwt",
            Self::KbJwt => "kb+jwt",
        }
    }
}

impl From<JwtType> for String {
    fn from(t: JwtType) -> Self {
        t.as_str().to_string()
    }
}

/// A public key in JWK form (RFC 7517).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key type: `EC` or `OKP`.
    pub kty: String,

    /// Curve: `P-256` or `Ed25519`.
    pub crv: String,

    /// Base64url-encoded x coordinate (or Ed25519 public key).
    pub x: String,

    /// Base64url-encoded y coordinate (EC keys only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Key identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// A signature verification key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    /// P-256 ECDSA key.
    P256(p256::ecdsa::VerifyingKey),

    /// Ed25519 key.
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// The JWS algorithm implied by the key type.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        match self {
            Self::P256(_) => Algorithm::ES256,
            Self::Ed25519(_) => Algorithm::EdDSA,
        }
    }

    /// Parse a PEM-encoded (SPKI) P-256 public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the PEM cannot be parsed.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = p256::PublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::P256(p256::ecdsa::VerifyingKey::from(&key)))
    }

    /// Verify a raw JWS signature over `msg`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not
    /// verify.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> Result<()> {
        let verified = match self {
            Self::P256(key) => p256::ecdsa::Signature::from_slice(signature)
                .is_ok_and(|sig| key.verify(msg, &sig).is_ok()),
            Self::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .is_ok_and(|sig| key.verify(msg, &sig).is_ok()),
        };
        if !verified {
            return Err(CryptoError::InvalidSignature.into());
        }
        Ok(())
    }

    /// The key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> PublicKeyJwk {
        match self {
            Self::P256(key) => {
                let point = key.to_encoded_point(false);
                let encode = |c: Option<&p256::FieldBytes>| {
                    c.map(|c| Base64UrlUnpadded::encode_string(c)).unwrap_or_default()
                };
                PublicKeyJwk {
                    kty: "EC".into(),
                    crv: "P-256".into(),
                    x: encode(point.x()),
                    y: Some(encode(point.y())),
                    kid: None,
                }
            }
            Self::Ed25519(key) => PublicKeyJwk {
                kty: "OKP".into(),
                crv: "Ed25519".into(),
                x: Base64UrlUnpadded::encode_string(key.as_bytes()),
                y: None,
                kid: None,
            },
        }
    }
}

impl TryFrom<&PublicKeyJwk> for PublicKey {
    type Error = Error;

    fn try_from(jwk: &PublicKeyJwk) -> Result<Self> {
        let coordinate = |c: &str| -> Result<[u8; 32]> {
            let bytes = Base64UrlUnpadded::decode_vec(c)
                .map_err(|_| CryptoError::InvalidKey("invalid base64url coordinate".into()))?;
            bytes.try_into().map_err(|_| {
                CryptoError::InvalidKey("coordinate must be 32 bytes".into()).into()
            })
        };

        match (jwk.kty.as_str(), jwk.crv.as_str()) {
            ("EC", "P-256") => {
                let Some(y) = &jwk.y else {
                    return Err(CryptoError::InvalidKey("missing y coordinate".into()).into());
                };
                let x = coordinate(&jwk.x)?;
                let y = coordinate(y)?;
                let point = p256::EncodedPoint::from_affine_coordinates(
                    &x.into(),
                    &y.into(),
                    false,
                );
                let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Ok(Self::P256(key))
            }
            ("OKP", "Ed25519") => {
                let x = coordinate(&jwk.x)?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&x)
                    .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
                Ok(Self::Ed25519(key))
            }
            (kty, crv) => {
                Err(CryptoError::InvalidKey(format!("unsupported key type {kty}/{crv}")).into())
            }
        }
    }
}

/// A verified JWS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Jws {
    /// The protected header.
    pub header: Map<String, Value>,

    /// The payload claims.
    pub claims: Map<String, Value>,
}

/// Sign `claims` as a compact JWS. The `alg` header, and `kid` when the
/// signer has one, are set from `signer`.
///
/// # Errors
///
/// Returns [`CryptoError::Signing`] if the signer fails.
pub fn encode_jws(
    mut header: Map<String, Value>, claims: &impl Serialize, signer: &impl Signer,
) -> Result<String> {
    header.insert("alg".into(), Value::String(signer.algorithm().to_string()));
    if let Some(kid) = signer.key_id() {
        header.entry("kid").or_insert(Value::String(kid));
    }

    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
    let signature = signer
        .try_sign(signing_input.as_bytes())
        .map_err(|e| CryptoError::Signing(format!("{e:#}")))?;

    Ok(format!("{signing_input}.{}", Base64UrlUnpadded::encode_string(&signature)))
}

/// Verify a compact JWS with `key`.
///
/// # Errors
///
/// Returns an [`InputError`] if the JWS is malformed and a [`CryptoError`]
/// if its `alg` is unsupported or does not match `key`, or the signature
/// does not verify.
pub fn verify_jws(jwt: &str, key: &PublicKey) -> Result<Jws> {
    let parts = jwt.split('.').collect::<Vec<_>>();
    let &[header_b64, claims_b64, signature_b64] = parts.as_slice() else {
        return Err(InputError::MalformedJwt(parts.len()).into());
    };

    let header = decode_segment(header_b64, "header")?;
    let alg = header.get("alg").and_then(Value::as_str).unwrap_or_default();
    if alg.parse::<Algorithm>()? != key.algorithm() {
        return Err(CryptoError::AlgorithmMismatch(alg.to_string()).into());
    }

    let signature = Base64UrlUnpadded::decode_vec(signature_b64)
        .map_err(|_| InputError::InvalidBase64("signature".into()))?;
    key.verify(format!("{header_b64}.{claims_b64}").as_bytes(), &signature)?;

    let claims = decode_segment(claims_b64, "body")?;
    Ok(Jws { header, claims })
}
