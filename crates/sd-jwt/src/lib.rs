//! # SD-JWT
//!
//! Selective-disclosure credential engine based on
//! [Selective Disclosure for JWTs (SD-JWT)](https://www.rfc-editor.org/rfc/rfc9901)
//! and [SD-JWT-based Verifiable Credentials](https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc).
//!
//! The engine:
//!
//! * replaces claims with salted digests according to the claim rules of a
//!   credential's type metadata ([`build`]),
//! * serializes and parses the compact `~`-separated token form ([`combine`],
//!   [`split`]),
//! * re-inserts disclosed claims into a credential body ([`reconstruct`]),
//! * verifies issuer signatures and key-binding JWTs ([`validate`],
//!   [`verify`]).
//!
//! [`SdJwtVcBuilder`] and [`SdJwtVpBuilder`] wrap the engine for issuers and
//! holders respectively.

pub mod builder;
pub mod disclosure;
pub mod error;
pub mod issue;
pub mod jose;
pub mod metadata;
pub mod present;
pub mod reconstruct;
pub mod serialize;
pub mod validate;

pub use crate::builder::{BuildOptions, Built, Salt, build};
pub use crate::disclosure::{Disclosure, SdAlg};
pub use crate::error::{Error, Result};
pub use crate::issue::{IssuanceConfig, SdJwtVcBuilder};
pub use crate::jose::{Algorithm, JwtType, PublicKey, PublicKeyJwk, Signer};
pub use crate::metadata::{ClaimMetadata, ClaimPaths, SdRule, TypeMetadata, extract_claims};
pub use crate::present::{KbJwtClaims, SdJwtVpBuilder};
pub use crate::reconstruct::{Credential, construct, reconstruct};
pub use crate::serialize::{SplitToken, combine, combine_with_key_binding, split};
pub use crate::validate::{Verified, VerifyOptions, validate, verify, verify_key_binding};

/// Claim holding the digests of an object's selectively disclosable claims.
pub const SD_CLAIM: &str = "_sd";

/// Claim naming the digest algorithm.
pub const SD_ALG_CLAIM: &str = "_sd_alg";

/// Key of the placeholder object standing in for a disclosable array element.
pub const ARRAY_ITEM_CLAIM: &str = "...";

/// JWT claims set by the issuer rather than taken from the claims document.
pub const REGISTERED_CLAIMS: [&str; 10] =
    ["iss", "sub", "aud", "exp", "nbf", "iat", "jti", "vct", "cnf", "status"];
