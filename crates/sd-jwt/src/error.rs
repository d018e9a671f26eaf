//! # Engine Errors
//!
//! Every engine operation returns a [`Result`] whose error is one of four
//! categories: malformed input, unresolvable disclosure policy, cryptographic
//! failure, or a broken disclosure-set integrity guarantee.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T, E = Error> = anyhow::Result<T, E>;

/// Top-level engine error.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The token, segment, or document supplied was malformed.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A disclosure rule could not be applied to the claims document.
    #[error(transparent)]
    PolicyResolution(#[from] PolicyError),

    /// Signing or signature verification failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The disclosure set is inconsistent with the credential body.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Malformed external input.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum InputError {
    /// The token is the empty string.
    #[error("token is empty")]
    EmptyToken,

    /// The issuer-signed JWT does not have exactly three segments.
    #[error("malformed JWT: expected 3 segments, found {0}")]
    MalformedJwt(usize),

    /// The trailing token segment is neither empty nor a compact JWT.
    #[error("malformed key-binding JWT")]
    MalformedKeyBinding,

    /// An empty disclosure was found between two separators.
    #[error("empty disclosure at position {0}")]
    EmptyDisclosure(usize),

    /// A segment is not valid base64url (without padding).
    #[error("invalid base64url in {0}")]
    InvalidBase64(String),

    /// A segment does not contain valid JSON.
    #[error("invalid JSON in {context}: {message}")]
    InvalidJson {
        /// The segment being decoded.
        context: String,
        /// Parser message.
        message: String,
    },

    /// A value expected to be a JSON object was something else.
    #[error("{0} is not a JSON object")]
    NotAnObject(String),

    /// A disclosure does not decode to a well-formed disclosure array.
    #[error("malformed disclosure: {0}")]
    MalformedDisclosure(String),

    /// The claims document already uses a reserved claim name.
    #[error("claims document contains reserved claim `{0}`")]
    ReservedClaim(String),

    /// A configured time value cannot be represented.
    #[error("`{0}` is out of range")]
    OutOfRange(String),
}

/// A disclosure rule could not be applied.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// The rule has no path segments.
    #[error("claim rule has an empty path")]
    EmptyPath,

    /// The rule path contains a `null` segment, which cannot be disclosed.
    #[error("claim rule path `{0}` contains a null segment")]
    NullSegment(String),

    /// The rule path does not resolve to a value in the claims document.
    #[error("claim path `{0}` does not resolve")]
    Unresolved(String),

    /// An intermediate path segment resolves to a non-object value.
    #[error("claim path `{0}` traverses a non-object value")]
    NotAnObject(String),

    /// The rule targets a reserved claim name.
    #[error("claim path `{0}` targets a reserved claim name")]
    ReservedName(String),

    /// The type metadata has no claims.
    #[error("type metadata has no claims")]
    NoClaims,

    /// A claim in the document is not described by the type metadata.
    #[error("claim `{0}` is not defined in the type metadata")]
    UndeclaredClaim(String),
}

/// Cryptographic failure.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The JWS `alg` is not supported.
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    /// The JWS `alg` does not match the verification key.
    #[error("algorithm `{0}` does not match verification key")]
    AlgorithmMismatch(String),

    /// The key could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The signature does not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The signer failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Disclosure-set integrity failure.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    /// Two disclosures in the token are byte-identical.
    #[error("duplicate disclosure `{0}`")]
    DuplicateDisclosure(String),

    /// A disclosure digest does not appear anywhere in the credential.
    #[error("disclosure `{0}` matches no digest")]
    OrphanDisclosure(String),

    /// An `_sd` array contains the same digest twice.
    #[error("digest `{0}` appears more than once")]
    DuplicateDigest(String),

    /// A digest is referenced from more than one place in the claim tree.
    #[error("digest `{0}` is referenced more than once")]
    DigestReused(String),

    /// A disclosed claim name already exists at its insertion point.
    #[error("disclosed claim `{0}` collides with an existing claim")]
    ClaimCollision(String),

    /// An object-property disclosure was found in an array, or vice versa.
    #[error("disclosure `{0}` has the wrong kind for its position")]
    DisclosureKindMismatch(String),

    /// The `_sd_alg` claim names an unsupported hash algorithm.
    #[error("unsupported `_sd_alg` `{0}`")]
    UnsupportedSdAlg(String),

    /// The JWT `typ` header is not the expected type.
    #[error("unexpected `typ` header `{0}`")]
    UnexpectedType(String),

    /// A required claim is missing from the credential.
    #[error("required claim `{0}` is missing")]
    MissingClaim(String),

    /// The credential `exp` time has passed.
    #[error("credential expired")]
    Expired,

    /// The credential `nbf` or `iat` time is in the future.
    #[error("credential is not yet valid")]
    NotYetValid,

    /// The key-binding JWT is missing or does not match the presentation.
    #[error("key binding: {0}")]
    KeyBinding(String),
}

/// Construct an `IntegrityError::KeyBinding` error from a format string.
macro_rules! key_binding {
    ($($arg:tt)*) => {
        $crate::error::Error::Integrity($crate::error::IntegrityError::KeyBinding(format!($($arg)*)))
    };
}
pub(crate) use key_binding;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_wrap_transparently() {
        let err: Error = InputError::EmptyToken.into();
        assert_eq!(err.to_string(), "token is empty");
        assert!(matches!(err, Error::Input(InputError::EmptyToken)));

        let err: Error = IntegrityError::DuplicateDisclosure("abc".into()).into();
        assert_eq!(err.to_string(), "duplicate disclosure `abc`");
    }

    #[test]
    fn key_binding_macro() {
        let err = key_binding!("`nonce` {} is invalid", "n-1");
        assert_eq!(
            err,
            Error::Integrity(IntegrityError::KeyBinding("`nonce` n-1 is invalid".into()))
        );
    }
}
