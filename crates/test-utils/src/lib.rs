//! # Test Fixtures
//!
//! Deterministic issuer and holder signers plus a sample credential type for
//! engine tests.

use anyhow::Result;
use credibil_sd_jwt::{Algorithm, PublicKey, Signer, TypeMetadata};
use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::Signer as _;
use serde_json::{Map, Value};

const PDA1_METADATA: &[u8] = include_bytes!("../data/pda1-metadata.json");
const PDA1_CLAIMS: &[u8] = include_bytes!("../data/pda1-claims.json");

/// P-256 private scalar of the issuer key used to sign the fixture token.
const ISSUER_KEY: &[u8; 32] = b"12345678901234567890123456789012";

/// The issuer's verification key, PEM encoded.
pub const ISSUER_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEYiPlXIq3VAfGMMoVzAKB2wYLy0e5
n9nYkjmAbBCIdBt3Y/xPJSWYzWOinXJQf58cFheBuKMXQhjh88DttBm4MQ==
-----END PUBLIC KEY-----";

/// A P-256 key unrelated to the issuer.
pub const OTHER_PEM: &str = "-----BEGIN PUBLIC KEY-----
MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEcyViIENmqo4D2CVOc2uGZbe5a8Nh
eCyvN9CsF7ui3tlcDSVVeCOBnMVMPCSd1kSj7NWv2J47atj0caKJpoBKiA==
-----END PUBLIC KEY-----";

/// Credential issuer signing with ES256.
#[derive(Clone, Debug)]
pub struct Issuer {
    signing_key: p256::ecdsa::SigningKey,
}

impl Issuer {
    #[must_use]
    pub fn new() -> Self {
        let signing_key =
            p256::ecdsa::SigningKey::from_slice(ISSUER_KEY).expect("should create signing key");
        Self { signing_key }
    }
}

impl Default for Issuer {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for Issuer {
    fn algorithm(&self) -> Algorithm {
        Algorithm::ES256
    }

    fn key_id(&self) -> Option<String> {
        Some("default_signing_key_id".into())
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::P256(p256::ecdsa::VerifyingKey::from(&self.signing_key))
    }

    fn try_sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let signature: p256::ecdsa::Signature = self.signing_key.try_sign(msg)?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// Credential holder signing key-binding JWTs with `EdDSA`.
#[derive(Clone, Debug)]
pub struct Holder {
    signing_key: ed25519_dalek::SigningKey,
}

impl Holder {
    #[must_use]
    pub fn new() -> Self {
        Self::from_seed([42; 32])
    }

    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { signing_key: ed25519_dalek::SigningKey::from_bytes(&seed) }
    }
}

impl Default for Holder {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for Holder {
    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.signing_key.verifying_key())
    }

    fn try_sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(msg).to_bytes().to_vec())
    }
}

/// Type metadata for the sample PDA1 credential.
#[must_use]
pub fn pda1_metadata() -> TypeMetadata {
    serde_json::from_slice(PDA1_METADATA).expect("should deserialize")
}

/// Claims for the sample PDA1 credential.
#[must_use]
pub fn pda1_claims() -> Map<String, Value> {
    serde_json::from_slice(PDA1_CLAIMS).expect("should deserialize")
}

/// Log to stdout, filtered by `RUST_LOG`.
pub fn init_tracer() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
