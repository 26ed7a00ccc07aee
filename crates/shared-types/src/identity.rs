//! # Node Identity
//!
//! ed25519 keys. The node signs chain transactions with its own key; client
//! write markers are checked against the allocation owner's public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::errors::IdentityError;

/// The blobber's signing identity.
#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("id", &self.id())
            .finish()
    }
}

impl NodeIdentity {
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Fresh random identity.
    pub fn generate() -> Self {
        Self::from_secret(rand::random())
    }

    /// Parse a keys file: first line public key hex, second line secret key hex.
    pub fn from_keys_file(contents: &str) -> Result<Self, IdentityError> {
        let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
        let public = lines
            .next()
            .ok_or_else(|| IdentityError::InvalidKey("missing public key".into()))?;
        let secret = lines
            .next()
            .ok_or_else(|| IdentityError::InvalidKey("missing secret key".into()))?;

        let identity = Self::from_secret(decode_32(secret)?);
        if identity.public_key() != decode_32(public)? {
            return Err(IdentityError::KeyMismatch);
        }
        Ok(identity)
    }

    /// Render as a keys file.
    pub fn to_keys_file(&self) -> String {
        format!(
            "{}\n{}\n",
            hex::encode(self.public_key()),
            hex::encode(self.signing_key.to_bytes())
        )
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Client id: hex SHA-256 of the public key.
    pub fn id(&self) -> String {
        hex::encode(Sha256::digest(self.public_key()))
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

fn decode_32(s: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(s).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidKey("expected 32 bytes".into()))
}

/// Verify an ed25519 signature against a raw public key.
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::MalformedSignature)?;
    key.verify(message, &signature)
        .map_err(|_| IdentityError::BadSignature)
}
