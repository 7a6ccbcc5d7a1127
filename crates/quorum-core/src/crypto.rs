//! Public key and signature primitives
//!
//! The curve math itself is delegated to `k256`; this module only handles
//! encodings and verification of shares submitted by participants.

use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature as K256Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{QuorumError, Result};
use crate::types::{hex_bytes_33, Hash, ValAddress};

/// Compressed secp256k1 public key (33 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_bytes_33")] pub [u8; 33]);

impl PublicKey {
    pub fn new(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    /// Parse a public key of arbitrary length, as returned by the signature backend
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 33] = bytes.try_into().map_err(|_| {
            QuorumError::Validation(format!(
                "public key must be 33 bytes compressed, got {} bytes",
                bytes.len()
            ))
        })?;
        let key = Self(bytes);
        key.validate_basic()?;
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| QuorumError::Validation(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// The key must be a point on the curve in compressed SEC1 form
    pub fn validate_basic(&self) -> Result<()> {
        let verifying_key = self.verifying_key()?;
        if verifying_key.to_encoded_point(true).as_bytes() != self.0.as_slice() {
            return Err(QuorumError::Validation(
                "public key is not compressed".to_string(),
            ));
        }
        Ok(())
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.0)
            .map_err(|e| QuorumError::Validation(format!("invalid public key: {}", e)))
    }

    /// Verify a signature over a 32-byte digest
    pub fn verify(&self, digest: &[u8; 32], signature: &Signature) -> Result<()> {
        let verifying_key = self.verifying_key()?;
        let sig = signature.to_k256()?;

        verifying_key
            .verify_prehash(digest, &sig)
            .map_err(|_| QuorumError::SignatureVerificationFailed)
    }

    /// Verify a signature over a payload hash
    pub fn verify_hash(&self, hash: &Hash, signature: &Signature) -> Result<()> {
        self.verify(hash.as_bytes(), signature)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// ECDSA signature share (64 bytes: r || s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| QuorumError::Validation(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Convert a DER encoded signature into its compact, low-s form
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let sig = K256Signature::from_der(der)
            .map_err(|e| QuorumError::Validation(format!("invalid DER signature: {}", e)))?;
        Ok(Self::from_k256(&sig))
    }

    pub(crate) fn from_k256(sig: &K256Signature) -> Self {
        let sig = sig.normalize_s().unwrap_or(*sig);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&sig.to_bytes());
        Self(bytes)
    }

    fn to_k256(self) -> Result<K256Signature> {
        K256Signature::from_slice(&self.0)
            .map_err(|e| QuorumError::Validation(format!("invalid signature format: {}", e)))
    }

    /// Structural check: r and s must be valid non-zero scalars
    pub fn validate_basic(&self) -> Result<()> {
        self.to_k256().map(|_| ())
    }
}

impl From<K256Signature> for Signature {
    fn from(sig: K256Signature) -> Self {
        Self::from_k256(&sig)
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Digest a validator signs to prove it owns a freshly generated key share
pub fn ownership_digest(validator: &ValAddress) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(validator.to_string().as_bytes());
    hasher.finalize().into()
}

/// SHA-256 of an arbitrary payload
pub fn payload_hash(payload: &[u8]) -> Hash {
    Hash::new(Sha256::digest(payload).into())
}
