//! Claim keys: the content identity of an `(entity, attribute, scope)` bucket.
//!
//! The key is a SHA-256 digest over the entity id, the attribute id, and the
//! canonical scope JSON. Two claims with the same key compete for the same
//! fact; the `ConflictGroup` record is keyed by it.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::scope::Scope;

/// 256-bit claim-key digest. Displayed and serialized as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey(pub [u8; 32]);

impl ClaimKey {
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn from_hex(hex: &str) -> LedgerResult<Self> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(LedgerError::Validation(format!(
                "claim key must be 64 hex chars, got {}",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk)
                .map_err(|_| LedgerError::Validation("claim key is not valid hex".to_string()))?;
            bytes[i] = u8::from_str_radix(s, 16)
                .map_err(|_| LedgerError::Validation(format!("claim key: bad hex byte {s}")))?;
        }
        Ok(ClaimKey(bytes))
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ClaimKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ClaimKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ClaimKey::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Compute the claim key for `(entity_id, attribute_id, scope)`.
///
/// This is the authoritative hash: the extractor, the deriver, and the store
/// all agree on it. Fails only if the scope cannot be canonicalized.
pub fn compute_claim_key(
    entity_id: Uuid,
    attribute_id: Uuid,
    scope: &Scope,
) -> LedgerResult<ClaimKey> {
    let canonical = scope.canonical_json()?;
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(attribute_id.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(ClaimKey(hasher.finalize().into()))
}

/// SHA-256 of arbitrary text, hex-encoded. Used for document content hashes
/// and snippet hashes.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
