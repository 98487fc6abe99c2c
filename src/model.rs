//! Data model for the hash-linked ledger: blocks, payload variants, hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// `previous_hash` of the genesis block: a well-known all-zero digest.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One immutable, hash-sealed unit of the ledger.
///
/// A block is never modified after [`Block::seal`] returns; "resolving" an
/// emergency appends a new block rather than touching the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Sequence position; 0 for genesis, +1 per append.
    pub index: u64,
    /// RFC3339 creation timestamp, set once at construction.
    pub timestamp: String,
    /// The single record this block carries.
    pub payload: Payload,
    /// SHA-256 hex of the previous block ([`GENESIS_PREV_HASH`] for genesis).
    pub previous_hash: String,
    /// SHA-256 hex over (index, timestamp, payload, previous_hash).
    pub hash: String,
}

impl Block {
    /// Build and hash-seal a new block. The timestamp is taken once, here.
    pub fn seal(index: u64, payload: Payload, previous_hash: String) -> Self {
        let timestamp = now_rfc3339();
        let mut block = Self {
            index,
            timestamp,
            payload,
            previous_hash,
            hash: String::new(),
        };
        block.hash = compute_block_hash(&block);
        block
    }

    /// The genesis block: index 0, marker payload, zero sentinel parent.
    pub fn genesis() -> Self {
        Self::seal(0, Payload::Genesis, GENESIS_PREV_HASH.to_string())
    }
}

/// Closed set of record kinds a block can carry.
///
/// Every place that reads the chain matches on this exhaustively, so adding
/// a variant forces all consumers to handle it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    Genesis,
    IdentityRegistration(IdentityRegistration),
    EmergencyRecord(EmergencyRecord),
    EmergencyResolution(EmergencyResolution),
}

/// A tourist's registration as written to the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRegistration {
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aadhaar_number: Option<String>,
    pub kyc_verified: bool,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub public_key: String,
    pub location: String,
    /// Salted digest used as the tourist's external reference. Independent
    /// of the block hash so it leaks no chain position.
    pub identity_hash: String,
}

/// Name + phone pair a tourist registers as a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
}

/// An emergency report tied to a registered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub identity_hash: String,
    /// Fresh salted digest identifying this emergency's lifecycle.
    pub emergency_hash: String,
    /// Free-form category tag, e.g. THEFT / MEDICAL / GENERAL.
    pub emergency_type: String,
    pub severity: String,
    pub location: GeoPoint,
    pub description: String,
    pub timestamp: String,
}

/// Resolution record for a previously reported emergency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyResolution {
    pub emergency_hash: String,
    pub resolved_by: String,
    pub note: String,
    pub response_time: String,
    pub timestamp: String,
}

/// Coordinates plus an optional human-readable place name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lng: 0.0,
            name: None,
        }
    }
}

/// Current RFC3339 wall-clock time.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("rfc3339 formatting of now() cannot fail")
}

/// Hash inputs (concatenate as bytes, SHA-256) and return lowercase hex.
pub fn hash_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hex::encode(hasher.finalize())
}

/// Compute a block's hash from its other fields.
/// Included: index, timestamp, canonical payload JSON, previous_hash.
pub fn compute_block_hash(b: &Block) -> String {
    let payload_bytes =
        serde_json::to_vec(&b.payload).expect("payload is always serializable");
    hash_concat(&[
        &b.index.to_le_bytes(),
        b.timestamp.as_bytes(),
        &payload_bytes,
        b.previous_hash.as_bytes(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registration() -> IdentityRegistration {
        IdentityRegistration {
            name: "Rahul Sharma".to_string(),
            phone: "+919876543210".to_string(),
            aadhaar_number: None,
            kyc_verified: false,
            emergency_contacts: vec![],
            public_key: "pk".to_string(),
            location: "Delhi".to_string(),
            identity_hash: "h1".to_string(),
        }
    }

    #[test]
    fn block_hash_is_deterministic() {
        let block = Block::seal(
            1,
            Payload::IdentityRegistration(sample_registration()),
            GENESIS_PREV_HASH.to_string(),
        );
        assert_eq!(block.hash, compute_block_hash(&block));
        assert_eq!(compute_block_hash(&block), compute_block_hash(&block));
    }

    #[test]
    fn hash_changes_when_any_field_changes() {
        let block = Block::seal(
            1,
            Payload::IdentityRegistration(sample_registration()),
            GENESIS_PREV_HASH.to_string(),
        );

        let mut altered = block.clone();
        altered.index = 2;
        assert_ne!(compute_block_hash(&altered), block.hash);

        let mut altered = block.clone();
        altered.timestamp = "2001-01-01T00:00:00Z".to_string();
        assert_ne!(compute_block_hash(&altered), block.hash);

        let mut altered = block.clone();
        altered.previous_hash = "f".repeat(64);
        assert_ne!(compute_block_hash(&altered), block.hash);

        let mut altered = block.clone();
        if let Payload::IdentityRegistration(reg) = &mut altered.payload {
            reg.name = "Someone Else".to_string();
        }
        assert_ne!(compute_block_hash(&altered), block.hash);
    }

    #[test]
    fn genesis_uses_zero_sentinel() {
        let g = Block::genesis();
        assert_eq!(g.index, 0);
        assert_eq!(g.previous_hash, GENESIS_PREV_HASH);
        assert!(matches!(g.payload, Payload::Genesis));
        assert_eq!(g.hash, compute_block_hash(&g));
    }

    #[test]
    fn payload_serializes_with_kind_tag() {
        let json = serde_json::to_value(Payload::Genesis).unwrap();
        assert_eq!(json["kind"], "GENESIS");

        let json =
            serde_json::to_value(Payload::IdentityRegistration(sample_registration())).unwrap();
        assert_eq!(json["kind"], "IDENTITY_REGISTRATION");
        assert_eq!(json["name"], "Rahul Sharma");
    }
}
