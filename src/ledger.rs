//! The ledger: an append-only chain of blocks plus the derived indices and
//! the facade operations the HTTP layer calls into.
//!
//! The chain is the durable audit trail; the identity and emergency indices
//! are rebuildable caches over it. All mutation goes through [`Ledger::append`],
//! guarded by the single mutex in `AppState`.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::model::{
    compute_block_hash, hash_concat, now_rfc3339, Block, EmergencyContact, EmergencyRecord,
    EmergencyResolution, GeoPoint, IdentityRegistration, Payload, GENESIS_PREV_HASH,
};

/// Lifecycle state of an emergency handle. OPEN → RESOLVED, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyState {
    Open,
    Resolved,
}

/// Index entry for one emergency handle.
#[derive(Debug, Clone)]
struct EmergencyStatus {
    record_block: usize,
    state: EmergencyState,
    resolution_block: Option<usize>,
}

/// Registration input. `name` and `phone` are required; everything else
/// falls back to documented defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub aadhaar_number: Option<String>,
    #[serde(default)]
    pub kyc_verified: bool,
    #[serde(default)]
    pub emergency_contacts: Vec<EmergencyContact>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Emergency intake input; every field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEmergency {
    #[serde(default, rename = "type")]
    pub emergency_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Resolution input; every field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResolution {
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub response_time: Option<String>,
}

/// What a successful identity lookup returns. The Aadhaar number is
/// withheld: lookups are served to third parties.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityView {
    pub identity_hash: String,
    pub name: String,
    pub phone: String,
    pub kyc_verified: bool,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub public_key: String,
    pub location: String,
    pub block_index: u64,
    pub registered_at: String,
}

/// One entry of a tourist's emergency history, newest last.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyHistoryEntry {
    #[serde(flatten)]
    pub record: EmergencyRecord,
    pub state: EmergencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<EmergencyResolution>,
}

/// Ledger-wide counters, recomputed on every call so they can never go
/// stale relative to the chain.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_blocks: usize,
    pub total_tourists: usize,
    pub total_emergencies: usize,
    pub chain_integrity: bool,
}

/// Summary of one non-genesis block for the activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub block_index: u64,
    pub timestamp: String,
    pub kind: &'static str,
    pub reference: String,
    pub summary: String,
}

/// The chain and its derived indices.
pub struct Ledger {
    blocks: Vec<Block>,
    /// identity handle → block position of its registration.
    identities: HashMap<String, usize>,
    /// emergency handle → lifecycle status.
    emergencies: HashMap<String, EmergencyStatus>,
    /// identity handle → emergency handles in insertion order.
    histories: HashMap<String, Vec<String>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// A fresh ledger holding only the genesis block.
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            identities: HashMap::new(),
            emergencies: HashMap::new(),
            histories: HashMap::new(),
        }
    }

    /// Seal a new block onto the tail. The only mutator of the chain.
    fn append(&mut self, payload: Payload) -> &Block {
        let tail = self.blocks.last().expect("chain always holds genesis");
        let block = Block::seal(tail.index + 1, payload, tail.hash.clone());
        self.blocks.push(block);
        self.blocks.last().expect("just pushed")
    }

    /// Register a tourist identity. Returns the new identity handle.
    ///
    /// Validation runs before anything is appended, so a failed call leaves
    /// no partial block and no dangling index entry.
    pub fn register_identity(&mut self, input: NewIdentity) -> Result<String, LedgerError> {
        if input.name.trim().is_empty() || input.phone.trim().is_empty() {
            return Err(LedgerError::Validation(
                "name and phone are required fields".to_string(),
            ));
        }

        let public_key = input
            .public_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let location = input
            .location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| "Not specified".to_string());

        let identity_hash = derive_handle(&[
            input.name.as_bytes(),
            input.phone.as_bytes(),
            public_key.as_bytes(),
        ]);
        // Handles carry a 128-bit random salt; a collision means the digest
        // itself is broken.
        assert!(
            !self.identities.contains_key(&identity_hash),
            "identity handle collision"
        );

        let registration = IdentityRegistration {
            name: input.name,
            phone: input.phone,
            aadhaar_number: input.aadhaar_number,
            kyc_verified: input.kyc_verified,
            emergency_contacts: input.emergency_contacts,
            public_key,
            location,
            identity_hash: identity_hash.clone(),
        };

        let block_index = self
            .append(Payload::IdentityRegistration(registration))
            .index as usize;
        self.identities.insert(identity_hash.clone(), block_index);
        self.histories.insert(identity_hash.clone(), Vec::new());

        info!(block_index, "registered tourist identity");
        Ok(identity_hash)
    }

    /// Look up an identity handle. An unknown handle is `None`, never an
    /// error; this operation does not mutate.
    pub fn verify_identity(&self, identity_hash: &str) -> Option<IdentityView> {
        let &block_index = self.identities.get(identity_hash)?;
        let block = self.blocks.get(block_index)?;
        let Payload::IdentityRegistration(reg) = &block.payload else {
            error!(block_index, "identity index points at a non-registration block");
            return None;
        };
        Some(IdentityView {
            identity_hash: reg.identity_hash.clone(),
            name: reg.name.clone(),
            phone: reg.phone.clone(),
            kyc_verified: reg.kyc_verified,
            emergency_contacts: reg.emergency_contacts.clone(),
            public_key: reg.public_key.clone(),
            location: reg.location.clone(),
            block_index: block.index,
            registered_at: block.timestamp.clone(),
        })
    }

    /// Record an emergency for a registered identity. Returns the new
    /// emergency handle.
    pub fn record_emergency(
        &mut self,
        identity_hash: &str,
        input: NewEmergency,
    ) -> Result<String, LedgerError> {
        if !self.identities.contains_key(identity_hash) {
            return Err(LedgerError::NotFound(format!(
                "unknown identity handle {identity_hash}"
            )));
        }

        let timestamp = now_rfc3339();
        let emergency_type = input
            .emergency_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "GENERAL".to_string());
        let emergency_hash = derive_handle(&[
            identity_hash.as_bytes(),
            emergency_type.as_bytes(),
            timestamp.as_bytes(),
        ]);
        assert!(
            !self.emergencies.contains_key(&emergency_hash),
            "emergency handle collision"
        );

        let record = EmergencyRecord {
            identity_hash: identity_hash.to_string(),
            emergency_hash: emergency_hash.clone(),
            emergency_type,
            severity: input.severity.unwrap_or_else(|| "MEDIUM".to_string()),
            location: input.location.unwrap_or_default(),
            description: input
                .description
                .unwrap_or_else(|| "Emergency situation".to_string()),
            timestamp,
        };

        let record_block = self.append(Payload::EmergencyRecord(record)).index as usize;
        self.emergencies.insert(
            emergency_hash.clone(),
            EmergencyStatus {
                record_block,
                state: EmergencyState::Open,
                resolution_block: None,
            },
        );
        self.histories
            .entry(identity_hash.to_string())
            .or_default()
            .push(emergency_hash.clone());

        info!(block_index = record_block, "recorded emergency");
        Ok(emergency_hash)
    }

    /// Resolve an open emergency. Returns the hash of the resolution block.
    ///
    /// The original record block is untouched; resolution appends a new
    /// block and flips only the index's state pointer.
    pub fn resolve_emergency(
        &mut self,
        emergency_hash: &str,
        input: NewResolution,
    ) -> Result<String, LedgerError> {
        let status = self.emergencies.get(emergency_hash).ok_or_else(|| {
            LedgerError::NotFound(format!("unknown emergency handle {emergency_hash}"))
        })?;
        if status.state == EmergencyState::Resolved {
            return Err(LedgerError::Conflict(format!(
                "emergency {emergency_hash} is already resolved"
            )));
        }

        let resolution = EmergencyResolution {
            emergency_hash: emergency_hash.to_string(),
            resolved_by: input.resolved_by.unwrap_or_else(|| "System".to_string()),
            note: input.note.unwrap_or_else(|| "Emergency resolved".to_string()),
            response_time: input
                .response_time
                .unwrap_or_else(|| "5 minutes".to_string()),
            timestamp: now_rfc3339(),
        };

        let block = self.append(Payload::EmergencyResolution(resolution));
        let (block_index, block_hash) = (block.index as usize, block.hash.clone());

        let status = self
            .emergencies
            .get_mut(emergency_hash)
            .expect("checked above");
        status.state = EmergencyState::Resolved;
        status.resolution_block = Some(block_index);

        info!(block_index, "resolved emergency");
        Ok(block_hash)
    }

    /// A tourist's emergencies in the order they were recorded, with current
    /// state and resolution details merged in. Unknown identities yield an
    /// empty list, not an error.
    pub fn emergency_history(&self, identity_hash: &str) -> Vec<EmergencyHistoryEntry> {
        let Some(handles) = self.histories.get(identity_hash) else {
            return Vec::new();
        };

        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(status) = self.emergencies.get(handle) else {
                error!(%handle, "history references an unindexed emergency");
                continue;
            };
            let Some(Payload::EmergencyRecord(record)) =
                self.blocks.get(status.record_block).map(|b| &b.payload)
            else {
                error!(%handle, "emergency index points at a non-emergency block");
                continue;
            };
            let resolution = status.resolution_block.and_then(|i| {
                match self.blocks.get(i).map(|b| &b.payload) {
                    Some(Payload::EmergencyResolution(r)) => Some(r.clone()),
                    _ => {
                        error!(%handle, "resolution pointer is not a resolution block");
                        None
                    }
                }
            });
            entries.push(EmergencyHistoryEntry {
                record: record.clone(),
                state: status.state,
                resolution,
            });
        }
        entries
    }

    /// Full-chain integrity check: every block's stored hash must match its
    /// recomputed hash, every `previous_hash` must match the predecessor,
    /// and genesis must carry the zero sentinel. O(n) by design.
    pub fn is_valid(&self) -> bool {
        let Some(genesis) = self.blocks.first() else {
            return false;
        };
        if genesis.previous_hash != GENESIS_PREV_HASH {
            return false;
        }
        for (i, block) in self.blocks.iter().enumerate() {
            if block.index != i as u64 {
                return false;
            }
            if compute_block_hash(block) != block.hash {
                return false;
            }
            if i > 0 && block.previous_hash != self.blocks[i - 1].hash {
                return false;
            }
        }
        true
    }

    /// Counters derived by direct count/scan on every call.
    pub fn stats(&self) -> Stats {
        Stats {
            total_blocks: self.blocks.len(),
            total_tourists: self.identities.len(),
            total_emergencies: self.emergencies.len(),
            chain_integrity: self.is_valid(),
        }
    }

    /// The last `n` non-genesis blocks, newest first, summarized.
    pub fn recent_activity(&self, n: usize) -> Vec<ActivityEntry> {
        self.blocks
            .iter()
            .rev()
            .filter_map(|block| {
                let (kind, reference, summary) = match &block.payload {
                    Payload::Genesis => return None,
                    Payload::IdentityRegistration(reg) => (
                        "IDENTITY_REGISTRATION",
                        reg.identity_hash.clone(),
                        format!("{} registered ({})", reg.name, reg.location),
                    ),
                    Payload::EmergencyRecord(rec) => (
                        "EMERGENCY_RECORD",
                        rec.emergency_hash.clone(),
                        format!("{} ({})", rec.emergency_type, rec.severity),
                    ),
                    Payload::EmergencyResolution(res) => (
                        "EMERGENCY_RESOLUTION",
                        res.emergency_hash.clone(),
                        format!("resolved by {}", res.resolved_by),
                    ),
                };
                Some(ActivityEntry {
                    block_index: block.index,
                    timestamp: block.timestamp.clone(),
                    kind,
                    reference,
                    summary,
                })
            })
            .take(n)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_at(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn tail(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }

    /// The first `limit` blocks, for raw-chain inspection.
    pub fn blocks_prefix(&self, limit: usize) -> &[Block] {
        &self.blocks[..limit.min(self.blocks.len())]
    }
}

/// Derive a fresh external handle from payload fields plus a 16-byte random
/// salt, so two identical payloads never share a handle.
fn derive_handle(parts: &[&[u8]]) -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut all: Vec<&[u8]> = parts.to_vec();
    all.push(&salt);
    hash_concat(&all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, phone: &str) -> NewIdentity {
        NewIdentity {
            name: name.to_string(),
            phone: phone.to_string(),
            ..NewIdentity::default()
        }
    }

    #[test]
    fn fresh_ledger_is_genesis_only_and_valid() {
        let ledger = Ledger::new();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_valid());
        assert_eq!(ledger.tail().index, 0);
    }

    #[test]
    fn registration_appends_exactly_one_block() {
        let mut ledger = Ledger::new();
        let before = ledger.len();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        assert_eq!(ledger.len(), before + 1);
        assert_eq!(handle.len(), 64);
        assert!(ledger.is_valid());
    }

    #[test]
    fn registration_without_required_fields_leaves_no_trace() {
        let mut ledger = Ledger::new();
        let err = ledger.register_identity(identity("", "+919876543210"));
        assert!(matches!(err, Err(LedgerError::Validation(_))));
        let err = ledger.register_identity(identity("Rahul Sharma", "   "));
        assert!(matches!(err, Err(LedgerError::Validation(_))));
        // no partial writes
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.stats().total_tourists, 0);
    }

    #[test]
    fn verify_round_trips_registration_with_defaults() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Priya Patel", "+919123456789"))
            .unwrap();

        let view = ledger.verify_identity(&handle).unwrap();
        assert_eq!(view.name, "Priya Patel");
        assert_eq!(view.phone, "+919123456789");
        assert!(!view.kyc_verified);
        assert!(view.emergency_contacts.is_empty());
        assert_eq!(view.location, "Not specified");
        // placeholder key was generated
        assert!(!view.public_key.is_empty());
        assert_eq!(view.identity_hash, handle);
        assert_eq!(view.block_index, 1);
    }

    #[test]
    fn verify_unknown_handle_is_none_not_error() {
        let ledger = Ledger::new();
        assert!(ledger.verify_identity("bogus").is_none());
    }

    #[test]
    fn identical_registrations_get_distinct_handles() {
        let mut ledger = Ledger::new();
        let h1 = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        let h2 = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn emergency_requires_known_identity() {
        let mut ledger = Ledger::new();
        let err = ledger.record_emergency("bogus", NewEmergency::default());
        assert!(matches!(err, Err(LedgerError::NotFound(_))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn emergency_defaults_are_applied() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        ledger
            .record_emergency(&handle, NewEmergency::default())
            .unwrap();

        let history = ledger.emergency_history(&handle);
        assert_eq!(history.len(), 1);
        let entry = &history[0];
        assert_eq!(entry.record.emergency_type, "GENERAL");
        assert_eq!(entry.record.severity, "MEDIUM");
        assert_eq!(entry.record.description, "Emergency situation");
        assert_eq!(entry.record.location.lat, 0.0);
        assert_eq!(entry.record.location.lng, 0.0);
        assert_eq!(entry.state, EmergencyState::Open);
        assert!(entry.resolution.is_none());
    }

    #[test]
    fn resolve_succeeds_once_then_conflicts() {
        let mut ledger = Ledger::new();
        let identity_hash = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        let emergency_hash = ledger
            .record_emergency(&identity_hash, NewEmergency::default())
            .unwrap();

        let resolution_hash = ledger
            .resolve_emergency(&emergency_hash, NewResolution::default())
            .unwrap();
        assert_eq!(resolution_hash, ledger.tail().hash);

        let err = ledger.resolve_emergency(&emergency_hash, NewResolution::default());
        assert!(matches!(err, Err(LedgerError::Conflict(_))));

        let history = ledger.emergency_history(&identity_hash);
        assert_eq!(history[0].state, EmergencyState::Resolved);
        let resolution = history[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.resolved_by, "System");
        assert_eq!(resolution.note, "Emergency resolved");
        assert_eq!(resolution.response_time, "5 minutes");
    }

    #[test]
    fn resolve_unknown_handle_is_not_found() {
        let mut ledger = Ledger::new();
        let err = ledger.resolve_emergency("bogus", NewResolution::default());
        assert!(matches!(err, Err(LedgerError::NotFound(_))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn history_preserves_insertion_order() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        let e1 = ledger
            .record_emergency(
                &handle,
                NewEmergency {
                    emergency_type: Some("THEFT".to_string()),
                    ..NewEmergency::default()
                },
            )
            .unwrap();
        let e2 = ledger
            .record_emergency(
                &handle,
                NewEmergency {
                    emergency_type: Some("MEDICAL".to_string()),
                    ..NewEmergency::default()
                },
            )
            .unwrap();

        let history = ledger.emergency_history(&handle);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record.emergency_hash, e1);
        assert_eq!(history[1].record.emergency_hash, e2);
    }

    #[test]
    fn history_for_unknown_identity_is_empty() {
        let ledger = Ledger::new();
        assert!(ledger.emergency_history("bogus").is_empty());
    }

    #[test]
    fn tampering_is_detected_and_reversible() {
        let mut ledger = Ledger::new();
        ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        ledger
            .register_identity(identity("Priya Patel", "+919123456789"))
            .unwrap();
        assert!(ledger.is_valid());

        // alter a non-terminal block without recomputing its hash
        let original = ledger.blocks[1].timestamp.clone();
        ledger.blocks[1].timestamp = "1999-01-01T00:00:00Z".to_string();
        assert!(!ledger.is_valid());

        ledger.blocks[1].timestamp = original;
        assert!(ledger.is_valid());

        // broken linkage is also caught
        let original = ledger.blocks[2].previous_hash.clone();
        ledger.blocks[2].previous_hash = "0".repeat(64);
        assert!(!ledger.is_valid());
        ledger.blocks[2].previous_hash = original;
        assert!(ledger.is_valid());
    }

    #[test]
    fn chain_links_every_block_to_its_predecessor() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        ledger
            .record_emergency(&handle, NewEmergency::default())
            .unwrap();

        for i in 1..ledger.len() {
            assert_eq!(
                ledger.blocks[i].previous_hash,
                ledger.blocks[i - 1].hash,
                "block {i} must link to its predecessor"
            );
        }
    }

    #[test]
    fn stats_count_directly_from_state() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        let emergency = ledger
            .record_emergency(&handle, NewEmergency::default())
            .unwrap();
        ledger
            .resolve_emergency(&emergency, NewResolution::default())
            .unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.total_blocks, 4); // genesis + registration + emergency + resolution
        assert_eq!(stats.total_tourists, 1);
        assert_eq!(stats.total_emergencies, 1);
        assert!(stats.chain_integrity);
    }

    #[test]
    fn recent_activity_is_newest_first_and_skips_genesis() {
        let mut ledger = Ledger::new();
        let handle = ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        ledger
            .record_emergency(&handle, NewEmergency::default())
            .unwrap();

        let activity = ledger.recent_activity(10);
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].kind, "EMERGENCY_RECORD");
        assert_eq!(activity[1].kind, "IDENTITY_REGISTRATION");

        let capped = ledger.recent_activity(1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].block_index, 2);
    }

    #[test]
    fn blocks_prefix_is_bounded() {
        let mut ledger = Ledger::new();
        ledger
            .register_identity(identity("Rahul Sharma", "+919876543210"))
            .unwrap();
        assert_eq!(ledger.blocks_prefix(10).len(), 2);
        assert_eq!(ledger.blocks_prefix(1).len(), 1);
        assert_eq!(ledger.blocks_prefix(1)[0].index, 0);
    }
}
