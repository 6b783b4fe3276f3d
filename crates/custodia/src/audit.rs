use custodia_core::{ConsentId, RequestId, RevocationId, Timestamp, UserId};
use custodia_policy::{DecisionAuditSink, DecisionRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, MutexGuard};

use crate::error::{RootError, RootResult};

/// Something worth keeping a tamper-evident record of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Decision(DecisionRecord),
    RequestApproved {
        request_id: RequestId,
        consent_id: ConsentId,
        decided_by_user_id: UserId,
    },
    RequestRejected {
        request_id: RequestId,
        decided_by_user_id: UserId,
    },
    ApprovalReconciled {
        request_id: RequestId,
        consent_id: ConsentId,
    },
    ConsentRevoked {
        consent_id: ConsentId,
        revocation_id: RevocationId,
        revoked_by_user_id: UserId,
    },
    ConsentExpired {
        consent_id: ConsentId,
    },
    ConsentExtended {
        consent_id: ConsentId,
        valid_until: Timestamp,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub recorded_at: Timestamp,
    pub event: AuditEvent,
    /// Hex SHA-256 of the preceding entry; `None` for the genesis entry.
    pub previous_hash: Option<String>,
    pub hash: String,
}

/// Hash-chained append-only audit log.
///
/// Each entry hashes the previous entry's hash together with its own
/// timestamp and event, so editing or dropping any entry breaks
/// `verify_chain` for everything after it.
///
/// The trail lives in process memory. Long-running callers export it with
/// `drain`, which hands over the entries and keeps the last hash as the
/// anchor the next entry links to.
#[derive(Default)]
pub struct AuditTrail {
    state: Mutex<TrailState>,
}

#[derive(Default)]
struct TrailState {
    /// Hash of the last drained entry.
    anchor: Option<String>,
    entries: Vec<AuditEntry>,
}

impl TrailState {
    fn head(&self) -> Option<String> {
        self.entries
            .last()
            .map(|e| e.hash.clone())
            .or_else(|| self.anchor.clone())
    }
}

fn lock_state(mutex: &Mutex<TrailState>) -> RootResult<MutexGuard<'_, TrailState>> {
    mutex
        .lock()
        .map_err(|e| RootError::Store(format!("audit lock poisoned: {}", e)))
}

fn compute_hash(
    recorded_at: Timestamp,
    event: &AuditEvent,
    previous: Option<&str>,
) -> RootResult<String> {
    let mut hasher = Sha256::new();
    if let Some(prev) = previous {
        hasher.update(prev.as_bytes());
    }
    hasher.update(recorded_at.as_millis().to_le_bytes());
    hasher.update(serde_json::to_vec(event)?);
    Ok(hex::encode(hasher.finalize()))
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its entry hash.
    pub fn append(&self, event: AuditEvent, recorded_at: Timestamp) -> RootResult<String> {
        let mut state = lock_state(&self.state)?;
        let previous_hash = state.head();
        let hash = compute_hash(recorded_at, &event, previous_hash.as_deref())?;
        state.entries.push(AuditEntry {
            recorded_at,
            event,
            previous_hash,
            hash: hash.clone(),
        });
        Ok(hash)
    }

    pub fn verify_chain(&self) -> RootResult<bool> {
        let state = lock_state(&self.state)?;
        Ok(verify_entries_from(state.anchor.as_deref(), &state.entries))
    }

    /// Hash of the newest entry, including drained ones.
    pub fn head(&self) -> RootResult<Option<String>> {
        Ok(lock_state(&self.state)?.head())
    }

    pub fn len(&self) -> RootResult<usize> {
        Ok(lock_state(&self.state)?.entries.len())
    }

    pub fn is_empty(&self) -> RootResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn entries(&self) -> RootResult<Vec<AuditEntry>> {
        Ok(lock_state(&self.state)?.entries.clone())
    }

    /// Remove and return every held entry. Entries appended afterwards link
    /// to the last one returned.
    pub fn drain(&self) -> RootResult<Vec<AuditEntry>> {
        let mut state = lock_state(&self.state)?;
        let drained = std::mem::take(&mut state.entries);
        if let Some(last) = drained.last() {
            state.anchor = Some(last.hash.clone());
        }
        Ok(drained)
    }
}

/// Recompute every hash from the genesis entry.
pub fn verify_entries(entries: &[AuditEntry]) -> bool {
    verify_entries_from(None, entries)
}

/// Recompute every hash, starting from the entry that links to `anchor`.
pub fn verify_entries_from(anchor: Option<&str>, entries: &[AuditEntry]) -> bool {
    let mut previous = anchor;
    for entry in entries {
        if entry.previous_hash.as_deref() != previous {
            return false;
        }
        match compute_hash(entry.recorded_at, &entry.event, previous) {
            Ok(expected) if expected == entry.hash => {}
            _ => return false,
        }
        previous = Some(entry.hash.as_str());
    }
    true
}

impl DecisionAuditSink for AuditTrail {
    fn emit(&self, record: &DecisionRecord) -> Result<(), String> {
        self.append(AuditEvent::Decision(record.clone()), record.evaluated_at)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32) -> Timestamp {
        Timestamp::parse_rfc3339(&format!("2026-06-{:02}T12:00:00Z", day)).unwrap()
    }

    fn expired(id: &str) -> AuditEvent {
        AuditEvent::ConsentExpired {
            consent_id: ConsentId::new(id),
        }
    }

    #[test]
    fn test_empty_chain_verifies() {
        let trail = AuditTrail::new();
        assert!(trail.is_empty().unwrap());
        assert!(trail.verify_chain().unwrap());
        assert!(trail.head().unwrap().is_none());
    }

    #[test]
    fn test_entries_link_to_previous_hash() {
        let trail = AuditTrail::new();
        let h1 = trail.append(expired("c1"), ts(1)).unwrap();
        let h2 = trail.append(expired("c2"), ts(2)).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1.len(), 64);

        let entries = trail.entries().unwrap();
        assert_eq!(entries[0].previous_hash, None);
        assert_eq!(entries[1].previous_hash.as_deref(), Some(h1.as_str()));
        assert_eq!(trail.head().unwrap(), Some(h2));
        assert!(trail.verify_chain().unwrap());
    }

    #[test]
    fn test_tampering_breaks_chain() {
        let trail = AuditTrail::new();
        trail.append(expired("c1"), ts(1)).unwrap();
        trail.append(expired("c2"), ts(2)).unwrap();
        trail.append(expired("c3"), ts(3)).unwrap();

        let mut entries = trail.entries().unwrap();
        assert!(verify_entries(&entries));

        entries[1].event = expired("forged");
        assert!(!verify_entries(&entries));

        let mut entries = trail.entries().unwrap();
        entries.remove(1);
        assert!(!verify_entries(&entries));
    }

    #[test]
    fn test_same_event_different_time_differs() {
        let a = AuditTrail::new();
        let b = AuditTrail::new();
        let ha = a.append(expired("c1"), ts(1)).unwrap();
        let hb = b.append(expired("c1"), ts(2)).unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_drain_keeps_chain_anchored() {
        let trail = AuditTrail::new();
        trail.append(expired("c1"), ts(1)).unwrap();
        let h2 = trail.append(expired("c2"), ts(2)).unwrap();

        let drained = trail.drain().unwrap();
        assert_eq!(drained.len(), 2);
        assert!(verify_entries(&drained));
        assert!(trail.is_empty().unwrap());
        assert_eq!(trail.head().unwrap(), Some(h2.clone()));

        trail.append(expired("c3"), ts(3)).unwrap();
        let rest = trail.entries().unwrap();
        assert_eq!(rest[0].previous_hash.as_deref(), Some(h2.as_str()));
        assert!(trail.verify_chain().unwrap());
        assert!(verify_entries_from(Some(&h2), &rest));
        assert!(!verify_entries(&rest));

        let mut full = drained;
        full.extend(rest);
        assert!(verify_entries(&full));
    }

    #[test]
    fn test_drain_empty_trail_keeps_genesis() {
        let trail = AuditTrail::new();
        assert!(trail.drain().unwrap().is_empty());
        trail.append(expired("c1"), ts(1)).unwrap();
        assert_eq!(trail.entries().unwrap()[0].previous_hash, None);
    }

    #[test]
    fn test_len_reports_poisoned_lock() {
        let trail = std::sync::Arc::new(AuditTrail::new());
        trail.append(expired("c1"), ts(1)).unwrap();
        let poisoner = std::sync::Arc::clone(&trail);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.state.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(matches!(trail.len(), Err(RootError::Store(_))));
        assert!(trail.is_empty().is_err());
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let json = serde_json::to_value(expired("c1")).unwrap();
        assert_eq!(json["kind"], "consent_expired");
        assert_eq!(json["consent_id"], "c1");
    }
}
