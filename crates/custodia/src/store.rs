//! Persistence seam for the service shell.
//!
//! `RecordStore` assigns ids and timestamps on create and applies patches on
//! update. The conditional updates are the only compare-and-swap operations
//! the service relies on: deciding a pending request, terminating an active
//! consent, and revoking an active consent together with its revocation
//! record.

use custodia_consent::{
    AccessRequest, Consent, ConsentError, ConsentPatch, ConsentStatus, NewAccessRequest,
    NewConsent, NewRevocation, RequestPatch, RequestStatus, Revocation,
};
use custodia_core::{
    ConsentId, IdGenerator, IdPrefix, PolicyId, RequestId, RevocationId, Timestamp,
};
use custodia_policy::{EvaluationSnapshot, SharingPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{RootError, RootResult};

// ---------------------------------------------------------------------------
// RecordSet: every record kind, as read in one consistent pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSet {
    #[serde(default)]
    pub consents: Vec<Consent>,
    #[serde(default)]
    pub requests: Vec<AccessRequest>,
    #[serde(default)]
    pub revocations: Vec<Revocation>,
    #[serde(default)]
    pub policies: Vec<SharingPolicy>,
}

impl RecordSet {
    /// Read a JSON snapshot file.
    pub fn load(path: &Path) -> RootResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> RootResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn evaluation_snapshot(&self) -> EvaluationSnapshot {
        EvaluationSnapshot {
            consents: self.consents.clone(),
            policies: self.policies.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

pub trait RecordStore: Send + Sync {
    /// All records, read under one lock.
    fn snapshot(&self) -> RootResult<RecordSet>;

    fn get_consent(&self, id: &ConsentId) -> RootResult<Option<Consent>>;
    fn find_consent_by_request(&self, request_id: &RequestId) -> RootResult<Option<Consent>>;
    fn create_consent(&self, consent: NewConsent, now: Timestamp) -> RootResult<Consent>;
    fn update_consent(&self, id: &ConsentId, patch: &ConsentPatch) -> RootResult<Consent>;

    /// Apply `patch` only while the consent is still active. Returns
    /// `false`, leaving the record untouched, when it is not.
    fn update_consent_if_active(&self, id: &ConsentId, patch: &ConsentPatch) -> RootResult<bool>;

    fn get_request(&self, id: &RequestId) -> RootResult<Option<AccessRequest>>;
    fn create_request(&self, request: NewAccessRequest, now: Timestamp) -> RootResult<AccessRequest>;
    fn update_request(&self, id: &RequestId, patch: &RequestPatch) -> RootResult<AccessRequest>;

    /// Apply `patch` only while the request is still pending.
    fn update_request_if_pending(&self, id: &RequestId, patch: &RequestPatch) -> RootResult<bool>;

    /// Apply `patch` and store `revocation` as one write, only while the
    /// consent is still active. `None` leaves both untouched.
    fn revoke_if_active(
        &self,
        id: &ConsentId,
        patch: &ConsentPatch,
        revocation: NewRevocation,
        now: Timestamp,
    ) -> RootResult<Option<Revocation>>;

    /// Insert or replace a policy. Replacing keeps the policy's position.
    fn put_policy(&self, policy: SharingPolicy) -> RootResult<()>;
    fn delete_policy(&self, id: &PolicyId) -> RootResult<bool>;
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

/// Reference `RecordStore` over a single mutex. Records keep insertion
/// order, which the policy evaluator relies on for equal priorities.
pub struct InMemoryStore {
    records: Mutex<RecordSet>,
    ids: IdGenerator,
}

fn lock_records(mutex: &Mutex<RecordSet>) -> RootResult<MutexGuard<'_, RecordSet>> {
    mutex
        .lock()
        .map_err(|e| RootError::Store(format!("lock poisoned: {}", e)))
}

impl InMemoryStore {
    pub fn new(ids: IdGenerator) -> Self {
        Self::from_records(RecordSet::default(), ids)
    }

    pub fn from_records(records: RecordSet, ids: IdGenerator) -> Self {
        Self {
            records: Mutex::new(records),
            ids,
        }
    }

    /// Take the records back out, e.g. to write a snapshot file.
    pub fn into_records(self) -> RootResult<RecordSet> {
        self.records
            .into_inner()
            .map_err(|e| RootError::Store(format!("lock poisoned: {}", e)))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(IdGenerator::default())
    }
}

impl RecordStore for InMemoryStore {
    fn snapshot(&self) -> RootResult<RecordSet> {
        Ok(lock_records(&self.records)?.clone())
    }

    fn get_consent(&self, id: &ConsentId) -> RootResult<Option<Consent>> {
        let records = lock_records(&self.records)?;
        Ok(records.consents.iter().find(|c| &c.id == id).cloned())
    }

    fn find_consent_by_request(&self, request_id: &RequestId) -> RootResult<Option<Consent>> {
        let records = lock_records(&self.records)?;
        Ok(records
            .consents
            .iter()
            .find(|c| c.request_id.as_ref() == Some(request_id))
            .cloned())
    }

    fn create_consent(&self, consent: NewConsent, now: Timestamp) -> RootResult<Consent> {
        let id = ConsentId::new(self.ids.generate(IdPrefix::Consent, now));
        let consent = consent.into_consent(id, now);
        lock_records(&self.records)?.consents.push(consent.clone());
        Ok(consent)
    }

    fn update_consent(&self, id: &ConsentId, patch: &ConsentPatch) -> RootResult<Consent> {
        let mut records = lock_records(&self.records)?;
        let consent = records
            .consents
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ConsentError::consent_not_found(id.as_str()))?;
        patch.apply(consent);
        Ok(consent.clone())
    }

    fn update_consent_if_active(&self, id: &ConsentId, patch: &ConsentPatch) -> RootResult<bool> {
        let mut records = lock_records(&self.records)?;
        let consent = records
            .consents
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ConsentError::consent_not_found(id.as_str()))?;
        if consent.status != ConsentStatus::Active {
            return Ok(false);
        }
        patch.apply(consent);
        Ok(true)
    }

    fn get_request(&self, id: &RequestId) -> RootResult<Option<AccessRequest>> {
        let records = lock_records(&self.records)?;
        Ok(records.requests.iter().find(|r| &r.id == id).cloned())
    }

    fn create_request(&self, request: NewAccessRequest, now: Timestamp) -> RootResult<AccessRequest> {
        let id = RequestId::new(self.ids.generate(IdPrefix::Request, now));
        let request = request.into_request(id, now);
        lock_records(&self.records)?.requests.push(request.clone());
        Ok(request)
    }

    fn update_request(&self, id: &RequestId, patch: &RequestPatch) -> RootResult<AccessRequest> {
        let mut records = lock_records(&self.records)?;
        let request = records
            .requests
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| ConsentError::request_not_found(id.as_str()))?;
        patch.apply(request);
        Ok(request.clone())
    }

    fn update_request_if_pending(&self, id: &RequestId, patch: &RequestPatch) -> RootResult<bool> {
        let mut records = lock_records(&self.records)?;
        let request = records
            .requests
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| ConsentError::request_not_found(id.as_str()))?;
        if request.status != RequestStatus::Pending {
            return Ok(false);
        }
        patch.apply(request);
        Ok(true)
    }

    fn revoke_if_active(
        &self,
        id: &ConsentId,
        patch: &ConsentPatch,
        revocation: NewRevocation,
        now: Timestamp,
    ) -> RootResult<Option<Revocation>> {
        let mut records = lock_records(&self.records)?;
        let consent = records
            .consents
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ConsentError::consent_not_found(id.as_str()))?;
        if consent.status != ConsentStatus::Active {
            return Ok(None);
        }
        patch.apply(consent);
        let revocation_id = RevocationId::new(self.ids.generate(IdPrefix::Revocation, now));
        let revocation = revocation.into_revocation(revocation_id);
        records.revocations.push(revocation.clone());
        Ok(Some(revocation))
    }

    fn put_policy(&self, policy: SharingPolicy) -> RootResult<()> {
        let mut records = lock_records(&self.records)?;
        match records.policies.iter_mut().find(|p| p.id == policy.id) {
            Some(existing) => *existing = policy,
            None => records.policies.push(policy),
        }
        Ok(())
    }

    fn delete_policy(&self, id: &PolicyId) -> RootResult<bool> {
        let mut records = lock_records(&self.records)?;
        let before = records.policies.len();
        records.policies.retain(|p| &p.id != id);
        Ok(records.policies.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_consent::{
        create_consent, expire_patch, revoke_consent, CreateConsentInput, RevokeConsentInput,
    };
    use custodia_core::{
        Action, ClientId, IdStrategy, Permission, ScopeType, SubjectId, SubjectType, UserId,
    };
    use custodia_policy::{PolicyAppliesTo, PolicyStatus};

    fn now() -> Timestamp {
        Timestamp::parse_rfc3339("2026-06-01T12:00:00Z").unwrap()
    }

    fn new_consent(request_id: Option<&str>) -> NewConsent {
        create_consent(
            CreateConsentInput {
                client_id: ClientId::new("client-1"),
                subject_type: SubjectType::Advisor,
                subject_id: SubjectId::new("adv-1"),
                subject_name: None,
                scope_type: ScopeType::Household,
                scope_id: None,
                scope_name: None,
                permissions: vec![Permission::from(Action::View)],
                client_safe: None,
                valid_from: None,
                valid_until: None,
                granted_by_user_id: UserId::new("admin-1"),
                reason: None,
                request_id: request_id.map(RequestId::new),
                watermark_required: None,
            },
            now(),
        )
    }

    fn policy(id: &str, name: &str) -> SharingPolicy {
        SharingPolicy {
            id: PolicyId::new(id),
            client_id: ClientId::new("client-1"),
            name: name.into(),
            applies_to: PolicyAppliesTo::Both,
            status: PolicyStatus::Active,
            priority: 1,
            rules: vec![],
        }
    }

    #[test]
    fn test_create_assigns_id_and_timestamps() {
        let store = InMemoryStore::default();
        let consent = store.create_consent(new_consent(None), now()).unwrap();
        assert!(consent.id.as_str().starts_with("consent-"));
        assert_eq!(consent.created_at, now());
        assert_eq!(consent.updated_at, now());
        assert_eq!(store.get_consent(&consent.id).unwrap(), Some(consent));
    }

    #[test]
    fn test_uuid_strategy_ids() {
        let store = InMemoryStore::new(IdGenerator::new(IdStrategy::UuidV7));
        let consent = store.create_consent(new_consent(None), now()).unwrap();
        assert_eq!(consent.id.as_str().len(), "consent-".len() + 36);
    }

    #[test]
    fn test_find_consent_by_request() {
        let store = InMemoryStore::default();
        store.create_consent(new_consent(None), now()).unwrap();
        let linked = store.create_consent(new_consent(Some("req-1")), now()).unwrap();
        assert_eq!(
            store.find_consent_by_request(&RequestId::new("req-1")).unwrap(),
            Some(linked)
        );
        assert!(store
            .find_consent_by_request(&RequestId::new("req-2"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_conditional_consent_update() {
        let store = InMemoryStore::default();
        let consent = store.create_consent(new_consent(None), now()).unwrap();
        let patch = expire_patch(now());

        assert!(store.update_consent_if_active(&consent.id, &patch).unwrap());
        assert!(!store.update_consent_if_active(&consent.id, &patch).unwrap());
        let stored = store.get_consent(&consent.id).unwrap().unwrap();
        assert_eq!(stored.status, ConsentStatus::Expired);
    }

    #[test]
    fn test_revoke_if_active_writes_status_and_record_together() {
        let store = InMemoryStore::default();
        let consent = store.create_consent(new_consent(None), now()).unwrap();
        let outcome = revoke_consent(
            RevokeConsentInput {
                consent: &consent,
                revoked_by_user_id: UserId::new("admin-1"),
                reason: "Client request".into(),
            },
            now(),
        );

        let revocation = store
            .revoke_if_active(&consent.id, &outcome.consent_patch, outcome.revocation.clone(), now())
            .unwrap()
            .unwrap();
        assert_eq!(revocation.consent_id, consent.id);

        let again = store
            .revoke_if_active(&consent.id, &outcome.consent_patch, outcome.revocation, now())
            .unwrap();
        assert!(again.is_none());

        let records = store.snapshot().unwrap();
        assert_eq!(records.consents[0].status, ConsentStatus::Revoked);
        assert_eq!(records.revocations, vec![revocation]);
    }

    #[test]
    fn test_revoke_if_active_leaves_expired_consent_alone() {
        let store = InMemoryStore::default();
        let consent = store.create_consent(new_consent(None), now()).unwrap();
        store.update_consent(&consent.id, &expire_patch(now())).unwrap();
        let outcome = revoke_consent(
            RevokeConsentInput {
                consent: &consent,
                revoked_by_user_id: UserId::new("admin-1"),
                reason: "late".into(),
            },
            now(),
        );

        let result = store
            .revoke_if_active(&consent.id, &outcome.consent_patch, outcome.revocation, now())
            .unwrap();
        assert!(result.is_none());
        let records = store.snapshot().unwrap();
        assert_eq!(records.consents[0].status, ConsentStatus::Expired);
        assert!(records.revocations.is_empty());
    }

    #[test]
    fn test_update_missing_record_is_not_found() {
        let store = InMemoryStore::default();
        let err = store
            .update_consent(&ConsentId::new("nope"), &expire_patch(now()))
            .unwrap_err();
        assert!(matches!(
            err,
            RootError::Consent(ConsentError::NotFound { kind: "consent", .. })
        ));
    }

    #[test]
    fn test_put_policy_keeps_position() {
        let store = InMemoryStore::default();
        store.put_policy(policy("a", "first")).unwrap();
        store.put_policy(policy("b", "second")).unwrap();
        store.put_policy(policy("a", "renamed")).unwrap();

        let policies = store.snapshot().unwrap().policies;
        let names: Vec<&str> = policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["renamed", "second"]);

        assert!(store.delete_policy(&PolicyId::new("a")).unwrap());
        assert!(!store.delete_policy(&PolicyId::new("a")).unwrap());
    }

    #[test]
    fn test_record_set_file_roundtrip() {
        let store = InMemoryStore::default();
        store.create_consent(new_consent(None), now()).unwrap();
        store.put_policy(policy("a", "first")).unwrap();
        let records = store.into_records().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        records.save(&path).unwrap();
        assert_eq!(RecordSet::load(&path).unwrap(), records);

        let snapshot = records.evaluation_snapshot();
        assert_eq!(snapshot.consents.len(), 1);
        assert_eq!(snapshot.policies.len(), 1);
    }

    #[test]
    fn test_record_set_tolerates_missing_sections() {
        let records: RecordSet = serde_json::from_str(r#"{"policies": []}"#).unwrap();
        assert!(records.consents.is_empty());
        assert!(records.requests.is_empty());
    }
}
