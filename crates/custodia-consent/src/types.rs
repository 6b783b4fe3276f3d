use custodia_core::{
    ClientId, ConsentId, Permission, RequestId, RevocationId, ScopeId, ScopeType, SubjectId,
    SubjectType, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

/// Lifecycle state of a consent.
///
/// `Active -> Expired` is time-derived and applied by the caller;
/// `Active -> Revoked` is explicit. Both targets are terminal except through
/// an extension, which puts the record back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentStatus {
    Active,
    Expired,
    Revoked,
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentStatus::Active => write!(f, "active"),
            ConsentStatus::Expired => write!(f, "expired"),
            ConsentStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// A time-bounded grant of permissions to a subject over a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    pub id: ConsentId,
    pub client_id: ClientId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    pub scope_type: ScopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub client_safe: bool,
    pub valid_from: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Timestamp>,
    pub status: ConsentStatus,
    pub granted_by_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub watermark_required: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Consent {
    /// Whether this consent is scoped exactly to `scope_type` / `scope_id`.
    pub fn is_scoped_to(&self, scope_type: ScopeType, scope_id: Option<&ScopeId>) -> bool {
        self.scope_type == scope_type && self.scope_id.as_ref() == scope_id
    }
}

/// Caller-supplied fields for a new consent. Unset flags default to false
/// and an unset `valid_from` defaults to the creation instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsentInput {
    pub client_id: ClientId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub subject_name: Option<String>,
    pub scope_type: ScopeType,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
    #[serde(default)]
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub client_safe: Option<bool>,
    #[serde(default)]
    pub valid_from: Option<Timestamp>,
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    pub granted_by_user_id: UserId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub request_id: Option<RequestId>,
    #[serde(default)]
    pub watermark_required: Option<bool>,
}

/// A consent with every field resolved except the store-assigned
/// `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsent {
    pub client_id: ClientId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    pub subject_name: Option<String>,
    pub scope_type: ScopeType,
    pub scope_id: Option<ScopeId>,
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    pub client_safe: bool,
    pub valid_from: Timestamp,
    pub valid_until: Option<Timestamp>,
    pub status: ConsentStatus,
    pub granted_by_user_id: UserId,
    pub reason: Option<String>,
    pub request_id: Option<RequestId>,
    pub watermark_required: bool,
}

impl NewConsent {
    pub fn into_consent(self, id: ConsentId, created_at: Timestamp) -> Consent {
        Consent {
            id,
            client_id: self.client_id,
            subject_type: self.subject_type,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            scope_type: self.scope_type,
            scope_id: self.scope_id,
            scope_name: self.scope_name,
            permissions: self.permissions,
            client_safe: self.client_safe,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            status: self.status,
            granted_by_user_id: self.granted_by_user_id,
            reason: self.reason,
            request_id: self.request_id,
            watermark_required: self.watermark_required,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Partial update to a stored consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConsentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl ConsentPatch {
    pub fn apply(&self, consent: &mut Consent) {
        if let Some(status) = self.status {
            consent.status = status;
        }
        if let Some(valid_until) = self.valid_until {
            consent.valid_until = Some(valid_until);
        }
        consent.updated_at = self.updated_at;
    }
}

// ---------------------------------------------------------------------------
// AccessRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A subject's request for access, decided once by a back-office user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: RequestId,
    pub client_id: ClientId,
    pub requested_by_subject_type: SubjectType,
    pub requested_by_subject_id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by_subject_name: Option<String>,
    pub scope_type: ScopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub client_safe_requested: bool,
    pub reason: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_due_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestInput {
    pub client_id: ClientId,
    pub requested_by_subject_type: SubjectType,
    pub requested_by_subject_id: SubjectId,
    #[serde(default)]
    pub requested_by_subject_name: Option<String>,
    pub scope_type: ScopeType,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
    #[serde(default)]
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub client_safe_requested: bool,
    pub reason: String,
    /// Days until the SLA deadline; 5 when unset.
    #[serde(default)]
    pub sla_days: Option<u32>,
}

/// A request with every field resolved except the store-assigned ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccessRequest {
    pub client_id: ClientId,
    pub requested_by_subject_type: SubjectType,
    pub requested_by_subject_id: SubjectId,
    pub requested_by_subject_name: Option<String>,
    pub scope_type: ScopeType,
    pub scope_id: Option<ScopeId>,
    pub scope_name: Option<String>,
    pub permissions: Vec<Permission>,
    pub client_safe_requested: bool,
    pub reason: String,
    pub status: RequestStatus,
    pub sla_due_at: Option<Timestamp>,
}

impl NewAccessRequest {
    pub fn into_request(self, id: RequestId, created_at: Timestamp) -> AccessRequest {
        AccessRequest {
            id,
            client_id: self.client_id,
            requested_by_subject_type: self.requested_by_subject_type,
            requested_by_subject_id: self.requested_by_subject_id,
            requested_by_subject_name: self.requested_by_subject_name,
            scope_type: self.scope_type,
            scope_id: self.scope_id,
            scope_name: self.scope_name,
            permissions: self.permissions,
            client_safe_requested: self.client_safe_requested,
            reason: self.reason,
            status: self.status,
            sla_due_at: self.sla_due_at,
            decided_by_user_id: None,
            decided_at: None,
            decision_notes: None,
            consent_id: None,
            created_at,
            updated_at: created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequestInput {
    pub decided_by_user_id: UserId,
    #[serde(default)]
    pub decision_notes: Option<String>,
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    #[serde(default)]
    pub watermark_required: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequestInput {
    pub decided_by_user_id: UserId,
    #[serde(default)]
    pub decision_notes: Option<String>,
}

/// Partial update to a stored request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
    pub updated_at: Timestamp,
}

impl RequestPatch {
    pub fn apply(&self, request: &mut AccessRequest) {
        if let Some(status) = self.status {
            request.status = status;
        }
        if let Some(ref user) = self.decided_by_user_id {
            request.decided_by_user_id = Some(user.clone());
        }
        if let Some(decided_at) = self.decided_at {
            request.decided_at = Some(decided_at);
        }
        if let Some(ref notes) = self.decision_notes {
            request.decision_notes = Some(notes.clone());
        }
        if let Some(ref consent_id) = self.consent_id {
            request.consent_id = Some(consent_id.clone());
        }
        request.updated_at = self.updated_at;
    }
}

/// Both halves of an approval. Persisting them is a two-step write owned by
/// the caller; nothing here is atomic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub request_patch: RequestPatch,
    pub consent_input: CreateConsentInput,
}

// ---------------------------------------------------------------------------
// Revocation
// ---------------------------------------------------------------------------

/// Immutable record of a consent being revoked. Subject and scope fields are
/// copied from the consent at revoke time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    pub id: RevocationId,
    pub client_id: ClientId,
    pub consent_id: ConsentId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    pub scope_type: ScopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_name: Option<String>,
    pub revoked_by_user_id: UserId,
    pub reason: String,
    pub revoked_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRevocation {
    pub client_id: ClientId,
    pub consent_id: ConsentId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    pub subject_name: Option<String>,
    pub scope_type: ScopeType,
    pub scope_id: Option<ScopeId>,
    pub scope_name: Option<String>,
    pub revoked_by_user_id: UserId,
    pub reason: String,
    pub revoked_at: Timestamp,
}

impl NewRevocation {
    pub fn into_revocation(self, id: RevocationId) -> Revocation {
        Revocation {
            id,
            client_id: self.client_id,
            consent_id: self.consent_id,
            subject_type: self.subject_type,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            scope_type: self.scope_type,
            scope_id: self.scope_id,
            scope_name: self.scope_name,
            revoked_by_user_id: self.revoked_by_user_id,
            reason: self.reason,
            revoked_at: self.revoked_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevokeConsentInput<'a> {
    pub consent: &'a Consent,
    pub revoked_by_user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationOutcome {
    pub revocation: NewRevocation,
    pub consent_patch: ConsentPatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRevokeFailure {
    pub consent_id: ConsentId,
    pub reason: String,
}

/// Dry-run partition of a bulk revoke. Partial success is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRevokeValidation {
    pub successful: Vec<ConsentId>,
    pub failed: Vec<BulkRevokeFailure>,
}

impl BulkRevokeValidation {
    pub fn is_partial(&self) -> bool {
        !self.successful.is_empty() && !self.failed.is_empty()
    }
}
