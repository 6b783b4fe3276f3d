//! Custodia consent workflows
//!
//! Pure functions over caller-supplied snapshots for the three stateful
//! parts of the sharing engine:
//!
//! - `consent`: construction, activity, expiry detection and extension
//! - `request`: access requests with SLA deadlines, approval and rejection
//! - `revocation`: explicit termination and bulk revoke validation
//!
//! Every operation takes `now` explicitly and returns new values or patches.
//! Persisting them, and keeping multi-step writes consistent, is the
//! caller's responsibility.

pub mod consent;
pub mod error;
pub mod request;
pub mod revocation;
pub mod types;

pub use consent::{
    check_auto_expire, create_consent, ensure_transition, expire_patch, extend_consent,
    filter_consents_by_scope, filter_consents_by_subject, get_consents_expiring_soon,
    get_consents_for_client, has_permission, is_consent_active, is_consent_expired,
    is_valid_transition, validate_consent_input, DEFAULT_EXPIRING_SOON_DAYS,
};
pub use error::{ConsentError, ConsentResult};
pub use request::{
    approve_request, can_decide_request, create_request, ensure_pending, get_overdue_requests,
    get_pending_requests, get_requests_at_risk, get_requests_by_status, is_request_overdue,
    link_consent_patch, reject_request, validate_request_input, APPROVED_REASON_PREFIX,
    DEFAULT_AT_RISK_HOURS, DEFAULT_SLA_DAYS,
};
pub use revocation::{
    can_revoke_consent, cannot_revoke_reason, get_recent_revocations, get_revocations_for_consent,
    get_revocations_for_subject, revoke_consent, validate_bulk_revoke, CONSENT_NOT_FOUND_REASON,
    DEFAULT_RECENT_REVOCATION_DAYS,
};
pub use types::{
    AccessRequest, ApprovalOutcome, ApproveRequestInput, BulkRevokeFailure, BulkRevokeValidation,
    Consent, ConsentPatch, ConsentStatus, CreateConsentInput, CreateRequestInput,
    NewAccessRequest, NewConsent, NewRevocation, RejectRequestInput, RequestPatch, RequestStatus,
    Revocation, RevocationOutcome, RevokeConsentInput,
};
