//! Access request workflow: creation with an SLA deadline, approval into a
//! consent draft, rejection, and overdue / at-risk queries.

use custodia_core::{ConsentId, Timestamp};

use crate::error::{ConsentError, ConsentResult};
use crate::types::{
    AccessRequest, ApprovalOutcome, ApproveRequestInput, CreateConsentInput, CreateRequestInput,
    NewAccessRequest, RejectRequestInput, RequestPatch, RequestStatus,
};

pub const DEFAULT_SLA_DAYS: u32 = 5;
pub const DEFAULT_AT_RISK_HOURS: i64 = 24;

/// Prefix of the reason carried by consents created from an approval.
pub const APPROVED_REASON_PREFIX: &str = "Approved request: ";

/// New pending request due `sla_days` (default 5) days from `now`. The
/// deadline is fixed here and never recomputed.
pub fn create_request(input: CreateRequestInput, now: Timestamp) -> NewAccessRequest {
    let sla_days = input.sla_days.unwrap_or(DEFAULT_SLA_DAYS);
    NewAccessRequest {
        client_id: input.client_id,
        requested_by_subject_type: input.requested_by_subject_type,
        requested_by_subject_id: input.requested_by_subject_id,
        requested_by_subject_name: input.requested_by_subject_name,
        scope_type: input.scope_type,
        scope_id: input.scope_id,
        scope_name: input.scope_name,
        permissions: input.permissions,
        client_safe_requested: input.client_safe_requested,
        reason: input.reason,
        status: RequestStatus::Pending,
        sla_due_at: Some(now.plus_hours(i64::from(sla_days) * 24)),
    }
}

pub fn validate_request_input(input: &CreateRequestInput) -> ConsentResult<()> {
    if input.requested_by_subject_id.as_str().is_empty() {
        return Err(ConsentError::Validation(
            "requested_by_subject_id must not be empty".to_string(),
        ));
    }
    if input.permissions.is_empty() {
        return Err(ConsentError::Validation(
            "permissions must not be empty".to_string(),
        ));
    }
    if input.reason.trim().is_empty() {
        return Err(ConsentError::Validation(
            "reason must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Build both halves of an approval: the request patch and the consent
/// input derived from the request.
///
/// The consent is not created here. Callers persist the patch and the
/// consent as two writes and must reconcile if the second one is lost;
/// `request_id` on the consent input is the idempotency key for that.
/// The request's status is not re-checked.
pub fn approve_request(
    request: &AccessRequest,
    input: ApproveRequestInput,
    now: Timestamp,
) -> ApprovalOutcome {
    let request_patch = RequestPatch {
        status: Some(RequestStatus::Approved),
        decided_by_user_id: Some(input.decided_by_user_id.clone()),
        decided_at: Some(now),
        decision_notes: input.decision_notes,
        consent_id: None,
        updated_at: now,
    };

    let consent_input = CreateConsentInput {
        client_id: request.client_id.clone(),
        subject_type: request.requested_by_subject_type,
        subject_id: request.requested_by_subject_id.clone(),
        subject_name: request.requested_by_subject_name.clone(),
        scope_type: request.scope_type,
        scope_id: request.scope_id.clone(),
        scope_name: request.scope_name.clone(),
        permissions: request.permissions.clone(),
        client_safe: Some(request.client_safe_requested),
        valid_from: None,
        valid_until: input.valid_until,
        granted_by_user_id: input.decided_by_user_id,
        reason: Some(format!("{}{}", APPROVED_REASON_PREFIX, request.reason)),
        request_id: Some(request.id.clone()),
        watermark_required: input.watermark_required,
    };

    ApprovalOutcome {
        request_patch,
        consent_input,
    }
}

/// Rejection patch. No consent artifact is produced.
pub fn reject_request(input: RejectRequestInput, now: Timestamp) -> RequestPatch {
    RequestPatch {
        status: Some(RequestStatus::Rejected),
        decided_by_user_id: Some(input.decided_by_user_id),
        decided_at: Some(now),
        decision_notes: input.decision_notes,
        consent_id: None,
        updated_at: now,
    }
}

/// Patch linking an approved request to the consent created for it.
pub fn link_consent_patch(consent_id: ConsentId, now: Timestamp) -> RequestPatch {
    RequestPatch {
        status: None,
        decided_by_user_id: None,
        decided_at: None,
        decision_notes: None,
        consent_id: Some(consent_id),
        updated_at: now,
    }
}

pub fn can_decide_request(request: &AccessRequest) -> bool {
    request.status == RequestStatus::Pending
}

pub fn ensure_pending(request: &AccessRequest, to: RequestStatus) -> ConsentResult<()> {
    if can_decide_request(request) {
        Ok(())
    } else {
        Err(ConsentError::InvalidStateTransition {
            kind: "request",
            id: request.id.to_string(),
            from: request.status.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn is_request_overdue(request: &AccessRequest, now: Timestamp) -> bool {
    request.status == RequestStatus::Pending
        && request.sla_due_at.map_or(false, |due| due < now)
}

/// Pending requests due within the next `hours_before_due` hours and not
/// yet overdue.
pub fn get_requests_at_risk(
    requests: &[AccessRequest],
    hours_before_due: i64,
    now: Timestamp,
) -> Vec<&AccessRequest> {
    let horizon = now.plus_hours(hours_before_due);
    requests
        .iter()
        .filter(|r| r.status == RequestStatus::Pending)
        .filter(|r| matches!(r.sla_due_at, Some(due) if due >= now && due <= horizon))
        .collect()
}

pub fn get_overdue_requests(requests: &[AccessRequest], now: Timestamp) -> Vec<&AccessRequest> {
    requests
        .iter()
        .filter(|r| is_request_overdue(r, now))
        .collect()
}

pub fn get_pending_requests(requests: &[AccessRequest]) -> Vec<&AccessRequest> {
    get_requests_by_status(requests, RequestStatus::Pending)
}

pub fn get_requests_by_status(
    requests: &[AccessRequest],
    status: RequestStatus,
) -> Vec<&AccessRequest> {
    requests.iter().filter(|r| r.status == status).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::create_consent;
    use custodia_core::{
        Action, ClientId, Permission, RequestId, ScopeId, ScopeType, SubjectId, SubjectType,
        UserId,
    };

    fn t0() -> Timestamp {
        Timestamp::parse_rfc3339("2026-06-01T09:00:00Z").unwrap()
    }

    fn make_input(sla_days: Option<u32>) -> CreateRequestInput {
        CreateRequestInput {
            client_id: ClientId::new("client-1"),
            requested_by_subject_type: SubjectType::Advisor,
            requested_by_subject_id: SubjectId::new("adv-1"),
            requested_by_subject_name: Some("Avery Advisor".into()),
            scope_type: ScopeType::Account,
            scope_id: Some(ScopeId::new("acct-7")),
            scope_name: Some("Brokerage".into()),
            permissions: vec![Permission::from(Action::View), Permission::from(Action::Export)],
            client_safe_requested: true,
            reason: "Quarterly review".into(),
            sla_days,
        }
    }

    fn make_request(id: &str, sla_days: Option<u32>, created: Timestamp) -> AccessRequest {
        create_request(make_input(sla_days), created).into_request(RequestId::new(id), created)
    }

    #[test]
    fn test_create_request_default_sla() {
        let draft = create_request(make_input(None), t0());
        assert_eq!(draft.status, RequestStatus::Pending);
        assert_eq!(draft.sla_due_at, Some(t0().plus_days(5)));
    }

    #[test]
    fn test_create_request_custom_sla() {
        let draft = create_request(make_input(Some(2)), t0());
        assert_eq!(draft.sla_due_at, Some(t0().plus_days(2)));
    }

    #[test]
    fn test_validate_request_input() {
        assert!(validate_request_input(&make_input(None)).is_ok());
        let mut blank = make_input(None);
        blank.reason = "   ".into();
        assert!(validate_request_input(&blank).is_err());
        let mut none = make_input(None);
        none.permissions.clear();
        assert!(validate_request_input(&none).is_err());
    }

    #[test]
    fn test_overdue_timeline() {
        let r = make_request("req-1", Some(2), t0());
        assert!(!is_request_overdue(&r, t0().plus_days(1)));
        assert!(!is_request_overdue(&r, t0().plus_days(2)), "due instant is not overdue");
        assert!(is_request_overdue(&r, t0().plus_days(3)));
    }

    #[test]
    fn test_decided_request_never_overdue() {
        let mut r = make_request("req-1", Some(1), t0());
        r.status = RequestStatus::Rejected;
        assert!(!is_request_overdue(&r, t0().plus_days(10)));
    }

    #[test]
    fn test_approve_builds_consent_input() {
        let r = make_request("req-1", None, t0());
        let now = t0().plus_days(1);
        let outcome = approve_request(
            &r,
            ApproveRequestInput {
                decided_by_user_id: UserId::new("admin-1"),
                decision_notes: Some("ok".into()),
                valid_until: Some(now.plus_days(90)),
                watermark_required: Some(true),
            },
            now,
        );

        let patch = &outcome.request_patch;
        assert_eq!(patch.status, Some(RequestStatus::Approved));
        assert_eq!(patch.decided_at, Some(now));
        assert_eq!(patch.decision_notes.as_deref(), Some("ok"));

        let input = &outcome.consent_input;
        assert_eq!(input.subject_id, r.requested_by_subject_id);
        assert_eq!(input.scope_id, r.scope_id);
        assert_eq!(input.permissions, r.permissions);
        assert_eq!(input.client_safe, Some(true));
        assert_eq!(input.reason.as_deref(), Some("Approved request: Quarterly review"));
        assert_eq!(input.request_id, Some(RequestId::new("req-1")));
        assert_eq!(input.granted_by_user_id, UserId::new("admin-1"));
        assert_eq!(input.valid_until, Some(now.plus_days(90)));
        assert_eq!(input.watermark_required, Some(true));

        let draft = create_consent(outcome.consent_input, now);
        assert!(draft.client_safe);
        assert!(draft.watermark_required);
        assert_eq!(draft.valid_from, now);
    }

    #[test]
    fn test_approve_patch_applies_once() {
        let mut r = make_request("req-1", None, t0());
        let outcome = approve_request(
            &r,
            ApproveRequestInput {
                decided_by_user_id: UserId::new("admin-1"),
                decision_notes: None,
                valid_until: None,
                watermark_required: None,
            },
            t0(),
        );
        outcome.request_patch.apply(&mut r);
        assert_eq!(r.status, RequestStatus::Approved);
        assert!(!can_decide_request(&r));
        assert!(matches!(
            ensure_pending(&r, RequestStatus::Approved),
            Err(ConsentError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_reject_patch() {
        let mut r = make_request("req-1", None, t0());
        let patch = reject_request(
            RejectRequestInput {
                decided_by_user_id: UserId::new("admin-2"),
                decision_notes: Some("not needed".into()),
            },
            t0().plus_days(1),
        );
        patch.apply(&mut r);
        assert_eq!(r.status, RequestStatus::Rejected);
        assert_eq!(r.decided_by_user_id, Some(UserId::new("admin-2")));
        assert_eq!(r.consent_id, None);
        assert_eq!(r.sla_due_at, Some(t0().plus_days(5)), "deadline untouched");
    }

    #[test]
    fn test_link_consent_patch() {
        let mut r = make_request("req-1", None, t0());
        link_consent_patch(ConsentId::new("consent-1"), t0()).apply(&mut r);
        assert_eq!(r.consent_id.as_ref().map(|c| c.as_str()), Some("consent-1"));
        assert_eq!(r.status, RequestStatus::Pending);
    }

    #[test]
    fn test_requests_at_risk() {
        let now = t0();
        let due_soon = make_request("soon", Some(1), now.minus_days(1).plus_hours(6));
        let due_later = make_request("later", Some(5), now);
        let overdue = make_request("late", Some(1), now.minus_days(3));
        let mut decided = make_request("done", Some(1), now.minus_days(1).plus_hours(6));
        decided.status = RequestStatus::Approved;
        let requests = vec![due_soon, due_later, overdue, decided];

        let ids: Vec<&str> = get_requests_at_risk(&requests, DEFAULT_AT_RISK_HOURS, now)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["soon"]);

        let overdue_ids: Vec<&str> = get_overdue_requests(&requests, now)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(overdue_ids, vec!["late"]);
    }

    #[test]
    fn test_status_filters() {
        let a = make_request("a", None, t0());
        let mut b = make_request("b", None, t0());
        b.status = RequestStatus::Rejected;
        let requests = vec![a, b];
        assert_eq!(get_pending_requests(&requests).len(), 1);
        assert_eq!(get_requests_by_status(&requests, RequestStatus::Rejected)[0].id.as_str(), "b");
        assert!(get_requests_by_status(&requests, RequestStatus::Approved).is_empty());
    }
}
