//! Consent construction, activity and expiry.
//!
//! Status transitions:
//!   Active -> Expired (time-derived, applied by the caller)
//!   Active -> Revoked (explicit)
//!   any    -> Active  (extension only)
//!
//! Nothing here mutates a consent. Expiry is detected from `valid_until`
//! and reported; persisting `status = expired` is the caller's job.

use custodia_core::{Action, ClientId, ScopeId, ScopeType, SubjectId, SubjectType, Timestamp};

use crate::error::{ConsentError, ConsentResult};
use crate::types::{Consent, ConsentPatch, ConsentStatus, CreateConsentInput, NewConsent};

pub const DEFAULT_EXPIRING_SOON_DAYS: i64 = 30;

/// Resolve defaults for a new consent: `valid_from = now`, both enforcement
/// flags false, status active.
pub fn create_consent(input: CreateConsentInput, now: Timestamp) -> NewConsent {
    NewConsent {
        client_id: input.client_id,
        subject_type: input.subject_type,
        subject_id: input.subject_id,
        subject_name: input.subject_name,
        scope_type: input.scope_type,
        scope_id: input.scope_id,
        scope_name: input.scope_name,
        permissions: input.permissions,
        client_safe: input.client_safe.unwrap_or(false),
        valid_from: input.valid_from.unwrap_or(now),
        valid_until: input.valid_until,
        status: ConsentStatus::Active,
        granted_by_user_id: input.granted_by_user_id,
        reason: input.reason,
        request_id: input.request_id,
        watermark_required: input.watermark_required.unwrap_or(false),
    }
}

/// Structural checks a store runs before persisting a consent.
pub fn validate_consent_input(input: &CreateConsentInput) -> ConsentResult<()> {
    if input.subject_id.as_str().is_empty() {
        return Err(ConsentError::Validation(
            "subject_id must not be empty".to_string(),
        ));
    }
    if input.permissions.is_empty() {
        return Err(ConsentError::Validation(
            "permissions must not be empty".to_string(),
        ));
    }
    if let (Some(from), Some(until)) = (input.valid_from, input.valid_until) {
        if until <= from {
            return Err(ConsentError::Validation(format!(
                "valid_until {} must be after valid_from {}",
                until, from
            )));
        }
    }
    Ok(())
}

/// `valid_until` is set and already in the past. Ignores `status`.
pub fn is_consent_expired(consent: &Consent, now: Timestamp) -> bool {
    consent.valid_until.map_or(false, |until| until < now)
}

/// Active status, not expired, and already effective.
pub fn is_consent_active(consent: &Consent, now: Timestamp) -> bool {
    consent.status == ConsentStatus::Active
        && !is_consent_expired(consent, now)
        && now >= consent.valid_from
}

/// Patch that moves `valid_until` and re-activates the consent, whatever
/// its current status.
pub fn extend_consent(new_valid_until: Timestamp, now: Timestamp) -> ConsentPatch {
    ConsentPatch {
        status: Some(ConsentStatus::Active),
        valid_until: Some(new_valid_until),
        updated_at: now,
    }
}

/// Active-status consents expiring in `(now, now + days]`.
pub fn get_consents_expiring_soon(
    consents: &[Consent],
    days: i64,
    now: Timestamp,
) -> Vec<&Consent> {
    let horizon = now.plus_days(days);
    consents
        .iter()
        .filter(|c| c.status == ConsentStatus::Active)
        .filter(|c| matches!(c.valid_until, Some(until) if until > now && until <= horizon))
        .collect()
}

/// Active-status consents whose `valid_until` has passed.
pub fn check_auto_expire(consents: &[Consent], now: Timestamp) -> Vec<&Consent> {
    consents
        .iter()
        .filter(|c| c.status == ConsentStatus::Active && is_consent_expired(c, now))
        .collect()
}

/// The patch a caller applies to each hit of [`check_auto_expire`].
pub fn expire_patch(now: Timestamp) -> ConsentPatch {
    ConsentPatch {
        status: Some(ConsentStatus::Expired),
        valid_until: None,
        updated_at: now,
    }
}

pub fn has_permission(consent: &Consent, action: Action, now: Timestamp) -> bool {
    is_consent_active(consent, now) && consent.permissions.iter().any(|p| p.covers(action))
}

/// Active consents on `scope_type`; with a `scope_id`, only that node.
pub fn filter_consents_by_scope<'a>(
    consents: &'a [Consent],
    scope_type: ScopeType,
    scope_id: Option<&ScopeId>,
    now: Timestamp,
) -> Vec<&'a Consent> {
    consents
        .iter()
        .filter(|c| is_consent_active(c, now))
        .filter(|c| c.scope_type == scope_type)
        .filter(|c| scope_id.map_or(true, |id| c.scope_id.as_ref() == Some(id)))
        .collect()
}

pub fn filter_consents_by_subject<'a>(
    consents: &'a [Consent],
    subject_type: SubjectType,
    subject_id: &SubjectId,
    now: Timestamp,
) -> Vec<&'a Consent> {
    consents
        .iter()
        .filter(|c| is_consent_active(c, now))
        .filter(|c| c.subject_type == subject_type && &c.subject_id == subject_id)
        .collect()
}

/// Every consent of one tenant, in any status.
pub fn get_consents_for_client<'a>(consents: &'a [Consent], client_id: &ClientId) -> Vec<&'a Consent> {
    consents.iter().filter(|c| &c.client_id == client_id).collect()
}

pub fn is_valid_transition(from: ConsentStatus, to: ConsentStatus) -> bool {
    matches!(
        (from, to),
        (ConsentStatus::Active, ConsentStatus::Expired)
            | (ConsentStatus::Active, ConsentStatus::Revoked)
            | (_, ConsentStatus::Active)
    )
}

pub fn ensure_transition(consent: &Consent, to: ConsentStatus) -> ConsentResult<()> {
    if is_valid_transition(consent.status, to) {
        Ok(())
    } else {
        Err(ConsentError::InvalidStateTransition {
            kind: "consent",
            id: consent.id.to_string(),
            from: consent.status.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use custodia_core::{ClientId, ConsentId, Permission, UserId};

    pub(crate) fn t0() -> Timestamp {
        Timestamp::parse_rfc3339("2026-06-01T12:00:00Z").unwrap()
    }

    pub(crate) fn make_consent(id: &str, scope_type: ScopeType, scope_id: Option<&str>) -> Consent {
        Consent {
            id: ConsentId::new(id),
            client_id: ClientId::new("client-1"),
            subject_type: SubjectType::Advisor,
            subject_id: SubjectId::new("adv-1"),
            subject_name: Some("Avery Advisor".into()),
            scope_type,
            scope_id: scope_id.map(ScopeId::new),
            scope_name: None,
            permissions: vec![Permission::from(Action::View), Permission::from(Action::Download)],
            client_safe: false,
            valid_from: t0().minus_days(10),
            valid_until: None,
            status: ConsentStatus::Active,
            granted_by_user_id: UserId::new("admin-1"),
            reason: None,
            request_id: None,
            watermark_required: false,
            created_at: t0().minus_days(10),
            updated_at: t0().minus_days(10),
        }
    }

    fn make_input() -> CreateConsentInput {
        CreateConsentInput {
            client_id: ClientId::new("client-1"),
            subject_type: SubjectType::User,
            subject_id: SubjectId::new("user-1"),
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
            request_id: None,
            watermark_required: None,
        }
    }

    #[test]
    fn test_create_consent_defaults() {
        let draft = create_consent(make_input(), t0());
        assert_eq!(draft.valid_from, t0());
        assert!(!draft.client_safe);
        assert!(!draft.watermark_required);
        assert_eq!(draft.status, ConsentStatus::Active);
    }

    #[test]
    fn test_create_consent_keeps_explicit_values() {
        let mut input = make_input();
        input.valid_from = Some(t0().plus_days(3));
        input.client_safe = Some(true);
        input.watermark_required = Some(true);
        let draft = create_consent(input, t0());
        assert_eq!(draft.valid_from, t0().plus_days(3));
        assert!(draft.client_safe);
        assert!(draft.watermark_required);
    }

    #[test]
    fn test_into_consent_sets_store_fields() {
        let consent = create_consent(make_input(), t0()).into_consent(ConsentId::new("c-9"), t0());
        assert_eq!(consent.id.as_str(), "c-9");
        assert_eq!(consent.created_at, t0());
        assert_eq!(consent.updated_at, t0());
    }

    #[test]
    fn test_validate_consent_input() {
        assert!(validate_consent_input(&make_input()).is_ok());

        let mut empty = make_input();
        empty.permissions.clear();
        assert!(matches!(
            validate_consent_input(&empty),
            Err(ConsentError::Validation(_))
        ));

        let mut inverted = make_input();
        inverted.valid_from = Some(t0());
        inverted.valid_until = Some(t0().minus_days(1));
        assert!(validate_consent_input(&inverted).is_err());
    }

    #[test]
    fn test_activity_formula() {
        let now = t0();
        let mut c = make_consent("c1", ScopeType::Household, None);
        assert!(is_consent_active(&c, now));

        c.valid_until = Some(now);
        assert!(is_consent_active(&c, now), "valid_until == now is still active");

        c.valid_until = Some(now.minus_days(1));
        assert!(is_consent_expired(&c, now));
        assert!(!is_consent_active(&c, now));

        c.valid_until = None;
        c.valid_from = now.plus_days(1);
        assert!(!is_consent_active(&c, now), "not yet effective");

        c.valid_from = now.minus_days(1);
        c.status = ConsentStatus::Revoked;
        assert!(!is_consent_active(&c, now));
    }

    #[test]
    fn test_expired_but_not_transitioned() {
        let now = t0();
        let mut c = make_consent("c1", ScopeType::Household, None);
        c.valid_until = Some(now.minus_days(1));
        assert!(is_consent_expired(&c, now));
        assert_eq!(c.status, ConsentStatus::Active);
        assert!(!is_consent_active(&c, now));

        let consents = vec![c];
        let hits = check_auto_expire(&consents, now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "c1");
    }

    #[test]
    fn test_check_auto_expire_skips_revoked_and_open_ended() {
        let now = t0();
        let mut revoked = make_consent("c1", ScopeType::Household, None);
        revoked.valid_until = Some(now.minus_days(1));
        revoked.status = ConsentStatus::Revoked;
        let open = make_consent("c2", ScopeType::Household, None);
        assert!(check_auto_expire(&[revoked, open], now).is_empty());
    }

    #[test]
    fn test_expire_patch_applies() {
        let now = t0();
        let mut c = make_consent("c1", ScopeType::Household, None);
        expire_patch(now).apply(&mut c);
        assert_eq!(c.status, ConsentStatus::Expired);
        assert_eq!(c.updated_at, now);
        assert_eq!(c.valid_until, None);
    }

    #[test]
    fn test_extend_reactivates() {
        let now = t0();
        let mut c = make_consent("c1", ScopeType::Household, None);
        c.status = ConsentStatus::Expired;
        c.valid_until = Some(now.minus_days(2));

        let patch = extend_consent(now.plus_days(90), now);
        patch.apply(&mut c);
        assert_eq!(c.status, ConsentStatus::Active);
        assert_eq!(c.valid_until, Some(now.plus_days(90)));
        assert!(is_consent_active(&c, now));
    }

    #[test]
    fn test_expiring_soon_window() {
        let now = t0();
        let mut past = make_consent("past", ScopeType::Household, None);
        past.valid_until = Some(now.minus_days(1));
        let mut soon = make_consent("soon", ScopeType::Household, None);
        soon.valid_until = Some(now.plus_days(3));
        let mut edge = make_consent("edge", ScopeType::Household, None);
        edge.valid_until = Some(now.plus_days(7));
        let mut later = make_consent("later", ScopeType::Household, None);
        later.valid_until = Some(now.plus_days(20));
        let open = make_consent("open", ScopeType::Household, None);

        let consents = vec![past, soon, edge, later, open];
        let ids: Vec<&str> = get_consents_expiring_soon(&consents, 7, now)
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["soon", "edge"]);

        let wide = get_consents_expiring_soon(&consents, DEFAULT_EXPIRING_SOON_DAYS, now);
        assert_eq!(wide.len(), 3);

        let unbounded = get_consents_expiring_soon(&consents, i64::MAX, now);
        assert_eq!(unbounded.len(), 3);
    }

    #[test]
    fn test_has_permission() {
        let now = t0();
        let mut c = make_consent("c1", ScopeType::Household, None);
        assert!(has_permission(&c, Action::View, now));
        assert!(!has_permission(&c, Action::Export, now));

        c.status = ConsentStatus::Revoked;
        assert!(!has_permission(&c, Action::View, now));
    }

    #[test]
    fn test_filter_by_scope_only_active() {
        let now = t0();
        let acct = make_consent("a1", ScopeType::Account, Some("acct-1"));
        let other = make_consent("a2", ScopeType::Account, Some("acct-2"));
        let mut revoked = make_consent("a3", ScopeType::Account, Some("acct-1"));
        revoked.status = ConsentStatus::Revoked;
        let consents = vec![acct, other, revoked];

        let hits = filter_consents_by_scope(&consents, ScopeType::Account, Some(&ScopeId::new("acct-1")), now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a1");

        let any_account = filter_consents_by_scope(&consents, ScopeType::Account, None, now);
        assert_eq!(any_account.len(), 2);
    }

    #[test]
    fn test_filter_by_subject_only_active() {
        let now = t0();
        let a = make_consent("c1", ScopeType::Household, None);
        let mut b = make_consent("c2", ScopeType::Household, None);
        b.valid_until = Some(now.minus_days(1));
        let mut c = make_consent("c3", ScopeType::Household, None);
        c.subject_id = SubjectId::new("adv-2");
        let consents = vec![a, b, c];

        let hits = filter_consents_by_subject(&consents, SubjectType::Advisor, &SubjectId::new("adv-1"), now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "c1");
    }

    #[test]
    fn test_consents_for_client_any_status() {
        let a = make_consent("c1", ScopeType::Household, None);
        let mut b = make_consent("c2", ScopeType::Household, None);
        b.status = ConsentStatus::Revoked;
        let mut c = make_consent("c3", ScopeType::Household, None);
        c.client_id = ClientId::new("client-2");
        let consents = vec![a, b, c];
        assert_eq!(get_consents_for_client(&consents, &ClientId::new("client-1")).len(), 2);
    }

    #[test]
    fn test_transitions() {
        assert!(is_valid_transition(ConsentStatus::Active, ConsentStatus::Revoked));
        assert!(is_valid_transition(ConsentStatus::Active, ConsentStatus::Expired));
        assert!(is_valid_transition(ConsentStatus::Revoked, ConsentStatus::Active));
        assert!(!is_valid_transition(ConsentStatus::Revoked, ConsentStatus::Expired));
        assert!(!is_valid_transition(ConsentStatus::Expired, ConsentStatus::Revoked));

        let mut c = make_consent("c1", ScopeType::Household, None);
        c.status = ConsentStatus::Revoked;
        let err = ensure_transition(&c, ConsentStatus::Revoked).unwrap_err();
        assert!(matches!(err, ConsentError::InvalidStateTransition { .. }));
    }
}
