//! Explicit consent termination and the append-only revocation log.
//!
//! `revoke_consent` does not check that the consent is still active. Callers
//! must gate it with [`can_revoke_consent`]; skipping the check produces a
//! revocation record and patch for an already terminal consent.

use custodia_core::{ConsentId, SubjectId, SubjectType, Timestamp};
use std::collections::HashMap;

use crate::types::{
    BulkRevokeFailure, BulkRevokeValidation, Consent, ConsentPatch, ConsentStatus, NewRevocation,
    Revocation, RevocationOutcome, RevokeConsentInput,
};

pub const DEFAULT_RECENT_REVOCATION_DAYS: i64 = 30;

pub const CONSENT_NOT_FOUND_REASON: &str = "Consent not found";

pub fn can_revoke_consent(consent: &Consent) -> bool {
    consent.status == ConsentStatus::Active
}

/// Failure reason reported for a consent that cannot be revoked.
pub fn cannot_revoke_reason(status: ConsentStatus) -> String {
    format!("Cannot revoke consent with status \"{}\"", status)
}

/// Revocation record plus the consent patch that terminates it. Subject and
/// scope are copied from the consent as it is now.
pub fn revoke_consent(input: RevokeConsentInput<'_>, now: Timestamp) -> RevocationOutcome {
    let consent = input.consent;
    let revocation = NewRevocation {
        client_id: consent.client_id.clone(),
        consent_id: consent.id.clone(),
        subject_type: consent.subject_type,
        subject_id: consent.subject_id.clone(),
        subject_name: consent.subject_name.clone(),
        scope_type: consent.scope_type,
        scope_id: consent.scope_id.clone(),
        scope_name: consent.scope_name.clone(),
        revoked_by_user_id: input.revoked_by_user_id,
        reason: input.reason,
        revoked_at: now,
    };
    let consent_patch = ConsentPatch {
        status: Some(ConsentStatus::Revoked),
        valid_until: None,
        updated_at: now,
    };
    RevocationOutcome {
        revocation,
        consent_patch,
    }
}

/// Dry-run partition of `ids` into revocable and not. Order of `ids` is
/// kept in both lists. Nothing is revoked; each success still has to be
/// applied (and re-checked) individually.
pub fn validate_bulk_revoke(consents: &[Consent], ids: &[ConsentId]) -> BulkRevokeValidation {
    let by_id: HashMap<&ConsentId, &Consent> = consents.iter().map(|c| (&c.id, c)).collect();
    let mut result = BulkRevokeValidation::default();

    for id in ids {
        match by_id.get(id) {
            None => result.failed.push(BulkRevokeFailure {
                consent_id: id.clone(),
                reason: CONSENT_NOT_FOUND_REASON.to_string(),
            }),
            Some(consent) if !can_revoke_consent(consent) => {
                result.failed.push(BulkRevokeFailure {
                    consent_id: id.clone(),
                    reason: cannot_revoke_reason(consent.status),
                })
            }
            Some(_) => result.successful.push(id.clone()),
        }
    }

    result
}

pub fn get_revocations_for_consent<'a>(
    revocations: &'a [Revocation],
    consent_id: &ConsentId,
) -> Vec<&'a Revocation> {
    revocations
        .iter()
        .filter(|r| &r.consent_id == consent_id)
        .collect()
}

pub fn get_revocations_for_subject<'a>(
    revocations: &'a [Revocation],
    subject_type: SubjectType,
    subject_id: &SubjectId,
) -> Vec<&'a Revocation> {
    revocations
        .iter()
        .filter(|r| r.subject_type == subject_type && &r.subject_id == subject_id)
        .collect()
}

/// Revocations from the last `days` days, inclusive of the cutoff.
pub fn get_recent_revocations(
    revocations: &[Revocation],
    days: i64,
    now: Timestamp,
) -> Vec<&Revocation> {
    let cutoff = now.minus_days(days);
    revocations
        .iter()
        .filter(|r| r.revoked_at >= cutoff)
        .collect()
}
