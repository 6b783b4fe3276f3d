//! Imperative shell around the consent workflows and the access evaluator.
//!
//! `AccessService` reads from a `RecordStore`, runs the pure functions of
//! `custodia-consent` and `custodia-policy`, and writes the resulting
//! patches back. Multi-step writes follow these rules:
//!
//! - approve: request patch (compare-and-swap on pending), then consent
//!   keyed by `request_id`, then link the consent onto the request.
//!   `reconcile_approved_requests` completes approvals interrupted between
//!   those steps.
//! - revoke / expire: a compare-and-swap on the consent still being active,
//!   so two actors cannot both terminate the same consent. A revoke writes
//!   the status and its revocation record in the same store call.
//!
//! Audit entries are appended after the write commits; an append failure is
//! logged and does not fail the operation.

use custodia_consent::{
    approve_request, can_revoke_consent, cannot_revoke_reason, check_auto_expire, create_consent,
    create_request, ensure_pending, ensure_transition, expire_patch, extend_consent,
    get_consents_expiring_soon, get_overdue_requests, get_recent_revocations,
    get_requests_at_risk, link_consent_patch, reject_request, revoke_consent,
    validate_bulk_revoke, validate_consent_input, validate_request_input, AccessRequest,
    ApproveRequestInput, BulkRevokeFailure, BulkRevokeValidation, Consent, ConsentError,
    ConsentStatus, CreateConsentInput, CreateRequestInput, RejectRequestInput, RequestStatus,
    Revocation, RevokeConsentInput, CONSENT_NOT_FOUND_REASON,
};
use custodia_core::{ConsentId, RequestId, Timestamp, UserId};
use custodia_policy::{
    load_policies, AccessEvaluator, DecisionAuditSink, DecisionRecord, EvaluationContext,
    EvaluationResult, PolicyPreview, SharingPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditTrail};
use crate::config::CustodiaConfig;
use crate::error::{RootError, RootResult};
use crate::store::RecordStore;

/// Result of a completed approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedRequest {
    pub request: AccessRequest,
    pub consent: Consent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedApproval {
    pub request_id: RequestId,
    pub reason: String,
}

/// What a reconciliation pass found and fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// Approved requests linked to a consent that already existed.
    pub linked: Vec<RequestId>,
    /// Approved requests whose consent had to be created.
    pub created: Vec<RequestId>,
    /// Approved requests that could not be completed.
    pub orphaned: Vec<OrphanedApproval>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.linked.is_empty() && self.created.is_empty() && self.orphaned.is_empty()
    }

    /// Fail if any approval was left without a consent.
    pub fn ensure_complete(&self) -> RootResult<()> {
        if self.orphaned.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = self.orphaned.iter().map(|o| o.request_id.as_str()).collect();
        Err(RootError::Reconciliation(format!(
            "approved request(s) without a consent: {}",
            ids.join(", ")
        )))
    }
}

struct DiscardDecisions;

impl DecisionAuditSink for DiscardDecisions {
    fn emit(&self, _record: &DecisionRecord) -> Result<(), String> {
        Ok(())
    }
}

pub struct AccessService<S: RecordStore> {
    store: S,
    config: CustodiaConfig,
    audit: AuditTrail,
}

impl<S: RecordStore> AccessService<S> {
    pub fn new(store: S, config: CustodiaConfig) -> Self {
        Self {
            store,
            config,
            audit: AuditTrail::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &CustodiaConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Append a state change to the trail. Runs after the write has
    /// committed, so a failure is logged rather than returned.
    fn record(&self, event: AuditEvent, now: Timestamp) {
        if !self.config.audit.enabled {
            return;
        }
        if let Err(e) = self.audit.append(event, now) {
            warn!(error = %e, "audit append failed after committed write");
        }
    }

    fn require_consent(&self, id: &ConsentId) -> RootResult<Consent> {
        self.store
            .get_consent(id)?
            .ok_or_else(|| ConsentError::consent_not_found(id.as_str()).into())
    }

    fn require_request(&self, id: &RequestId) -> RootResult<AccessRequest> {
        self.store
            .get_request(id)?
            .ok_or_else(|| ConsentError::request_not_found(id.as_str()).into())
    }

    // -----------------------------------------------------------------------
    // Consents
    // -----------------------------------------------------------------------

    pub fn grant_consent(&self, input: CreateConsentInput, now: Timestamp) -> RootResult<Consent> {
        validate_consent_input(&input)?;
        let consent = self.store.create_consent(create_consent(input, now), now)?;
        info!(consent = %consent.id, subject = %consent.subject_id, "consent granted");
        Ok(consent)
    }

    /// Push `valid_until` out and re-activate the consent, whatever its
    /// current status.
    pub fn extend(
        &self,
        consent_id: &ConsentId,
        new_valid_until: Timestamp,
        now: Timestamp,
    ) -> RootResult<Consent> {
        let current = self.require_consent(consent_id)?;
        ensure_transition(&current, ConsentStatus::Active)?;
        if new_valid_until <= now {
            return Err(ConsentError::Validation(format!(
                "new valid_until {} is not in the future",
                new_valid_until
            ))
            .into());
        }
        let consent = self
            .store
            .update_consent(consent_id, &extend_consent(new_valid_until, now))?;
        info!(consent = %consent.id, valid_until = %new_valid_until, "consent extended");
        self.record(
            AuditEvent::ConsentExtended {
                consent_id: consent.id.clone(),
                valid_until: new_valid_until,
            },
            now,
        );
        Ok(consent)
    }

    /// Revoke one consent. Fails if it is not active, including when another
    /// actor terminated it between the read and the write.
    pub fn revoke(
        &self,
        consent_id: &ConsentId,
        revoked_by_user_id: UserId,
        reason: String,
        now: Timestamp,
    ) -> RootResult<Revocation> {
        let consent = self.require_consent(consent_id)?;
        ensure_transition(&consent, ConsentStatus::Revoked)?;
        match self.apply_revocation(&consent, revoked_by_user_id, reason, now)? {
            Some(revocation) => Ok(revocation),
            None => {
                let current = self.require_consent(consent_id)?;
                Err(revoke_conflict(&current).into())
            }
        }
    }

    /// Revoke `consent` if it is still active in the store. `None` means the
    /// compare-and-swap lost.
    fn apply_revocation(
        &self,
        consent: &Consent,
        revoked_by_user_id: UserId,
        reason: String,
        now: Timestamp,
    ) -> RootResult<Option<Revocation>> {
        let outcome = revoke_consent(
            RevokeConsentInput {
                consent,
                revoked_by_user_id,
                reason,
            },
            now,
        );
        let revocation = match self.store.revoke_if_active(
            &consent.id,
            &outcome.consent_patch,
            outcome.revocation,
            now,
        )? {
            Some(revocation) => revocation,
            None => return Ok(None),
        };
        info!(consent = %consent.id, revocation = %revocation.id, "consent revoked");
        self.record(
            AuditEvent::ConsentRevoked {
                consent_id: consent.id.clone(),
                revocation_id: revocation.id.clone(),
                revoked_by_user_id: revocation.revoked_by_user_id.clone(),
            },
            now,
        );
        Ok(Some(revocation))
    }

    /// Validate and then revoke a batch. Ids that pass validation but are
    /// terminated by someone else before the write land in `failed`.
    pub fn apply_bulk_revoke(
        &self,
        consent_ids: &[ConsentId],
        revoked_by_user_id: UserId,
        reason: String,
        now: Timestamp,
    ) -> RootResult<BulkRevokeValidation> {
        let snapshot = self.store.snapshot()?;
        let validation = validate_bulk_revoke(&snapshot.consents, consent_ids);

        let mut result = BulkRevokeValidation {
            successful: Vec::new(),
            failed: validation.failed,
        };

        for id in validation.successful {
            let current = match self.store.get_consent(&id)? {
                Some(c) => c,
                None => {
                    result.failed.push(BulkRevokeFailure {
                        consent_id: id,
                        reason: CONSENT_NOT_FOUND_REASON.to_string(),
                    });
                    continue;
                }
            };
            let applied = if can_revoke_consent(&current) {
                self.apply_revocation(&current, revoked_by_user_id.clone(), reason.clone(), now)?
            } else {
                None
            };
            match applied {
                Some(_) => result.successful.push(id),
                None => {
                    let status = self
                        .store
                        .get_consent(&id)?
                        .map(|c| c.status)
                        .unwrap_or(current.status);
                    result.failed.push(BulkRevokeFailure {
                        consent_id: id,
                        reason: cannot_revoke_reason(status),
                    });
                }
            }
        }

        if !result.failed.is_empty() {
            warn!(
                revoked = result.successful.len(),
                failed = result.failed.len(),
                "bulk revoke finished with failures"
            );
        }
        Ok(result)
    }

    /// Persist `status = expired` on every active consent whose validity has
    /// lapsed. Returns the ids actually transitioned.
    pub fn apply_auto_expire(&self, now: Timestamp) -> RootResult<Vec<ConsentId>> {
        let snapshot = self.store.snapshot()?;
        let mut expired = Vec::new();
        for consent in check_auto_expire(&snapshot.consents, now) {
            if self
                .store
                .update_consent_if_active(&consent.id, &expire_patch(now))?
            {
                info!(consent = %consent.id, "consent expired");
                self.record(
                    AuditEvent::ConsentExpired {
                        consent_id: consent.id.clone(),
                    },
                    now,
                );
                expired.push(consent.id.clone());
            }
        }
        Ok(expired)
    }

    pub fn expiring_soon(&self, now: Timestamp) -> RootResult<Vec<Consent>> {
        let snapshot = self.store.snapshot()?;
        Ok(get_consents_expiring_soon(
            &snapshot.consents,
            self.config.lifecycle.expiring_soon_days,
            now,
        )
        .into_iter()
        .cloned()
        .collect())
    }

    pub fn recent_revocations(&self, now: Timestamp) -> RootResult<Vec<Revocation>> {
        let snapshot = self.store.snapshot()?;
        Ok(get_recent_revocations(
            &snapshot.revocations,
            self.config.lifecycle.recent_revocation_days,
            now,
        )
        .into_iter()
        .cloned()
        .collect())
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Submit a request. Without an explicit `sla_days` the configured
    /// default applies.
    pub fn submit_request(
        &self,
        mut input: CreateRequestInput,
        now: Timestamp,
    ) -> RootResult<AccessRequest> {
        validate_request_input(&input)?;
        if input.sla_days.is_none() {
            input.sla_days = Some(self.config.workflow.default_sla_days);
        }
        let request = self.store.create_request(create_request(input, now), now)?;
        info!(request = %request.id, due = ?request.sla_due_at, "access request submitted");
        Ok(request)
    }

    /// Approve a pending request and create its consent.
    ///
    /// Exactly one of several concurrent deciders wins; the rest get
    /// `InvalidStateTransition`. If the process dies after the request is
    /// marked approved, `reconcile_approved_requests` finishes the job.
    pub fn approve(
        &self,
        request_id: &RequestId,
        input: ApproveRequestInput,
        now: Timestamp,
    ) -> RootResult<ApprovedRequest> {
        let request = self.require_request(request_id)?;
        ensure_pending(&request, RequestStatus::Approved)?;

        let decided_by = input.decided_by_user_id.clone();
        let outcome = approve_request(&request, input, now);
        validate_consent_input(&outcome.consent_input)?;

        if !self
            .store
            .update_request_if_pending(request_id, &outcome.request_patch)?
        {
            return Err(self.decision_conflict(request_id, RequestStatus::Approved));
        }
        debug!(request = %request_id, "request marked approved");

        let consent = self.consent_for_request(request_id, outcome.consent_input, now)?;
        let request = self
            .store
            .update_request(request_id, &link_consent_patch(consent.id.clone(), now))?;

        info!(request = %request.id, consent = %consent.id, "access request approved");
        self.record(
            AuditEvent::RequestApproved {
                request_id: request.id.clone(),
                consent_id: consent.id.clone(),
                decided_by_user_id: decided_by,
            },
            now,
        );
        Ok(ApprovedRequest { request, consent })
    }

    /// Error for a decider that lost the compare-and-swap on a pending request.
    fn decision_conflict(&self, request_id: &RequestId, to: RequestStatus) -> RootError {
        match self.require_request(request_id) {
            Ok(current) => ConsentError::InvalidStateTransition {
                kind: "request",
                id: current.id.to_string(),
                from: current.status.to_string(),
                to: to.to_string(),
            }
            .into(),
            Err(e) => e,
        }
    }

    /// The consent created for `request_id`, creating it on first use.
    fn consent_for_request(
        &self,
        request_id: &RequestId,
        consent_input: CreateConsentInput,
        now: Timestamp,
    ) -> RootResult<Consent> {
        if let Some(existing) = self.store.find_consent_by_request(request_id)? {
            debug!(request = %request_id, consent = %existing.id, "reusing consent for request");
            return Ok(existing);
        }
        self.store
            .create_consent(create_consent(consent_input, now), now)
    }

    pub fn reject(
        &self,
        request_id: &RequestId,
        input: RejectRequestInput,
        now: Timestamp,
    ) -> RootResult<AccessRequest> {
        let request = self.require_request(request_id)?;
        ensure_pending(&request, RequestStatus::Rejected)?;

        let decided_by = input.decided_by_user_id.clone();
        let patch = reject_request(input, now);
        if !self.store.update_request_if_pending(request_id, &patch)? {
            return Err(self.decision_conflict(request_id, RequestStatus::Rejected));
        }
        let request = self.require_request(request_id)?;

        info!(request = %request.id, "access request rejected");
        self.record(
            AuditEvent::RequestRejected {
                request_id: request.id.clone(),
                decided_by_user_id: decided_by,
            },
            now,
        );
        Ok(request)
    }

    /// Finish approvals that stopped after the request was marked approved.
    ///
    /// An existing consent carrying the request id is linked. Otherwise the
    /// consent is rebuilt from the request and its recorded decider; the
    /// approver's optional terms (`valid_until`, watermark) are not stored on
    /// the request and are not restored. Requests with no decider are
    /// reported as orphaned and left alone.
    pub fn reconcile_approved_requests(&self, now: Timestamp) -> RootResult<ReconciliationReport> {
        let snapshot = self.store.snapshot()?;
        let mut report = ReconciliationReport::default();

        let unlinked = snapshot
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Approved && r.consent_id.is_none());

        for request in unlinked {
            let consent = match self.store.find_consent_by_request(&request.id)? {
                Some(existing) => {
                    report.linked.push(request.id.clone());
                    existing
                }
                None => match self.rebuild_consent(request, now) {
                    Ok(created) => {
                        report.created.push(request.id.clone());
                        created
                    }
                    Err(reason) => {
                        warn!(request = %request.id, %reason, "approved request has no consent");
                        report.orphaned.push(OrphanedApproval {
                            request_id: request.id.clone(),
                            reason,
                        });
                        continue;
                    }
                },
            };

            self.store
                .update_request(&request.id, &link_consent_patch(consent.id.clone(), now))?;
            warn!(request = %request.id, consent = %consent.id, "reconciled approved request");
            self.record(
                AuditEvent::ApprovalReconciled {
                    request_id: request.id.clone(),
                    consent_id: consent.id.clone(),
                },
                now,
            );
        }

        Ok(report)
    }

    fn rebuild_consent(&self, request: &AccessRequest, now: Timestamp) -> Result<Consent, String> {
        let decided_by = request
            .decided_by_user_id
            .clone()
            .ok_or_else(|| "approval has no recorded decider".to_string())?;
        let outcome = approve_request(
            request,
            ApproveRequestInput {
                decided_by_user_id: decided_by,
                decision_notes: None,
                valid_until: None,
                watermark_required: None,
            },
            now,
        );
        validate_consent_input(&outcome.consent_input).map_err(|e| e.to_string())?;
        let valid_from = request.decided_at.unwrap_or(now);
        let mut draft = create_consent(outcome.consent_input, now);
        draft.valid_from = valid_from;
        self.store
            .create_consent(draft, now)
            .map_err(|e| e.to_string())
    }

    pub fn overdue_requests(&self, now: Timestamp) -> RootResult<Vec<AccessRequest>> {
        let snapshot = self.store.snapshot()?;
        Ok(get_overdue_requests(&snapshot.requests, now)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn requests_at_risk(&self, now: Timestamp) -> RootResult<Vec<AccessRequest>> {
        let snapshot = self.store.snapshot()?;
        Ok(
            get_requests_at_risk(&snapshot.requests, self.config.workflow.at_risk_hours, now)
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    // -----------------------------------------------------------------------
    // Policies and evaluation
    // -----------------------------------------------------------------------

    /// Replace the stored policy set with a validated JSON document.
    pub fn import_policies(&self, policy_data: &[u8]) -> RootResult<Vec<SharingPolicy>> {
        let policies = load_policies(policy_data)?;
        for policy in &policies {
            self.store.put_policy(policy.clone())?;
        }
        info!(count = policies.len(), "policies imported");
        Ok(policies)
    }

    /// Evaluate against one consistent snapshot of consents and policies.
    pub fn evaluate(&self, ctx: &EvaluationContext, now: Timestamp) -> RootResult<EvaluationResult> {
        let snapshot = self.store.snapshot()?.evaluation_snapshot();
        let result = if self.config.audit.enabled {
            AccessEvaluator::new(&self.audit).evaluate(&snapshot, ctx, now)?
        } else {
            AccessEvaluator::new(&DiscardDecisions).evaluate(&snapshot, ctx, now)?
        };
        Ok(result)
    }

    pub fn preview(&self, ctx: &EvaluationContext) -> RootResult<Vec<PolicyPreview>> {
        let snapshot = self.store.snapshot()?.evaluation_snapshot();
        Ok(AccessEvaluator::new(&DiscardDecisions).preview(&snapshot, ctx)?)
    }
}

fn revoke_conflict(consent: &Consent) -> ConsentError {
    ConsentError::InvalidStateTransition {
        kind: "consent",
        id: consent.id.to_string(),
        from: consent.status.to_string(),
        to: ConsentStatus::Revoked.to_string(),
    }
}
