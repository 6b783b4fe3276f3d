use std::sync::Mutex;

use custodia_consent::{has_permission, is_consent_active, Consent};
use custodia_core::{ScopeType, Timestamp};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};
use crate::rule::{applicable_policies, apply_rule, find_matching_rule, validate_policies, RuleEffect};
use crate::types::{
    DecisionRecord, EvaluationContext, EvaluationResult, EvaluationSnapshot, PolicyPreview,
    SharingPolicy,
};

pub const NO_CONSENT_REASON: &str = "No active consent found for this subject and scope";

const MAX_POLICY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Consent location
// ---------------------------------------------------------------------------

/// The most specific active consent covering the context's subject.
///
/// Candidates are the subject's active consents for the tenant. The first
/// tier with a hit wins: a direct grant on the target itself, then a grant
/// on the context's enclosing scope, then any household grant.
pub fn find_applicable_consent<'a>(
    consents: &'a [Consent],
    ctx: &EvaluationContext,
    now: Timestamp,
) -> Option<&'a Consent> {
    let candidates: Vec<&Consent> = consents
        .iter()
        .filter(|c| {
            c.subject_type == ctx.subject_type
                && c.subject_id == ctx.subject_id
                && c.client_id == ctx.client_id
        })
        .filter(|c| is_consent_active(c, now))
        .collect();

    let target_scope = ctx.target_type.scope_type();
    let direct = candidates.iter().copied().find(|c| {
        c.scope_type == target_scope
            && c.scope_id.as_ref().map(|id| id.as_str()) == Some(ctx.target_id.as_str())
    });
    if let Some(consent) = direct {
        return Some(consent);
    }

    if let Some(scope_type) = ctx.scope_type {
        let enclosing = candidates
            .iter()
            .copied()
            .find(|c| c.is_scoped_to(scope_type, ctx.scope_id.as_ref()));
        if let Some(consent) = enclosing {
            return Some(consent);
        }
    }

    candidates
        .into_iter()
        .find(|c| c.scope_type == ScopeType::Household)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Decide whether `ctx` is allowed against a consistent set of consents and
/// policies.
///
/// Policies run in ascending priority. The first matching rule of each
/// policy either denies (ending evaluation immediately) or passes and
/// ORs its enforcement flags into those carried by the consent.
pub fn evaluate_access(
    consents: &[Consent],
    policies: &[SharingPolicy],
    ctx: &EvaluationContext,
    now: Timestamp,
) -> EvaluationResult {
    let consent = match find_applicable_consent(consents, ctx, now) {
        Some(c) => c,
        None => {
            debug!(subject = %ctx.subject_id, target = %ctx.target_id, "no applicable consent");
            return EvaluationResult::deny(NO_CONSENT_REASON);
        }
    };

    if !has_permission(consent, ctx.action, now) {
        debug!(consent = %consent.id, action = %ctx.action, "consent lacks permission");
        return EvaluationResult::deny(format!(
            "Consent does not grant \"{}\" permission",
            ctx.action
        ))
        .with_consent(consent.id.clone());
    }

    let mut enforce_watermark = consent.watermark_required;
    let mut enforce_client_safe = consent.client_safe;
    let mut applied_policy_id = None;

    for policy in applicable_policies(policies, &ctx.client_id, ctx.target_type) {
        let rule = match find_matching_rule(policy, ctx) {
            Some(rule) => rule,
            None => continue,
        };
        match apply_rule(rule, policy, ctx.action) {
            RuleEffect::Deny { reason } => {
                debug!(policy = %policy.id, action = %ctx.action, "policy denied access");
                return EvaluationResult::deny(reason)
                    .with_consent(consent.id.clone())
                    .with_policy(policy.id.clone());
            }
            RuleEffect::Pass {
                enforce_watermark: watermark,
                enforce_client_safe: client_safe,
            } => {
                enforce_watermark |= watermark;
                enforce_client_safe |= client_safe;
                applied_policy_id = Some(policy.id.clone());
            }
        }
    }

    debug!(
        consent = %consent.id,
        watermark = enforce_watermark,
        client_safe = enforce_client_safe,
        "access granted"
    );
    EvaluationResult {
        allowed: true,
        reason: "Access granted".to_string(),
        applied_consent_id: Some(consent.id.clone()),
        applied_policy_id,
        enforce_watermark,
        enforce_client_safe,
    }
}

/// Dry-run the policy layer for `ctx` without a consent. Every applicable
/// policy with a matching rule gets a verdict; nothing short-circuits.
pub fn preview_policy_evaluation(
    policies: &[SharingPolicy],
    ctx: &EvaluationContext,
) -> Vec<PolicyPreview> {
    applicable_policies(policies, &ctx.client_id, ctx.target_type)
        .into_iter()
        .filter_map(|policy| {
            let rule = find_matching_rule(policy, ctx)?;
            let verdict = match apply_rule(rule, policy, ctx.action) {
                RuleEffect::Deny { reason } => format!("DENIED: {}", reason),
                RuleEffect::Pass {
                    enforce_watermark,
                    enforce_client_safe,
                } => allowed_verdict(enforce_watermark, enforce_client_safe),
            };
            Some(PolicyPreview {
                policy_id: policy.id.clone(),
                policy_name: policy.name.clone(),
                verdict,
            })
        })
        .collect()
}

fn allowed_verdict(watermark: bool, client_safe: bool) -> String {
    let mut flags = Vec::new();
    if watermark {
        flags.push("watermark");
    }
    if client_safe {
        flags.push("client-safe");
    }
    if flags.is_empty() {
        "ALLOWED".to_string()
    } else {
        format!("ALLOWED ({})", flags.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Policy loading
// ---------------------------------------------------------------------------

/// Parse and validate a JSON array of sharing policies.
pub fn load_policies(policy_data: &[u8]) -> PolicyResult<Vec<SharingPolicy>> {
    if policy_data.is_empty() {
        return Err(PolicyError::LoadError("policy data is empty".to_string()));
    }
    if policy_data.len() > MAX_POLICY_BYTES {
        return Err(PolicyError::LoadError(
            "policy data exceeds 10MB size limit".to_string(),
        ));
    }

    let json_str = std::str::from_utf8(policy_data)
        .map_err(|_| PolicyError::LoadError("policy data is not valid UTF-8".to_string()))?;

    let policies: Vec<SharingPolicy> = serde_json::from_str(json_str)
        .map_err(|e| PolicyError::DeserializationError(format!("JSON parse error: {}", e)))?;

    validate_policies(&policies).map_err(|errors| PolicyError::ValidationError(errors.join("; ")))?;

    Ok(policies)
}

// ---------------------------------------------------------------------------
// DecisionAuditSink: one record per evaluated access attempt
// ---------------------------------------------------------------------------

pub trait DecisionAuditSink: Send + Sync {
    fn emit(&self, record: &DecisionRecord) -> Result<(), String>;
}

/// In-memory decision sink for tests and the CLI.
#[derive(Default)]
pub struct InMemoryDecisionSink {
    records: Mutex<Vec<DecisionRecord>>,
}

impl InMemoryDecisionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl DecisionAuditSink for InMemoryDecisionSink {
    fn emit(&self, record: &DecisionRecord) -> Result<(), String> {
        self.records
            .lock()
            .map_err(|_| "decision sink lock poisoned".to_string())?
            .push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AccessEvaluator: audited wrapper around `evaluate_access`
// ---------------------------------------------------------------------------

/// Evaluates access against a snapshot and records every decision.
///
/// A decision is only returned once its record has been accepted by the
/// sink.
pub struct AccessEvaluator<'a> {
    audit_sink: &'a dyn DecisionAuditSink,
}

impl<'a> AccessEvaluator<'a> {
    pub fn new(audit_sink: &'a dyn DecisionAuditSink) -> Self {
        Self { audit_sink }
    }

    pub fn evaluate(
        &self,
        snapshot: &EvaluationSnapshot,
        ctx: &EvaluationContext,
        now: Timestamp,
    ) -> PolicyResult<EvaluationResult> {
        validate_context(ctx)?;

        let result = evaluate_access(&snapshot.consents, &snapshot.policies, ctx, now);

        let record = DecisionRecord::new(ctx, &result, now);
        self.audit_sink
            .emit(&record)
            .map_err(|e| PolicyError::AuditSinkError(format!("failed to emit decision: {}", e)))?;

        Ok(result)
    }

    pub fn preview(
        &self,
        snapshot: &EvaluationSnapshot,
        ctx: &EvaluationContext,
    ) -> PolicyResult<Vec<PolicyPreview>> {
        validate_context(ctx)?;
        Ok(preview_policy_evaluation(&snapshot.policies, ctx))
    }
}

fn validate_context(ctx: &EvaluationContext) -> PolicyResult<()> {
    if ctx.client_id.as_str().is_empty() {
        return Err(PolicyError::InvalidContext(
            "client_id must not be empty".to_string(),
        ));
    }
    if ctx.subject_id.as_str().is_empty() {
        return Err(PolicyError::InvalidContext(
            "subject_id must not be empty".to_string(),
        ));
    }
    if ctx.target_id.as_str().is_empty() {
        return Err(PolicyError::InvalidContext(
            "target_id must not be empty".to_string(),
        ));
    }
    if ctx.scope_id.is_some() && ctx.scope_type.is_none() {
        return Err(PolicyError::InvalidContext(
            "scope_id given without scope_type".to_string(),
        ));
    }
    Ok(())
}
