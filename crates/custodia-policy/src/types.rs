use custodia_consent::Consent;
use custodia_core::{
    Action, ClientId, ConsentId, PolicyId, ScopeId, ScopeType, SubjectId, SubjectType, TargetId,
    TargetType, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SharingPolicy
// ---------------------------------------------------------------------------

/// Which artifact kinds a policy governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAppliesTo {
    Documents,
    Reports,
    Both,
}

impl PolicyAppliesTo {
    pub fn covers(&self, target: TargetType) -> bool {
        matches!(
            (self, target),
            (PolicyAppliesTo::Both, _)
                | (PolicyAppliesTo::Documents, TargetType::Document)
                | (PolicyAppliesTo::Reports, TargetType::Report)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Active,
    Paused,
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyStatus::Active => write!(f, "active"),
            PolicyStatus::Paused => write!(f, "paused"),
        }
    }
}

/// One rule inside a sharing policy.
///
/// Each `match_*` set filters on one dimension of the request; an absent
/// or empty set does not filter. A rule with no filters matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_scope_type: Option<Vec<ScopeType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_doc_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_report_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_role: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_actions: Option<Vec<Action>>,
    #[serde(default)]
    pub enforce_watermark: bool,
    #[serde(default)]
    pub enforce_client_safe: bool,
}

/// A tenant's priority-ranked rule list. Lower `priority` is evaluated
/// first; within a policy only the first matching rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingPolicy {
    pub id: PolicyId,
    pub client_id: ClientId,
    pub name: String,
    pub applies_to: PolicyAppliesTo,
    pub status: PolicyStatus,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

// ---------------------------------------------------------------------------
// Evaluation input / output
// ---------------------------------------------------------------------------

/// Who wants to do what to which artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub client_id: ClientId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub subject_role: Option<String>,
    pub action: Action,
    pub target_type: TargetType,
    pub target_id: TargetId,
    #[serde(default)]
    pub target_tags: Vec<String>,
    #[serde(default)]
    pub target_report_type: Option<String>,
    /// Enclosing scope of the target, e.g. the account a document sits in.
    #[serde(default)]
    pub scope_type: Option<ScopeType>,
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_consent_id: Option<ConsentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_policy_id: Option<PolicyId>,
    pub enforce_watermark: bool,
    pub enforce_client_safe: bool,
}

impl EvaluationResult {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            applied_consent_id: None,
            applied_policy_id: None,
            enforce_watermark: false,
            enforce_client_safe: false,
        }
    }

    pub fn with_consent(mut self, consent_id: ConsentId) -> Self {
        self.applied_consent_id = Some(consent_id);
        self
    }

    pub fn with_policy(mut self, policy_id: PolicyId) -> Self {
        self.applied_policy_id = Some(policy_id);
        self
    }
}

/// Per-policy verdict from a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPreview {
    pub policy_id: PolicyId,
    pub policy_name: String,
    pub verdict: String,
}

/// Consents and policies read together, so an evaluation never sees half
/// of a revoke.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSnapshot {
    #[serde(default)]
    pub consents: Vec<Consent>,
    #[serde(default)]
    pub policies: Vec<SharingPolicy>,
}

/// One evaluated access attempt, as handed to a [`crate::DecisionAuditSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub evaluated_at: Timestamp,
    pub client_id: ClientId,
    pub subject_type: SubjectType,
    pub subject_id: SubjectId,
    pub action: Action,
    pub target_type: TargetType,
    pub target_id: TargetId,
    pub allowed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_consent_id: Option<ConsentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_policy_id: Option<PolicyId>,
    pub enforce_watermark: bool,
    pub enforce_client_safe: bool,
}

impl DecisionRecord {
    pub fn new(ctx: &EvaluationContext, result: &EvaluationResult, evaluated_at: Timestamp) -> Self {
        Self {
            evaluated_at,
            client_id: ctx.client_id.clone(),
            subject_type: ctx.subject_type,
            subject_id: ctx.subject_id.clone(),
            action: ctx.action,
            target_type: ctx.target_type,
            target_id: ctx.target_id.clone(),
            allowed: result.allowed,
            reason: result.reason.clone(),
            applied_consent_id: result.applied_consent_id.clone(),
            applied_policy_id: result.applied_policy_id.clone(),
            enforce_watermark: result.enforce_watermark,
            enforce_client_safe: result.enforce_client_safe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_to_covers() {
        assert!(PolicyAppliesTo::Both.covers(TargetType::Document));
        assert!(PolicyAppliesTo::Both.covers(TargetType::Report));
        assert!(PolicyAppliesTo::Documents.covers(TargetType::Document));
        assert!(!PolicyAppliesTo::Documents.covers(TargetType::Report));
        assert!(PolicyAppliesTo::Reports.covers(TargetType::Report));
        assert!(!PolicyAppliesTo::Reports.covers(TargetType::Document));
    }

    #[test]
    fn test_policy_deserializes_from_camel_case() {
        let json = r#"{
            "id": "policy-1",
            "clientId": "client-1",
            "name": "Confidential downloads",
            "appliesTo": "documents",
            "status": "active",
            "priority": 1,
            "rules": [
                { "matchDocTags": ["confidential"], "denyActions": ["download"] },
                { "enforceWatermark": true }
            ]
        }"#;
        let policy: SharingPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.applies_to, PolicyAppliesTo::Documents);
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].deny_actions, Some(vec![Action::Download]));
        assert!(policy.rules[1].enforce_watermark);
        assert_eq!(policy.rules[1].match_role, None);
    }

    #[test]
    fn test_deny_result_has_no_flags() {
        let r = EvaluationResult::deny("nope");
        assert!(!r.allowed);
        assert!(!r.enforce_watermark);
        assert!(!r.enforce_client_safe);
        assert!(r.applied_consent_id.is_none());
        let r = r.with_consent(ConsentId::new("c1"));
        assert_eq!(r.applied_consent_id, Some(ConsentId::new("c1")));
    }
}
