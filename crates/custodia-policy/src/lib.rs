//! Custodia access evaluation
//!
//! Decides whether a subject may act on a document or report. A decision
//! needs an active consent covering the target that grants the action, and
//! must survive every applicable sharing policy in priority order. Policies
//! may also add watermark and client-safe enforcement to an allowed
//! decision.

pub mod engine;
pub mod error;
pub mod rule;
pub mod types;

pub use engine::{
    evaluate_access, find_applicable_consent, load_policies, preview_policy_evaluation,
    AccessEvaluator, DecisionAuditSink, InMemoryDecisionSink, NO_CONSENT_REASON,
};
pub use error::{PolicyError, PolicyResult};
pub use rule::{
    applicable_policies, apply_rule, find_matching_rule, rule_matches, validate_policies,
    validate_policy, RuleEffect,
};
pub use types::{
    DecisionRecord, EvaluationContext, EvaluationResult, EvaluationSnapshot, PolicyAppliesTo,
    PolicyPreview, PolicyRule, PolicyStatus, SharingPolicy,
};
