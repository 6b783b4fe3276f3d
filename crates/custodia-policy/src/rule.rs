use custodia_core::{Action, ClientId, TargetType};
use std::collections::HashSet;

use crate::types::{EvaluationContext, PolicyRule, PolicyStatus, SharingPolicy};

/// What the first matching rule of a policy does to the current action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEffect {
    /// The action is denied; evaluation stops here.
    Deny { reason: String },
    /// The action passes this policy, possibly adding enforcement flags.
    Pass {
        enforce_watermark: bool,
        enforce_client_safe: bool,
    },
}

/// A set-valued predicate only filters when it has members.
fn specified<T>(set: &Option<Vec<T>>) -> Option<&[T]> {
    set.as_deref().filter(|s| !s.is_empty())
}

/// Whether every predicate the rule specifies holds for `ctx`.
///
/// The scope predicate compares against the context's enclosing scope, or
/// the target's own scope type when the context names none.
pub fn rule_matches(rule: &PolicyRule, ctx: &EvaluationContext) -> bool {
    if let Some(roles) = specified(&rule.match_role) {
        match ctx.subject_role.as_deref() {
            Some(role) if roles.iter().any(|r| r == role) => {}
            _ => return false,
        }
    }

    if let Some(scopes) = specified(&rule.match_scope_type) {
        let scope = ctx.scope_type.unwrap_or_else(|| ctx.target_type.scope_type());
        if !scopes.contains(&scope) {
            return false;
        }
    }

    if let Some(tags) = specified(&rule.match_doc_tags) {
        if !tags.iter().any(|t| ctx.target_tags.contains(t)) {
            return false;
        }
    }

    if let Some(report_types) = specified(&rule.match_report_type) {
        match ctx.target_report_type.as_deref() {
            Some(rt) if report_types.iter().any(|t| t == rt) => {}
            _ => return false,
        }
    }

    true
}

/// First rule in array order whose predicates hold. Later matches are
/// ignored, never unioned.
pub fn find_matching_rule<'a>(
    policy: &'a SharingPolicy,
    ctx: &EvaluationContext,
) -> Option<&'a PolicyRule> {
    policy.rules.iter().find(|rule| rule_matches(rule, ctx))
}

/// Apply a matched rule to `action`: explicit deny first, then the allow
/// list when it is non-empty, otherwise pass with the rule's flags.
pub fn apply_rule(rule: &PolicyRule, policy: &SharingPolicy, action: Action) -> RuleEffect {
    if specified(&rule.deny_actions).map_or(false, |deny| deny.contains(&action)) {
        return RuleEffect::Deny {
            reason: format!("Action \"{}\" denied by policy \"{}\"", action, policy.name),
        };
    }
    if let Some(allow) = specified(&rule.allow_actions) {
        if !allow.contains(&action) {
            return RuleEffect::Deny {
                reason: format!(
                    "Action \"{}\" is not allowed by policy \"{}\"",
                    action, policy.name
                ),
            };
        }
    }
    RuleEffect::Pass {
        enforce_watermark: rule.enforce_watermark,
        enforce_client_safe: rule.enforce_client_safe,
    }
}

/// Active policies of `client_id` that govern `target_type`, ordered by
/// ascending priority. Ties keep input order (stable sort, no secondary key).
pub fn applicable_policies<'a>(
    policies: &'a [SharingPolicy],
    client_id: &ClientId,
    target_type: TargetType,
) -> Vec<&'a SharingPolicy> {
    let mut selected: Vec<&SharingPolicy> = policies
        .iter()
        .filter(|p| p.status == PolicyStatus::Active)
        .filter(|p| &p.client_id == client_id)
        .filter(|p| p.applies_to.covers(target_type))
        .collect();
    selected.sort_by_key(|p| p.priority);
    selected
}

/// Validate one policy. Returns every problem found, not just the first.
pub fn validate_policy(policy: &SharingPolicy) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if policy.id.as_str().is_empty() {
        errors.push("policy id must not be empty".to_string());
    }
    if policy.name.trim().is_empty() {
        errors.push(format!("policy '{}': name must not be empty", policy.id));
    }

    for (idx, rule) in policy.rules.iter().enumerate() {
        let allow = specified(&rule.allow_actions).unwrap_or(&[]);
        let deny = specified(&rule.deny_actions).unwrap_or(&[]);
        for action in deny {
            if allow.contains(action) {
                errors.push(format!(
                    "policy '{}' rule {}: action '{}' is both allowed and denied",
                    policy.id, idx, action
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a policy set: each policy, plus id uniqueness across the set.
pub fn validate_policies(policies: &[SharingPolicy]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for policy in policies {
        if let Err(mut policy_errors) = validate_policy(policy) {
            errors.append(&mut policy_errors);
        }
        if !policy.id.as_str().is_empty() && !seen.insert(policy.id.as_str()) {
            errors.push(format!("duplicate policy id '{}'", policy.id));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
