//! Rule evaluator for nested event records.
//!
//! A rule holds two condition groups: `all` (AND) and `any` (OR). A rule
//! matches when every `all` condition holds and at least one `any` condition
//! holds; an empty group is vacuously true. Rules attached to the same
//! trigger are OR'd against each other.

mod fields;
mod operators;

use serde_json::Value;
use sluice_core::{RuleCondition, RuleConditions, TriggerRule};

pub use fields::get_field_value;
pub use operators::check_condition;

// ── Rule evaluator ──────────────────────────────────────────────────

/// Stateless matcher over [`RuleConditions`].
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Evaluate one condition against a record.
    pub fn condition_holds(condition: &RuleCondition, record: &Value) -> bool {
        let field = get_field_value(&condition.field, record);
        check_condition(condition.operator, field, &condition.value)
    }

    /// `(all empty OR every all-condition) AND (any empty OR some any-condition)`.
    pub fn match_rule(conditions: &RuleConditions, record: &Value) -> bool {
        let all_ok = conditions
            .all
            .iter()
            .all(|c| Self::condition_holds(c, record));
        if !all_ok {
            return false;
        }
        conditions.any.is_empty()
            || conditions
                .any
                .iter()
                .any(|c| Self::condition_holds(c, record))
    }

    /// Keep the record if no rules exist, or if at least one rule matches.
    pub fn match_any_rule(rules: &[TriggerRule], record: &Value) -> bool {
        rules.is_empty() || rules.iter().any(|r| Self::match_rule(&r.conditions, record))
    }

    /// Filter a batch of events, preserving order.
    pub fn filter_events(rules: &[TriggerRule], events: Vec<Value>) -> Vec<Value> {
        if rules.is_empty() {
            return events;
        }
        let before = events.len();
        let kept: Vec<Value> = events
            .into_iter()
            .filter(|e| Self::match_any_rule(rules, e))
            .collect();
        tracing::trace!(before, after = kept.len(), rules = rules.len(), "rule filter applied");
        kept
    }

    /// Names of the rules a record matches. Used for dry-run diagnostics.
    pub fn matching_rules<'a>(rules: &'a [TriggerRule], record: &Value) -> Vec<&'a str> {
        rules
            .iter()
            .filter(|r| Self::match_rule(&r.conditions, record))
            .map(|r| r.name.as_str())
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
