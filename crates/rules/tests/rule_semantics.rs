//! Rule documents as they arrive over the wire, evaluated end to end.

use serde_json::json;
use sluice_core::{Operator, RuleConditions, TriggerRule};
use sluice_rules::RuleEvaluator;
use uuid::Uuid;

fn parse(wire: serde_json::Value) -> RuleConditions {
    serde_json::from_value(wire).expect("valid rule conditions")
}

#[test]
fn wire_round_trip_keeps_groups_and_values() {
    let wire = json!({
        "all": [
            {"field": "amount", "operator": "gt", "value": 1000},
            {"field": "meta.flags", "operator": "contains", "value": true},
        ],
        "any": [
            {"field": "priority", "operator": "in", "value": ["high", "urgent"]},
            {"field": "customer.id", "operator": "notExists"},
        ],
    });

    let conditions = parse(wire);
    assert_eq!(conditions.all.len(), 2);
    assert_eq!(conditions.any.len(), 2);
    assert_eq!(conditions.all[0].operator, Operator::Gt);
    assert_eq!(conditions.all[0].value, json!(1000));
    assert_eq!(conditions.all[1].value, json!(true));
    assert_eq!(conditions.any[0].value, json!(["high", "urgent"]));

    let back: RuleConditions =
        serde_json::from_str(&serde_json::to_string(&conditions).unwrap()).unwrap();
    assert_eq!(back, conditions);
}

#[test]
fn amount_or_priority_scenario() {
    let conditions = parse(json!({
        "all": [],
        "any": [
            {"field": "amount", "operator": "gt", "value": 1000},
            {"field": "priority", "operator": "eq", "value": "high"},
        ],
    }));
    let rules = vec![TriggerRule::new(Uuid::new_v4(), "escalate", conditions)];

    let events = vec![
        json!({"amount": 500, "priority": "high"}),
        json!({"amount": 500, "priority": "low"}),
    ];
    let kept = RuleEvaluator::filter_events(&rules, events);
    assert_eq!(kept, vec![json!({"amount": 500, "priority": "high"})]);
}

#[test]
fn nested_mail_event_rules() {
    let conditions = parse(json!({
        "all": [
            {"field": "from", "operator": "endsWith", "value": "@example.com"},
            {"field": "hasAttachment", "operator": "eq", "value": true},
        ],
        "any": [
            {"field": "subject", "operator": "regex", "value": "(?i)invoice"},
            {"field": "attachments.0.filename", "operator": "endsWith", "value": ".pdf"},
        ],
    }));

    let invoice = json!({
        "from": "billing@example.com",
        "subject": "Your INVOICE for March",
        "hasAttachment": true,
        "attachments": [{"filename": "march.xlsx"}],
    });
    let receipt = json!({
        "from": "billing@example.com",
        "subject": "Receipt",
        "hasAttachment": true,
        "attachments": [{"filename": "receipt.pdf"}],
    });
    let outsider = json!({
        "from": "someone@elsewhere.org",
        "subject": "invoice",
        "hasAttachment": true,
        "attachments": [],
    });

    assert!(RuleEvaluator::match_rule(&conditions, &invoice));
    assert!(RuleEvaluator::match_rule(&conditions, &receipt));
    assert!(!RuleEvaluator::match_rule(&conditions, &outsider));
}
