//! Trigger state machine and control surface.

mod common;

use std::sync::Arc;

use serde_json::json;
use sluice_core::{
    EmailFilters, EmailTriggerConfig, Operator, RuleCondition, RuleConditions, SluiceError,
    TriggerConfig, TriggerStatus, WebhookTriggerConfig,
};
use sluice_engine::{EngineError, TriggerManifest};
use uuid::Uuid;

use common::*;

fn harness_with_rows(ids: std::ops::RangeInclusive<i64>) -> Harness {
    Harness::standard(
        Arc::new(MockSql::with_ids("app", ids)),
        Arc::new(MockMail::with_messages(vec![
            mail(10, "a@example.com", "one"),
            mail(11, "b@example.com", "two"),
        ])),
        4,
    )
}

#[tokio::test]
async fn created_triggers_start_paused() {
    let h = harness_with_rows(1..=5);
    let created = h.service.create(db_trigger("app", None, 10)).await.unwrap();
    assert_eq!(created.status, TriggerStatus::Paused);
    assert!(h.dispatcher.tick(chrono::Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_config_is_rejected_before_activation() {
    let h = harness_with_rows(1..=5);
    let trigger = email_trigger(
        None,
        EmailFilters {
            subject_pattern: Some("([unclosed".into()),
            ..Default::default()
        },
        false,
    );
    let err = h.service.create(trigger).await.unwrap_err();
    assert!(matches!(err, EngineError::Domain(SluiceError::Validation(_))));

    let mut zero = db_trigger("app", None, 10);
    zero.polling_interval = 0;
    assert!(h.service.create(zero).await.is_err());
}

#[tokio::test]
async fn activation_baselines_to_source_head() {
    let h = harness_with_rows(1..=130);

    let db = h.install(db_trigger("app", None, 50)).await;
    assert_eq!(db.status, TriggerStatus::Active);
    assert_eq!(watermark(&db).as_deref(), Some("130"));

    let inbox = h.install(email_trigger(None, EmailFilters::default(), false)).await;
    assert_eq!(last_uid(&inbox), Some(11));

    // Nothing new since activation.
    h.cycle(db.id).await;
    let runs = h.service.recent_executions(db.id, 5, 0).await.unwrap();
    assert_eq!(runs[0].event_count, 0);
}

#[tokio::test]
async fn reactivation_resumes_from_committed_marker() {
    let sql = Arc::new(MockSql::with_ids("app", 1..=20));
    let h = Harness::standard(sql.clone(), Arc::new(MockMail::default()), 4);
    let trigger = h.install(db_trigger("app", Some("5"), 100)).await;

    sql.break_database("app");
    h.cycle(trigger.id).await;
    assert_eq!(h.reload(trigger.id).await.status, TriggerStatus::Error);

    let reactivated = h.service.activate(trigger.id).await.unwrap();
    assert_eq!(reactivated.status, TriggerStatus::Active);
    assert_eq!(watermark(&reactivated).as_deref(), Some("5"));
    // last_error survives until a cycle succeeds.
    assert!(reactivated.last_error.is_some());
}

#[tokio::test]
async fn disabled_is_terminal() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("0"), 10)).await;

    let disabled = h.service.disable(trigger.id).await.unwrap();
    assert_eq!(disabled.status, TriggerStatus::Disabled);

    assert!(matches!(
        h.service.activate(trigger.id).await,
        Err(EngineError::Domain(SluiceError::InvalidTransition { .. }))
    ));
    assert!(h.service.pause(trigger.id).await.is_err());
    assert!(h.dispatcher.run_now(trigger.id).await.is_err());
}

#[tokio::test]
async fn type_is_immutable_and_marker_survives_update() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("3"), 10)).await;

    let mut retyped = trigger.clone();
    retyped.config = TriggerConfig::Webhook(WebhookTriggerConfig::default());
    assert!(matches!(
        h.service.update(retyped).await,
        Err(EngineError::Domain(SluiceError::TypeChanged { .. }))
    ));

    let mut edited = db_trigger("app", Some("999"), 25);
    edited.id = trigger.id;
    edited.name = "renamed".into();
    let updated = h.service.update(edited).await.unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.status, TriggerStatus::Active);

    let stored = h.reload(trigger.id).await;
    assert_eq!(watermark(&stored).as_deref(), Some("3"));
    match &stored.config {
        TriggerConfig::Database(db) => assert_eq!(db.batch_size, 25),
        other => panic!("unexpected config {other:?}"),
    }
}

#[tokio::test]
async fn stale_edit_does_not_rewind_committed_watermark() {
    let h = harness_with_rows(1..=20);
    let trigger = h.install(db_trigger("app", Some("5"), 100)).await;

    let mut stale = h.service.get(trigger.id).await.unwrap();
    h.cycle(trigger.id).await;
    assert_eq!(watermark(&h.reload(trigger.id).await).as_deref(), Some("20"));

    stale.name = "renamed while polling".into();
    let updated = h.service.update(stale).await.unwrap();
    assert_eq!(updated.name, "renamed while polling");
    assert_eq!(watermark(&updated).as_deref(), Some("20"));
    assert_eq!(watermark(&h.reload(trigger.id).await).as_deref(), Some("20"));
}

#[tokio::test]
async fn rules_can_be_tested_without_polling() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("0"), 10)).await;

    let vacuous = h.service.test_rules(trigger.id, &json!({"amount": 1})).await.unwrap();
    assert!(vacuous.matched);
    assert_eq!(vacuous.rule_count, 0);

    let rule = h
        .service
        .add_rule(
            trigger.id,
            "urgent",
            RuleConditions {
                all: vec![],
                any: vec![
                    RuleCondition::new("amount", Operator::Gt, json!(1000)),
                    RuleCondition::new("priority", Operator::Eq, json!("high")),
                ],
            },
        )
        .await
        .unwrap();

    let hit = h
        .service
        .test_rules(trigger.id, &json!({"amount": 500, "priority": "high"}))
        .await
        .unwrap();
    assert!(hit.matched);
    assert_eq!(hit.matching_rules, vec!["urgent".to_string()]);

    let miss = h
        .service
        .test_rules(trigger.id, &json!({"amount": 500, "priority": "low"}))
        .await
        .unwrap();
    assert!(!miss.matched);

    let bad_regex = RuleConditions {
        all: vec![RuleCondition::new("subject", Operator::Regex, json!("(["))],
        any: vec![],
    };
    assert!(h
        .service
        .update_rule(trigger.id, rule.id, "urgent", bad_regex)
        .await
        .is_err());

    h.service.delete_rule(trigger.id, rule.id).await.unwrap();
    assert!(h.service.list_rules(trigger.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn job_links_are_ordered_and_replaceable() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("0"), 10)).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    h.service.link_job(trigger.id, a, 5, false).await.unwrap();
    h.service.link_job(trigger.id, b, 1, true).await.unwrap();
    h.service.link_job(trigger.id, a, 0, true).await.unwrap();

    let links = h.service.list_jobs(trigger.id).await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].job_id, a);
    assert_eq!(links[1].job_id, b);

    h.service.unlink_job(trigger.id, a).await.unwrap();
    assert_eq!(h.service.list_jobs(trigger.id).await.unwrap().len(), 1);

    assert!(matches!(
        h.service.link_job(Uuid::new_v4(), a, 0, false).await,
        Err(EngineError::TriggerNotFound(_))
    ));
}

#[tokio::test]
async fn execution_history_is_capped() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("0"), 10)).await;
    for _ in 0..3 {
        h.cycle(trigger.id).await;
    }

    let page = h.service.recent_executions(trigger.id, 500, 0).await.unwrap();
    assert_eq!(page.len(), 3);
    assert!(page[0].started_at >= page[1].started_at);
    let tail = h.service.recent_executions(trigger.id, 2, 2).await.unwrap();
    assert_eq!(tail.len(), 1);
}

#[tokio::test]
async fn delete_removes_trigger_and_history() {
    let h = harness_with_rows(1..=5);
    let trigger = h.install(db_trigger("app", Some("0"), 10)).await;
    h.cycle(trigger.id).await;

    h.service.delete(trigger.id).await.unwrap();
    assert!(matches!(
        h.service.get(trigger.id).await,
        Err(EngineError::TriggerNotFound(_))
    ));
    assert!(matches!(
        h.service.delete(trigger.id).await,
        Err(EngineError::TriggerNotFound(_))
    ));
}

#[tokio::test]
async fn manifest_creates_rules_links_and_activates() {
    let h = harness_with_rows(1..=40);
    let manifest = TriggerManifest::from_yaml(
        r#"
triggers:
  - name: new-orders
    polling_interval: 30
    activate: true
    config:
      database:
        connection:
          inline:
            host: localhost
            database: app
            username: app
        table_name: orders
        watermark_column: id
        watermark_type: int
    rules:
      - name: big
        conditions:
          all:
            - { field: amount, operator: gt, value: 100 }
    jobs:
      - job_id: 00000000-0000-0000-0000-0000000000aa
        priority: 1
        pass_event_data: true
  - name: inbox
    polling_interval: 120
    config:
      email:
        connection:
          inline: { host: imap.example.com, username: u, password: p }
"#,
    )
    .unwrap();

    let applied = manifest.apply(&h.service).await.unwrap();
    assert_eq!(applied.len(), 2);

    let orders = &applied[0];
    assert_eq!(orders.status, TriggerStatus::Active);
    assert_eq!(watermark(orders).as_deref(), Some("40"));
    assert_eq!(h.service.list_rules(orders.id).await.unwrap().len(), 1);
    assert!(h.service.list_jobs(orders.id).await.unwrap()[0].pass_event_data);

    let inbox = &applied[1];
    assert_eq!(inbox.status, TriggerStatus::Paused);
    match &inbox.config {
        TriggerConfig::Email(EmailTriggerConfig { folder, .. }) => assert_eq!(folder, "INBOX"),
        other => panic!("unexpected config {other:?}"),
    }
}
