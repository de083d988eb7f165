//! Shared in-memory collaborators for the engine integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sluice_connector::{
    MailBatch, MailClient, MailMessage, SourceError, SqlExecutor, SqlQuery,
};
use sluice_core::{
    ConnectionSource, DatabaseConnection, DatabaseTriggerConfig, EmailFilters, EmailTriggerConfig,
    ImapConnection, Trigger, TriggerConfig, WatermarkType,
};
use sluice_engine::{
    Dispatcher, DispatcherConfig, JobDispatcher, JobError, JobExecutor, PollerRegistry,
    TriggerService,
};
use sluice_storage::{MemoryCredentials, MemoryStore, TriggerStore};
use uuid::Uuid;

// ── SQL source ──────────────────────────────────────────────────────

/// Tables keyed by connection database name; rows carry an integer `id`.
#[derive(Default)]
pub struct MockSql {
    rows: Mutex<HashMap<String, Vec<Value>>>,
    broken: Mutex<HashSet<String>>,
}

impl MockSql {
    pub fn with_ids(database: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        let mock = Self::default();
        mock.insert_ids(database, ids);
        mock
    }

    pub fn insert_ids(&self, database: &str, ids: impl IntoIterator<Item = i64>) {
        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(database.to_string()).or_default();
        for id in ids {
            table.push(json!({ "id": id, "amount": id * 10, "status": "paid" }));
        }
    }

    pub fn break_database(&self, database: &str) {
        self.broken.lock().unwrap().insert(database.to_string());
    }

    fn check(&self, conn: &DatabaseConnection) -> Result<(), SourceError> {
        if self.broken.lock().unwrap().contains(&conn.database) {
            return Err(SourceError::InvalidQuery(format!(
                "connection to {} refused",
                conn.database
            )));
        }
        Ok(())
    }
}

fn limit_of(sql: &str) -> usize {
    sql.split("LIMIT ")
        .nth(1)
        .and_then(|rest| rest.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

#[async_trait]
impl SqlExecutor for MockSql {
    async fn query(
        &self,
        conn: &DatabaseConnection,
        query: &SqlQuery,
    ) -> Result<Vec<Value>, SourceError> {
        self.check(conn)?;
        let after: i64 = query
            .params
            .first()
            .map(|p| p.parse().unwrap())
            .unwrap_or(i64::MIN);

        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<Value> = rows
            .get(&conn.database)
            .map(|t| {
                t.iter()
                    .filter(|r| r["id"].as_i64().unwrap() > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|r| r["id"].as_i64().unwrap());
        matching.truncate(limit_of(&query.sql));
        Ok(matching)
    }

    async fn max_watermark(
        &self,
        conn: &DatabaseConnection,
        _config: &DatabaseTriggerConfig,
    ) -> Result<Option<String>, SourceError> {
        self.check(conn)?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&conn.database)
            .and_then(|t| t.iter().filter_map(|r| r["id"].as_i64()).max())
            .map(|id| id.to_string()))
    }
}

/// Single table whose rows are ordered by a text `key` column; stands in
/// for timestamp and uuid watermarks whose text form sorts like the value.
#[derive(Default)]
pub struct KeyedSql {
    keys: Mutex<Vec<String>>,
}

impl KeyedSql {
    pub fn with_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        Self {
            keys: Mutex::new(keys),
        }
    }
}

#[async_trait]
impl SqlExecutor for KeyedSql {
    async fn query(
        &self,
        _conn: &DatabaseConnection,
        query: &SqlQuery,
    ) -> Result<Vec<Value>, SourceError> {
        let after = query.params.first().cloned();
        let keys = self.keys.lock().unwrap();
        let mut rows: Vec<Value> = keys
            .iter()
            .filter(|k| after.as_ref().map_or(true, |a| k.as_str() > a.as_str()))
            .enumerate()
            .map(|(n, k)| json!({ "key": k, "n": n }))
            .collect();
        rows.truncate(limit_of(&query.sql));
        Ok(rows)
    }

    async fn max_watermark(
        &self,
        _conn: &DatabaseConnection,
        _config: &DatabaseTriggerConfig,
    ) -> Result<Option<String>, SourceError> {
        Ok(self.keys.lock().unwrap().last().cloned())
    }
}

// ── Mail source ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockMail {
    messages: Mutex<Vec<MailMessage>>,
    /// UIDs the server returns but that fail to parse.
    unparsable: Mutex<Vec<u32>>,
    seen: Mutex<Vec<u32>>,
}

impl MockMail {
    pub fn with_messages(messages: Vec<MailMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ..Self::default()
        }
    }

    pub fn add_unparsable(&self, uid: u32) {
        self.unparsable.lock().unwrap().push(uid);
    }

    pub fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn mail(uid: u32, from: &str, subject: &str) -> MailMessage {
    MailMessage {
        uid,
        subject: Some(subject.into()),
        from: Some(from.into()),
        to: vec!["ops@example.com".into()],
        cc: vec![],
        date: None,
        body: Some("body".into()),
        attachments: vec![],
    }
}

#[async_trait]
impl MailClient for MockMail {
    async fn fetch_since(
        &self,
        _conn: &ImapConnection,
        _folder: &str,
        last_uid: u32,
    ) -> Result<MailBatch, SourceError> {
        let mut found: Vec<MailMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.uid > last_uid)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.uid);

        let mut batch = MailBatch::from_messages(found);
        let broken = self
            .unparsable
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|uid| *uid > last_uid)
            .max();
        batch.highest_uid = batch.highest_uid.max(broken);
        Ok(batch)
    }

    async fn mark_seen(
        &self,
        _conn: &ImapConnection,
        _folder: &str,
        uids: &[u32],
    ) -> Result<(), SourceError> {
        self.seen.lock().unwrap().extend_from_slice(uids);
        Ok(())
    }

    async fn current_max_uid(
        &self,
        _conn: &ImapConnection,
        _folder: &str,
    ) -> Result<u32, SourceError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.uid)
            .chain(self.unparsable.lock().unwrap().iter().copied())
            .max()
            .unwrap_or(0))
    }
}

// ── Job service ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingJobs {
    calls: Mutex<Vec<(Uuid, Option<Value>)>>,
}

impl RecordingJobs {
    pub fn calls(&self) -> Vec<(Uuid, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobExecutor for RecordingJobs {
    async fn execute(&self, job_id: Uuid, payload: Option<Value>) -> Result<(), JobError> {
        self.calls.lock().unwrap().push((job_id, payload));
        Ok(())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn db_trigger(database: &str, last_watermark: Option<&str>, batch_size: u32) -> Trigger {
    Trigger::new(
        format!("{database}-orders"),
        60,
        TriggerConfig::Database(DatabaseTriggerConfig {
            connection: ConnectionSource::Inline(DatabaseConnection {
                host: "localhost".into(),
                port: 5432,
                database: database.into(),
                username: "app".into(),
                password: None,
                ssl_mode: "disable".into(),
            }),
            table_name: "orders".into(),
            watermark_column: "id".into(),
            watermark_type: WatermarkType::Int,
            last_watermark: last_watermark.map(str::to_string),
            columns: vec![],
            where_clause: None,
            batch_size,
        }),
    )
}

pub fn keyed_trigger(watermark_type: WatermarkType, last_watermark: Option<String>) -> Trigger {
    let mut trigger = db_trigger("events", None, 10);
    if let TriggerConfig::Database(db) = &mut trigger.config {
        db.watermark_column = "key".into();
        db.watermark_type = watermark_type;
        db.last_watermark = last_watermark;
    }
    trigger
}

pub fn email_trigger(last_uid: Option<u32>, filters: EmailFilters, mark_as_read: bool) -> Trigger {
    Trigger::new(
        "alerts inbox",
        60,
        TriggerConfig::Email(EmailTriggerConfig {
            connection: ConnectionSource::Inline(ImapConnection {
                host: "imap.example.com".into(),
                port: 993,
                username: "alerts".into(),
                password: "secret".into(),
                use_tls: true,
            }),
            folder: "INBOX".into(),
            filters,
            last_uid,
            mark_as_read,
        }),
    )
}

pub fn watermark(trigger: &Trigger) -> Option<String> {
    match &trigger.config {
        TriggerConfig::Database(db) => db.last_watermark.clone(),
        _ => None,
    }
}

pub fn last_uid(trigger: &Trigger) -> Option<u32> {
    match &trigger.config {
        TriggerConfig::Email(email) => email.last_uid,
        _ => None,
    }
}

/// Everything a test needs, wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<RecordingJobs>,
    pub service: TriggerService,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(pollers: PollerRegistry, max_workers: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let jobs = Arc::new(RecordingJobs::default());
        let pollers = Arc::new(pollers);
        let dyn_store: Arc<dyn TriggerStore> = store.clone();

        let config = DispatcherConfig {
            tick: Duration::from_secs(1),
            max_workers,
            source_timeout: Duration::from_secs(5),
            permit_wait_warn: Duration::from_secs(60),
        };

        Self {
            service: TriggerService::new(
                Arc::clone(&dyn_store),
                Arc::clone(&pollers),
                config.source_timeout,
            ),
            dispatcher: Dispatcher::new(
                config,
                dyn_store,
                pollers,
                JobDispatcher::new(jobs.clone()),
            ),
            store,
            jobs,
        }
    }

    /// Standard pollers over the given mock sources.
    pub fn standard(
        sql: Arc<dyn SqlExecutor>,
        mail: Arc<dyn MailClient>,
        max_workers: usize,
    ) -> Self {
        let pollers =
            PollerRegistry::standard(Arc::new(MemoryCredentials::new()), sql, mail);
        Self::new(pollers, max_workers)
    }

    /// Create and activate.
    pub async fn install(&self, trigger: Trigger) -> Trigger {
        let created = self.service.create(trigger).await.unwrap();
        self.service.activate(created.id).await.unwrap()
    }

    pub async fn reload(&self, id: Uuid) -> Trigger {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// One manual cycle, awaited to completion.
    pub async fn cycle(&self, id: Uuid) {
        self.dispatcher.run_now(id).await.unwrap().await.unwrap();
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
