//! Trigger model: identity, lifecycle status, and the per-type source config.
//!
//! [`TriggerConfig`] is a sum type in memory. On the wire (and in the JSONB
//! `config` column) it uses the record layout
//! `{database: {...}|null, email: {...}|null, webhook: {...}|null, cron: {...}|null}`
//! where exactly one member is non-null.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SluiceError;

// ── Type & status ───────────────────────────────────────────────────

/// Source kind a trigger watches. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Database,
    Email,
    Webhook,
    Cron,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "cron" => Ok(Self::Cron),
            other => Err(SluiceError::Unknown {
                kind: "trigger type",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle state of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Initial state after creation, and after a user pause.
    Paused,
    /// Selected by the dispatcher on every tick.
    Active,
    /// Last cycle failed; excluded from dispatch until re-activated.
    Error,
    /// Terminal administrative state.
    Disabled,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Active => "active",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paused" => Ok(Self::Paused),
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "disabled" => Ok(Self::Disabled),
            other => Err(SluiceError::Unknown {
                kind: "trigger status",
                value: other.to_string(),
            }),
        }
    }
}

// ── Trigger ─────────────────────────────────────────────────────────

/// A watched source plus the metadata the dispatcher needs to poll it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Creator of the trigger.
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub status: TriggerStatus,
    /// Seconds between polls. Must be > 0.
    pub polling_interval: u32,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub config: TriggerConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Build a new, paused trigger. The type is derived from the config.
    pub fn new(name: impl Into<String>, polling_interval: u32, config: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            owner_id: None,
            trigger_type: config.trigger_type(),
            status: TriggerStatus::Paused,
            polling_interval,
            last_polled_at: None,
            last_error: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Interval between polls, accounting for interval-mode cron triggers.
    pub fn effective_interval(&self) -> Duration {
        match &self.config {
            TriggerConfig::Cron(CronTriggerConfig::Interval { value, unit }) => {
                Duration::from_secs(u64::from(*value) * unit.seconds())
            }
            _ => Duration::from_secs(u64::from(self.polling_interval)),
        }
    }

    /// Current progress marker, if the source type has one.
    pub fn progress(&self) -> Option<Progress> {
        match &self.config {
            TriggerConfig::Database(db) => db.last_watermark.clone().map(Progress::Watermark),
            TriggerConfig::Email(email) => email.last_uid.map(Progress::EmailUid),
            _ => None,
        }
    }
}

// ── Config (sum type) ───────────────────────────────────────────────

/// Source-specific configuration; the variant always matches the trigger type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TriggerConfigRecord", into = "TriggerConfigRecord")]
pub enum TriggerConfig {
    Database(DatabaseTriggerConfig),
    Email(EmailTriggerConfig),
    Webhook(WebhookTriggerConfig),
    Cron(CronTriggerConfig),
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Database(_) => TriggerType::Database,
            Self::Email(_) => TriggerType::Email,
            Self::Webhook(_) => TriggerType::Webhook,
            Self::Cron(_) => TriggerType::Cron,
        }
    }

    /// Overwrite this config's progress marker with the one in `stored`.
    /// Configs of different types are left alone.
    pub fn keep_progress_from(&mut self, stored: &TriggerConfig) {
        match (self, stored) {
            (Self::Database(new), Self::Database(old)) => {
                new.last_watermark = old.last_watermark.clone();
            }
            (Self::Email(new), Self::Email(old)) => new.last_uid = old.last_uid,
            _ => {}
        }
    }
}

/// Persisted record layout of [`TriggerConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfigRecord {
    #[serde(default)]
    pub database: Option<DatabaseTriggerConfig>,
    #[serde(default)]
    pub email: Option<EmailTriggerConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookTriggerConfig>,
    #[serde(default)]
    pub cron: Option<CronTriggerConfig>,
}

impl TryFrom<TriggerConfigRecord> for TriggerConfig {
    type Error = SluiceError;

    fn try_from(record: TriggerConfigRecord) -> Result<Self, Self::Error> {
        let populated = [
            record.database.is_some(),
            record.email.is_some(),
            record.webhook.is_some(),
            record.cron.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        match (record.database, record.email, record.webhook, record.cron) {
            (Some(db), None, None, None) => Ok(Self::Database(db)),
            (None, Some(email), None, None) => Ok(Self::Email(email)),
            (None, None, Some(webhook), None) => Ok(Self::Webhook(webhook)),
            (None, None, None, Some(cron)) => Ok(Self::Cron(cron)),
            _ => Err(SluiceError::InvalidConfig(format!(
                "exactly one of database/email/webhook/cron must be set, found {populated}"
            ))),
        }
    }
}

impl From<TriggerConfig> for TriggerConfigRecord {
    fn from(config: TriggerConfig) -> Self {
        let mut record = Self::default();
        match config {
            TriggerConfig::Database(db) => record.database = Some(db),
            TriggerConfig::Email(email) => record.email = Some(email),
            TriggerConfig::Webhook(webhook) => record.webhook = Some(webhook),
            TriggerConfig::Cron(cron) => record.cron = Some(cron),
        }
        record
    }
}

// ── Progress markers ────────────────────────────────────────────────

/// Source position reached by a poll, committed only after dispatch succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Progress {
    Watermark(String),
    EmailUid(u32),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watermark(w) => f.write_str(w),
            Self::EmailUid(uid) => write!(f, "{uid}"),
        }
    }
}

// ── Connections ─────────────────────────────────────────────────────

/// Either a reference to a saved connection or an inline descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSource<T> {
    Saved { connection_id: Uuid },
    Inline(T),
}

/// Resolved PostgreSQL connection descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConnection {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl DatabaseConnection {
    pub fn connection_string(&self) -> String {
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

/// Resolved IMAP connection descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImapConnection {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

// ── Database ────────────────────────────────────────────────────────

/// Comparison domain of a watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkType {
    Int,
    Timestamp,
    /// Requires time-ordered UUIDs (v7) for the ordering to be meaningful.
    Uuid,
}

impl WatermarkType {
    /// PostgreSQL type the bound text parameter is cast to.
    pub fn sql_cast(&self) -> &'static str {
        match self {
            Self::Int => "bigint",
            Self::Timestamp => "timestamptz",
            Self::Uuid => "uuid",
        }
    }

    /// Whether `candidate` is strictly beyond `current` in this domain.
    ///
    /// Unparseable candidates never advance; an unparseable current marker is
    /// replaced by any parseable candidate.
    pub fn advances(&self, current: Option<&str>, candidate: &str) -> bool {
        let Some(current) = current else {
            return self.is_valid(candidate);
        };
        match self {
            Self::Int => match (current.trim().parse::<i64>(), candidate.trim().parse::<i64>()) {
                (Ok(cur), Ok(cand)) => cand > cur,
                (Err(_), Ok(_)) => true,
                _ => false,
            },
            Self::Timestamp => match (parse_timestamp(current), parse_timestamp(candidate)) {
                (Some(cur), Some(cand)) => cand > cur,
                (None, Some(_)) => true,
                _ => false,
            },
            Self::Uuid => match (Uuid::parse_str(current), Uuid::parse_str(candidate)) {
                (Ok(cur), Ok(cand)) => cand > cur,
                (Err(_), Ok(_)) => true,
                _ => false,
            },
        }
    }

    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            Self::Int => value.trim().parse::<i64>().is_ok(),
            Self::Timestamp => parse_timestamp(value).is_some(),
            Self::Uuid => Uuid::parse_str(value).is_ok(),
        }
    }
}

/// RFC 3339, PostgreSQL text output (`2026-01-01 10:00:00+00`), or a naive
/// UTC time with either separator (`to_jsonb` renders `timestamp` columns
/// as `2026-01-01T10:00:00`).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|n| n.and_utc())
        })
}

/// Watermark polling of a relational table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTriggerConfig {
    pub connection: ConnectionSource<DatabaseConnection>,
    pub table_name: String,
    pub watermark_column: String,
    pub watermark_type: WatermarkType,
    /// Last committed watermark, string-encoded.
    #[serde(default)]
    pub last_watermark: Option<String>,
    /// Column projection; empty selects every column.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

// ── Email ───────────────────────────────────────────────────────────

/// UID polling of an IMAP folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTriggerConfig {
    pub connection: ConnectionSource<ImapConnection>,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default)]
    pub filters: EmailFilters,
    /// Highest UID already scanned.
    #[serde(default)]
    pub last_uid: Option<u32>,
    #[serde(default)]
    pub mark_as_read: bool,
}

/// Coarse static pre-filter applied before rule evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailFilters {
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_address: Option<String>,
    /// Regular expression matched against the subject.
    #[serde(default)]
    pub subject_pattern: Option<String>,
    #[serde(default)]
    pub has_attachment: Option<bool>,
    /// Address that must appear in the CC list.
    #[serde(default)]
    pub cc_address: Option<String>,
}

impl EmailFilters {
    pub fn is_empty(&self) -> bool {
        self.from_address.is_none()
            && self.to_address.is_none()
            && self.subject_pattern.is_none()
            && self.has_attachment.is_none()
            && self.cc_address.is_none()
    }
}

// ── Webhook ─────────────────────────────────────────────────────────

/// Push-based ingestion settings. Stored only; never polled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookTriggerConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

// ── Cron ────────────────────────────────────────────────────────────

/// Time-based firing, either on a fixed interval or a calendar schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CronTriggerConfig {
    Interval {
        value: u32,
        unit: IntervalUnit,
    },
    Schedule {
        frequency: ScheduleFrequency,
        /// Time of day, `HH:MM` (UTC).
        #[serde(default = "default_time")]
        time: String,
        /// 0 = Sunday .. 6 = Saturday. Used by weekly schedules.
        #[serde(default)]
        day_of_week: Option<u8>,
        /// 1..=31. Used by monthly schedules.
        #[serde(default)]
        day_of_month: Option<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn seconds(&self) -> u64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

// ── Default value functions ─────────────────────────────────────────

fn default_pg_port() -> u16 {
    5432
}

fn default_imap_port() -> u16 {
    993
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_folder() -> String {
    "INBOX".to_string()
}

fn default_batch_size() -> u32 {
    100
}

fn default_time() -> String {
    "00:00".to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db_config() -> DatabaseTriggerConfig {
        DatabaseTriggerConfig {
            connection: ConnectionSource::Saved {
                connection_id: Uuid::nil(),
            },
            table_name: "orders".to_string(),
            watermark_column: "id".to_string(),
            watermark_type: WatermarkType::Int,
            last_watermark: Some("100".to_string()),
            columns: vec![],
            where_clause: None,
            batch_size: 50,
        }
    }

    #[test]
    fn config_serializes_to_record_layout() {
        let config = TriggerConfig::Database(db_config());
        let value = serde_json::to_value(&config).unwrap();

        assert!(value["database"].is_object());
        assert!(value["email"].is_null());
        assert!(value["webhook"].is_null());
        assert!(value["cron"].is_null());
        assert_eq!(value["database"]["last_watermark"], json!("100"));
    }

    #[test]
    fn config_rejects_two_members() {
        let value = json!({
            "database": serde_json::to_value(db_config()).unwrap(),
            "webhook": {},
        });
        let err = serde_json::from_value::<TriggerConfig>(value).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn config_rejects_empty_record() {
        let value = json!({"database": null, "email": null, "webhook": null, "cron": null});
        assert!(serde_json::from_value::<TriggerConfig>(value).is_err());
    }

    #[test]
    fn email_defaults_apply() {
        let value = json!({
            "email": {
                "connection": {"inline": {"host": "imap.example.com", "username": "u", "password": "p"}}
            }
        });
        let config: TriggerConfig = serde_json::from_value(value).unwrap();
        match config {
            TriggerConfig::Email(email) => {
                assert_eq!(email.folder, "INBOX");
                assert!(email.filters.is_empty());
                assert_eq!(email.last_uid, None);
                assert!(!email.mark_as_read);
                match email.connection {
                    ConnectionSource::Inline(conn) => {
                        assert_eq!(conn.port, 993);
                        assert!(conn.use_tls);
                    }
                    other => panic!("expected inline connection, got {other:?}"),
                }
            }
            other => panic!("expected email config, got {other:?}"),
        }
    }

    #[test]
    fn cron_modes_deserialize() {
        let interval: CronTriggerConfig =
            serde_json::from_value(json!({"mode": "interval", "value": 5, "unit": "minutes"}))
                .unwrap();
        assert_eq!(
            interval,
            CronTriggerConfig::Interval {
                value: 5,
                unit: IntervalUnit::Minutes
            }
        );

        let schedule: CronTriggerConfig = serde_json::from_value(
            json!({"mode": "schedule", "frequency": "weekly", "time": "09:30", "day_of_week": 1}),
        )
        .unwrap();
        assert!(matches!(
            schedule,
            CronTriggerConfig::Schedule {
                frequency: ScheduleFrequency::Weekly,
                day_of_week: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn effective_interval_uses_cron_interval() {
        let trigger = Trigger::new(
            "every-2h",
            10,
            TriggerConfig::Cron(CronTriggerConfig::Interval {
                value: 2,
                unit: IntervalUnit::Hours,
            }),
        );
        assert_eq!(trigger.effective_interval(), Duration::from_secs(7_200));

        let db = Trigger::new("db", 45, TriggerConfig::Database(db_config()));
        assert_eq!(db.effective_interval(), Duration::from_secs(45));
    }

    #[test]
    fn new_trigger_is_paused_with_matching_type() {
        let trigger = Trigger::new("db", 30, TriggerConfig::Database(db_config()));
        assert_eq!(trigger.status, TriggerStatus::Paused);
        assert_eq!(trigger.trigger_type, TriggerType::Database);
        assert_eq!(trigger.progress(), Some(Progress::Watermark("100".to_string())));
    }

    #[test]
    fn keep_progress_from_copies_only_matching_markers() {
        let stored = TriggerConfig::Database(db_config());
        let mut edited = TriggerConfig::Database(DatabaseTriggerConfig {
            last_watermark: Some("0".into()),
            batch_size: 10,
            ..db_config()
        });
        edited.keep_progress_from(&stored);
        match edited {
            TriggerConfig::Database(db) => {
                assert_eq!(db.last_watermark.as_deref(), Some("100"));
                assert_eq!(db.batch_size, 10);
            }
            other => panic!("unexpected config {other:?}"),
        }

        let mut hook = TriggerConfig::Webhook(WebhookTriggerConfig::default());
        hook.keep_progress_from(&stored);
        assert_eq!(hook, TriggerConfig::Webhook(WebhookTriggerConfig::default()));
    }

    #[test]
    fn int_watermark_advances_numerically() {
        let t = WatermarkType::Int;
        assert!(t.advances(Some("100"), "130"));
        assert!(!t.advances(Some("130"), "100"));
        assert!(!t.advances(Some("130"), "130"));
        // Lexicographically "99" > "100" but numerically it regresses.
        assert!(!t.advances(Some("100"), "99"));
        assert!(t.advances(None, "1"));
        assert!(!t.advances(Some("1"), "abc"));
    }

    #[test]
    fn timestamp_watermark_advances_chronologically() {
        let t = WatermarkType::Timestamp;
        assert!(t.advances(Some("2026-01-01T00:00:00Z"), "2026-01-01T00:00:01Z"));
        assert!(t.advances(Some("2026-01-01 00:00:00"), "2026-01-02T00:00:00+00:00"));
        assert!(!t.advances(Some("2026-01-02T00:00:00Z"), "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn naive_iso_timestamps_from_jsonb_are_understood() {
        let t = WatermarkType::Timestamp;
        assert!(t.is_valid("2026-01-01T00:00:10"));
        assert!(t.is_valid("2026-01-01T00:00:10.250"));
        assert!(t.advances(Some("2026-01-01T00:00:00"), "2026-01-01T00:00:10"));
        assert!(!t.advances(Some("2026-01-01T00:00:10"), "2026-01-01T00:00:00"));
        assert!(t.advances(Some("2026-01-01 00:00:00"), "2026-01-01T00:00:01"));
    }

    #[test]
    fn uuid_watermark_follows_byte_order() {
        let t = WatermarkType::Uuid;
        let early = "01890a5d-ac96-774b-bcce-b302099a8057";
        let late = "01890a5d-ac97-7000-8000-000000000001";
        assert!(t.advances(Some(early), late));
        assert!(!t.advances(Some(late), early));
        assert!(!t.advances(Some(early), "not-a-uuid"));
    }

    #[test]
    fn status_and_type_parse_round_trip() {
        for s in ["paused", "active", "error", "disabled"] {
            assert_eq!(s.parse::<TriggerStatus>().unwrap().as_str(), s);
        }
        for t in ["database", "email", "webhook", "cron"] {
            assert_eq!(t.parse::<TriggerType>().unwrap().as_str(), t);
        }
        assert!("ftp".parse::<TriggerType>().is_err());
    }
}
