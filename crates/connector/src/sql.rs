//! Watermark query construction.
//!
//! Every query projects each row to a single JSONB value (`to_jsonb`), so
//! executors return rows as JSON objects without per-type decoding. The
//! watermark is bound as text and cast to its column domain in SQL.

use async_trait::async_trait;
use serde_json::Value;
use sluice_core::{DatabaseConnection, DatabaseTriggerConfig};

use crate::error::{Result, SourceError};

/// A parameterized statement. Parameters are bound as text, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<String>,
}

/// Runs watermark queries against a resolved connection.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a query whose single column is a JSON object per row; rows keep
    /// the order the query produced.
    async fn query(&self, conn: &DatabaseConnection, query: &SqlQuery) -> Result<Vec<Value>>;

    /// Largest watermark currently in the table, string-encoded.
    async fn max_watermark(
        &self,
        conn: &DatabaseConnection,
        config: &DatabaseTriggerConfig,
    ) -> Result<Option<String>>;
}

/// Double-quote an identifier; `schema.table` is quoted per segment.
pub fn quote_ident(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SourceError::InvalidQuery("empty identifier".into()));
    }
    let quoted: Vec<String> = trimmed
        .split('.')
        .map(|seg| format!("\"{}\"", seg.replace('"', "\"\"")))
        .collect();
    Ok(quoted.join("."))
}

fn where_suffix(config: &DatabaseTriggerConfig) -> Result<String> {
    match config.where_clause.as_deref().map(str::trim) {
        Some(clause) if clause.contains(';') => Err(SourceError::InvalidQuery(
            "where clause must not contain ';'".into(),
        )),
        Some(clause) if !clause.is_empty() => Ok(format!(" AND ({clause})")),
        _ => Ok(String::new()),
    }
}

/// `SELECT <columns> FROM <table> WHERE <wm> > $1 [AND (<where>)] ORDER BY <wm> ASC LIMIT <batch>`,
/// each row wrapped as JSONB. Without a watermark every row qualifies.
pub fn build_poll_query(config: &DatabaseTriggerConfig) -> Result<SqlQuery> {
    let table = quote_ident(&config.table_name)?;
    let wm = quote_ident(&config.watermark_column)?;

    let projection = if config.columns.is_empty() {
        "*".to_string()
    } else {
        let mut cols = config
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        if !config.columns.iter().any(|c| c.trim() == config.watermark_column.trim()) {
            cols.push(wm.clone());
        }
        cols.join(", ")
    };

    let (predicate, params) = match &config.last_watermark {
        Some(mark) => (
            format!("{wm} > $1::{}", config.watermark_type.sql_cast()),
            vec![mark.clone()],
        ),
        None => ("TRUE".to_string(), Vec::new()),
    };

    let sql = format!(
        "SELECT to_jsonb(t) AS payload FROM (\
         SELECT {projection} FROM {table} WHERE {predicate}{extra} \
         ORDER BY {wm} ASC LIMIT {limit}\
         ) t ORDER BY t.{wm} ASC",
        extra = where_suffix(config)?,
        limit = config.batch_size.max(1),
    );

    Ok(SqlQuery { sql, params })
}

/// Current maximum watermark, used to baseline a trigger on activation.
pub fn build_max_query(config: &DatabaseTriggerConfig) -> Result<SqlQuery> {
    let table = quote_ident(&config.table_name)?;
    let wm = quote_ident(&config.watermark_column)?;
    let sql = format!(
        "SELECT to_jsonb({wm}) #>> '{{}}' AS mark FROM {table} \
         WHERE {wm} IS NOT NULL{extra} ORDER BY {wm} DESC LIMIT 1",
        extra = where_suffix(config)?,
    );
    Ok(SqlQuery {
        sql,
        params: Vec::new(),
    })
}

/// String form of a watermark cell taken from a JSON row.
pub fn watermark_of(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
