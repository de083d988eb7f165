//! Create/update-time validation of triggers and rules.
//!
//! Anything that would otherwise surface as a permanent runtime failure
//! (malformed regex, missing field, type/config mismatch) is rejected here.
//! Returns a [`ValidationResult`] with errors (block save) and warnings (advisory).

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rule::{Operator, RuleCondition, RuleConditions};
use crate::trigger::{CronTriggerConfig, Trigger, TriggerConfig};

const MAX_BATCH_SIZE: u32 = 10_000;

// ── Result types ────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    /// JSON-path-like location, e.g. `"config.database.batch_size"`.
    pub path: String,
    pub message: String,
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub(crate) fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }

    /// `Ok(self)` when valid, otherwise the result wrapped as an error.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(crate::SluiceError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.path, e.message)?;
        }
        Ok(())
    }
}

// ── Triggers ────────────────────────────────────────────────────────

/// Validate a trigger before it is saved or activated.
pub fn validate_trigger(trigger: &Trigger) -> ValidationResult {
    let mut result = ValidationResult::default();

    if trigger.name.trim().is_empty() {
        result.error("name", "name must not be empty");
    }
    if trigger.polling_interval == 0 {
        result.error("polling_interval", "polling interval must be greater than 0");
    }
    if trigger.config.trigger_type() != trigger.trigger_type {
        result.error(
            "config",
            format!(
                "config holds a {} member but trigger type is {}",
                trigger.config.trigger_type(),
                trigger.trigger_type
            ),
        );
    }

    match &trigger.config {
        TriggerConfig::Database(db) => {
            if db.table_name.trim().is_empty() {
                result.error("config.database.table_name", "table name is required");
            }
            if db.watermark_column.trim().is_empty() {
                result.error("config.database.watermark_column", "watermark column is required");
            }
            if db.batch_size == 0 || db.batch_size > MAX_BATCH_SIZE {
                result.error(
                    "config.database.batch_size",
                    format!("batch size must be between 1 and {MAX_BATCH_SIZE}"),
                );
            }
            if let Some(clause) = &db.where_clause {
                if clause.contains(';') {
                    result.error("config.database.where_clause", "where clause must not contain ';'");
                }
            }
            if let Some(mark) = &db.last_watermark {
                if !db.watermark_type.is_valid(mark) {
                    result.error(
                        "config.database.last_watermark",
                        format!("'{mark}' is not a valid {:?} watermark", db.watermark_type),
                    );
                }
            }
            if db.columns.iter().any(|c| c.trim().is_empty()) {
                result.error("config.database.columns", "column names must not be empty");
            }
            if !db.columns.is_empty() && !db.columns.contains(&db.watermark_column) {
                result.warn(
                    "config.database.columns",
                    "watermark column is not projected; it will be added to the query",
                );
            }
        }
        TriggerConfig::Email(email) => {
            if email.folder.trim().is_empty() {
                result.error("config.email.folder", "folder must not be empty");
            }
            if let Some(pattern) = &email.filters.subject_pattern {
                if let Err(e) = Regex::new(pattern) {
                    result.error("config.email.filters.subject_pattern", format!("invalid regex: {e}"));
                }
            }
        }
        TriggerConfig::Webhook(_) => {
            result.warn("type", "webhook triggers are push-based and never polled");
        }
        TriggerConfig::Cron(cron) => match cron {
            CronTriggerConfig::Interval { value, .. } => {
                if *value == 0 {
                    result.error("config.cron.value", "interval value must be greater than 0");
                }
            }
            CronTriggerConfig::Schedule {
                time,
                day_of_week,
                day_of_month,
                ..
            } => {
                if crate::schedule::parse_time_of_day(time).is_err() {
                    result.error("config.cron.time", "time must be HH:MM (24h)");
                }
                if day_of_week.is_some_and(|d| d > 6) {
                    result.error("config.cron.day_of_week", "day of week must be 0-6 (0 = Sunday)");
                }
                if day_of_month.is_some_and(|d| !(1..=31).contains(&d)) {
                    result.error("config.cron.day_of_month", "day of month must be 1-31");
                }
            }
        },
    }

    result
}

// ── Rules ───────────────────────────────────────────────────────────

/// Validate a rule's name and condition groups.
pub fn validate_rule(name: &str, conditions: &RuleConditions) -> ValidationResult {
    let mut result = ValidationResult::default();

    if name.trim().is_empty() {
        result.error("name", "rule name must not be empty");
    }
    if conditions.all.is_empty() && conditions.any.is_empty() {
        result.warn("conditions", "rule has no conditions and matches every event");
    }

    for (i, cond) in conditions.all.iter().enumerate() {
        validate_condition(&format!("conditions.all[{i}]"), cond, &mut result);
    }
    for (i, cond) in conditions.any.iter().enumerate() {
        validate_condition(&format!("conditions.any[{i}]"), cond, &mut result);
    }

    result
}

fn validate_condition(path: &str, cond: &RuleCondition, result: &mut ValidationResult) {
    if cond.field.trim().is_empty() {
        result.error(format!("{path}.field"), "field must not be empty");
    }
    match cond.operator {
        Operator::Regex => match cond.value.as_str() {
            Some(pattern) => {
                if let Err(e) = Regex::new(pattern) {
                    result.error(format!("{path}.value"), format!("invalid regex: {e}"));
                }
            }
            None => result.error(format!("{path}.value"), "regex value must be a string"),
        },
        Operator::In | Operator::NotIn => {
            if !cond.value.is_array() {
                result.error(format!("{path}.value"), "in/notIn value must be an array");
            }
        }
        Operator::Exists | Operator::NotExists => {}
        _ => {
            if cond.value.is_null() {
                result.warn(format!("{path}.value"), "comparison against null");
            }
        }
    }
}
