use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sluice_connector::{MailClient, MailMessage};
use sluice_core::{EmailFilters, Progress, SluiceError, Trigger, TriggerConfig};
use sluice_storage::CredentialResolver;
use tracing::debug;

use super::{bounded, config_mismatch, PollContext, PollOutcome, Poller};
use crate::error::Result;

/// Compiled form of [`EmailFilters`].
#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    from: Option<String>,
    to: Option<String>,
    subject: Option<Regex>,
    has_attachment: Option<bool>,
    cc: Option<String>,
}

impl EmailFilter {
    pub fn compile(filters: &EmailFilters) -> Result<Self> {
        let subject = filters
            .subject_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SluiceError::InvalidConfig(format!("subject_pattern '{p}': {e}"))
                })
            })
            .transpose()?;

        let norm = |v: &Option<String>| v.as_ref().map(|a| a.trim().to_ascii_lowercase());

        Ok(Self {
            from: norm(&filters.from_address),
            to: norm(&filters.to_address),
            subject,
            has_attachment: filters.has_attachment,
            cc: norm(&filters.cc_address),
        })
    }

    /// Every configured filter must hold; unset filters pass.
    pub fn matches(&self, msg: &MailMessage) -> bool {
        let from_ok = self
            .from
            .as_ref()
            .map_or(true, |want| msg.from.as_deref() == Some(want.as_str()));
        let to_ok = self
            .to
            .as_ref()
            .map_or(true, |want| msg.to.iter().any(|a| a == want));
        let subject_ok = self.subject.as_ref().map_or(true, |re| {
            msg.subject.as_deref().is_some_and(|s| re.is_match(s))
        });
        let attachment_ok = self
            .has_attachment
            .map_or(true, |want| msg.has_attachment() == want);
        let cc_ok = self
            .cc
            .as_ref()
            .map_or(true, |want| msg.cc.iter().any(|a| a == want));

        from_ok && to_ok && subject_ok && attachment_ok && cc_ok
    }
}

/// UID polling of an IMAP folder.
pub struct MailboxPoller {
    credentials: Arc<dyn CredentialResolver>,
    client: Arc<dyn MailClient>,
}

impl MailboxPoller {
    pub fn new(credentials: Arc<dyn CredentialResolver>, client: Arc<dyn MailClient>) -> Self {
        Self {
            credentials,
            client,
        }
    }
}

#[async_trait]
impl Poller for MailboxPoller {
    async fn poll(&self, trigger: &Trigger, ctx: &PollContext) -> Result<PollOutcome> {
        let TriggerConfig::Email(config) = &trigger.config else {
            return Err(config_mismatch("email", trigger));
        };

        let filter = EmailFilter::compile(&config.filters)?;
        let conn = self.credentials.mailbox(&config.connection).await?;
        let last_uid = config.last_uid.unwrap_or(0);

        let batch = bounded(
            ctx.timeout,
            self.client.fetch_since(&conn, &config.folder, last_uid),
        )
        .await?;
        let messages = batch.messages;

        // Highest UID over everything fetched, so filtered-out and unparsable
        // mail is not rescanned.
        let progress = batch
            .highest_uid
            .into_iter()
            .chain(messages.iter().map(|m| m.uid))
            .max()
            .filter(|uid| *uid > last_uid)
            .map(Progress::EmailUid);

        let passing: Vec<&MailMessage> = messages.iter().filter(|m| filter.matches(m)).collect();

        if config.mark_as_read && !passing.is_empty() {
            let uids: Vec<u32> = passing.iter().map(|m| m.uid).collect();
            bounded(ctx.timeout, self.client.mark_seen(&conn, &config.folder, &uids)).await?;
        }

        debug!(
            trigger_id = %trigger.id,
            folder = %config.folder,
            fetched = messages.len(),
            passed = passing.len(),
            to = ?progress,
            "mailbox poll"
        );

        Ok(PollOutcome {
            events: passing.iter().map(|m| m.to_event()).collect(),
            fetched: messages.len(),
            progress,
        })
    }

    async fn baseline(&self, trigger: &Trigger, timeout: Duration) -> Result<Option<Progress>> {
        let TriggerConfig::Email(config) = &trigger.config else {
            return Err(config_mismatch("email", trigger));
        };

        let conn = self.credentials.mailbox(&config.connection).await?;
        let head = bounded(timeout, self.client.current_max_uid(&conn, &config.folder)).await?;
        Ok(Some(Progress::EmailUid(head)))
    }
}
