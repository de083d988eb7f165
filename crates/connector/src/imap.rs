//! IMAP [`MailClient`] over plain TCP or rustls.
//!
//! Every call opens its own session and logs out afterwards; polling
//! intervals are long enough that connection reuse is not worth the state.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_imap::Session;
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls_pki_types::ServerName;
use sluice_core::ImapConnection;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::{Result, SourceError};
use crate::mail::{parse_message, MailBatch, MailClient, MailMessage};

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug)]
enum MailStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn tls_connector() -> Result<TlsConnector> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SourceError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

// ── Client ──────────────────────────────────────────────────────────

/// Stateless IMAP client; connection details come with every call.
#[derive(Debug, Default, Clone)]
pub struct ImapMailClient;

impl ImapMailClient {
    pub fn new() -> Self {
        Self
    }

    async fn open(&self, conn: &ImapConnection) -> Result<Session<MailStream>> {
        let tcp = TcpStream::connect((conn.host.as_str(), conn.port)).await?;

        let stream = if conn.use_tls {
            let server_name = ServerName::try_from(conn.host.clone())
                .map_err(|e| SourceError::Tls(format!("invalid host {}: {e}", conn.host)))?;
            let tls = tls_connector()?.connect(server_name, tcp).await?;
            MailStream::Tls(Box::new(tls))
        } else {
            MailStream::Plain(tcp)
        };

        let mut client = async_imap::Client::new(stream);
        read_greeting(client.read_response().await.transpose())?;

        let session = client
            .login(&conn.username, &conn.password)
            .await
            .map_err(|(e, _)| e)?;
        debug!(host = %conn.host, user = %conn.username, "imap session opened");
        Ok(session)
    }

    async fn close(mut session: Session<MailStream>) {
        if let Err(e) = session.logout().await {
            warn!(error = %e, "imap logout failed");
        }
    }
}

/// The server greeting must arrive before any command is issued.
fn read_greeting<T>(greeting: Option<io::Result<T>>) -> Result<T> {
    match greeting {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) => Err(SourceError::Io(e)),
        None => Err(SourceError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the server greeting",
        ))),
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

async fn fetch_since(
    session: &mut Session<MailStream>,
    folder: &str,
    last_uid: u32,
) -> Result<MailBatch> {
    session.select(folder).await?;

    let found = session
        .uid_search(format!("UID {}:*", last_uid.saturating_add(1)))
        .await?;
    // `n:*` always matches the highest UID, even when it is below n.
    let mut uids: Vec<u32> = found.into_iter().filter(|uid| *uid > last_uid).collect();
    if uids.is_empty() {
        return Ok(MailBatch::default());
    }
    uids.sort_unstable();

    let fetched: Vec<_> = session
        .uid_fetch(uid_set(&uids), "(UID BODY.PEEK[])")
        .await?
        .try_collect()
        .await?;

    let mut messages: Vec<MailMessage> = fetched
        .iter()
        .filter_map(|fetch| {
            let uid = fetch.uid?;
            match fetch.body().and_then(|raw| parse_message(uid, raw)) {
                Some(msg) => Some(msg),
                None => {
                    warn!(uid, "skipping unparsable message");
                    None
                }
            }
        })
        .filter(|msg| msg.uid > last_uid)
        .collect();
    messages.sort_by_key(|m| m.uid);
    // Progress covers every searched UID, parsed or not.
    Ok(MailBatch {
        messages,
        highest_uid: uids.last().copied(),
    })
}

async fn mark_seen(session: &mut Session<MailStream>, folder: &str, uids: &[u32]) -> Result<()> {
    session.select(folder).await?;
    let _updates: Vec<_> = session
        .uid_store(uid_set(uids), "+FLAGS (\\Seen)")
        .await?
        .try_collect()
        .await?;
    Ok(())
}

async fn current_max_uid(session: &mut Session<MailStream>, folder: &str) -> Result<u32> {
    let mailbox = session.select(folder).await?;
    if let Some(next) = mailbox.uid_next {
        return Ok(next.saturating_sub(1));
    }
    let all = session.uid_search("ALL").await?;
    Ok(all.into_iter().max().unwrap_or(0))
}

#[async_trait]
impl MailClient for ImapMailClient {
    async fn fetch_since(
        &self,
        conn: &ImapConnection,
        folder: &str,
        last_uid: u32,
    ) -> Result<MailBatch> {
        let mut session = self.open(conn).await?;
        let result = fetch_since(&mut session, folder, last_uid).await;
        Self::close(session).await;
        result
    }

    async fn mark_seen(&self, conn: &ImapConnection, folder: &str, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut session = self.open(conn).await?;
        let result = mark_seen(&mut session, folder, uids).await;
        Self::close(session).await;
        result
    }

    async fn current_max_uid(&self, conn: &ImapConnection, folder: &str) -> Result<u32> {
        let mut session = self.open(conn).await?;
        let result = current_max_uid(&mut session, folder).await;
        Self::close(session).await;
        result
    }
}
