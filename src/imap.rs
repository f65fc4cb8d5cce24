//! IMAP fallback backend: transport, XOAUTH2 auth, and session state machine
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. All
//! connections use TLS with webpki roots, and per-command timeouts are
//! derived from gateway config.
//!
//! The session lifecycle (connect → authenticate → select → search → flag →
//! expunge → close) is modeled as consuming-`self` types so step ordering is
//! enforced by the type system: [`ImapConnection`] can only authenticate,
//! [`MailboxSession`] can only open a folder, and search/delete live on
//! [`FolderSession`].

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Authenticator, Client, Session};
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult};
use crate::models::BatchStats;
use crate::oauth;

/// Junk folder names tried in order for the clear-junk operation
///
/// Outlook localizes and renames this folder across account vintages; the
/// first candidate that selects wins.
pub const JUNK_FOLDER_CANDIDATES: &[&str] = &["Junk Email", "Junk", "Spam"];

/// Authenticated IMAP session over TLS
type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// XOAUTH2 SASL authenticator
///
/// `async-imap` base64-encodes the response; we supply the raw
/// bearer-wrapped string.
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        oauth::xoauth2_response(&self.user, &self.access_token)
    }
}

/// Per-command socket timeout from gateway config
fn socket_timeout(config: &GatewayConfig) -> Duration {
    Duration::from_millis(config.socket_timeout_ms)
}

/// Connected but unauthenticated IMAP client
///
/// Produced by [`connect`]; the only legal next step is
/// [`authenticate`](Self::authenticate).
pub struct ImapConnection {
    client: Client<tokio_rustls::client::TlsStream<TcpStream>>,
    config: Arc<GatewayConfig>,
}

/// Connect to the configured IMAP server
///
/// Performs the connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates
/// 3. Read IMAP greeting
///
/// # Errors
///
/// - `Timeout` if any connection phase times out
/// - `Upstream` for TCP, TLS, or greeting failures
/// - `InvalidInput` if the hostname is invalid for TLS SNI
pub async fn connect(config: Arc<GatewayConfig>) -> AppResult<ImapConnection> {
    let connect_duration = Duration::from_millis(config.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(config.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((config.imap_host.as_str(), config.imap_port)),
    )
    .await
    .map_err(|_| AppError::Timeout("IMAP tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Upstream(format!("IMAP tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(config.imap_host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Upstream(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Upstream(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Upstream(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    Ok(ImapConnection { client, config })
}

impl ImapConnection {
    /// Authenticate with `AUTHENTICATE XOAUTH2` using a bearer token
    ///
    /// # Errors
    ///
    /// - `AuthFailed` if the server rejects the credential
    /// - `Timeout` if authentication exceeds the greeting timeout
    pub async fn authenticate(
        self,
        email: &str,
        access_token: &str,
    ) -> AppResult<MailboxSession> {
        let greeting_duration = Duration::from_millis(self.config.greeting_timeout_ms);
        let authenticator = XOAuth2 {
            user: email.to_owned(),
            access_token: access_token.to_owned(),
        };

        let session = timeout(
            greeting_duration,
            self.client.authenticate("XOAUTH2", authenticator),
        )
        .await
        .map_err(|_| AppError::Timeout("XOAUTH2 authentication timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| AppError::AuthFailed(format!("XOAUTH2 authentication failed: {e}")))
        })?;

        Ok(MailboxSession {
            session,
            config: self.config,
        })
    }
}

/// Authenticated session without a selected folder
pub struct MailboxSession {
    session: ImapSession,
    config: Arc<GatewayConfig>,
}

impl MailboxSession {
    /// Open a named folder in read-write mode
    ///
    /// # Errors
    ///
    /// `NotFound` if the folder cannot be selected.
    pub async fn open(mut self, folder: &str) -> AppResult<FolderSession> {
        let mailbox = timeout(socket_timeout(&self.config), self.session.select(folder))
            .await
            .map_err(|_| AppError::Timeout(format!("SELECT timed out for folder '{folder}'")))
            .and_then(|r| {
                r.map_err(|e| AppError::NotFound(format!("cannot select folder '{folder}': {e}")))
            })?;

        tracing::debug!(folder, exists = mailbox.exists, "folder opened");
        Ok(FolderSession {
            session: self.session,
            config: self.config,
            folder: folder.to_owned(),
        })
    }

    /// Open the first folder from an ordered candidate list
    ///
    /// Used for clear-junk where the folder name varies by account.
    ///
    /// # Errors
    ///
    /// `NotFound` if none of the candidates can be selected.
    pub async fn open_any(mut self, candidates: &[&str]) -> AppResult<FolderSession> {
        for candidate in candidates {
            match timeout(socket_timeout(&self.config), self.session.select(candidate)).await {
                Ok(Ok(mailbox)) => {
                    tracing::debug!(folder = candidate, exists = mailbox.exists, "folder opened");
                    return Ok(FolderSession {
                        session: self.session,
                        config: self.config,
                        folder: (*candidate).to_owned(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::debug!(folder = candidate, error = %e, "folder not selectable, trying next");
                }
                Err(_) => {
                    return Err(AppError::Timeout(format!(
                        "SELECT timed out for folder '{candidate}'"
                    )));
                }
            }
        }
        Err(AppError::NotFound("No junk email folder found".to_owned()))
    }
}

/// Session with an open folder; search and delete operations live here
pub struct FolderSession {
    session: ImapSession,
    config: Arc<GatewayConfig>,
    folder: String,
}

impl FolderSession {
    /// Name of the folder this session has open
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Match all messages in the folder
    ///
    /// Returns sequence numbers in ascending order. An empty result is not
    /// an error; bulk clear reports it as zero-processed.
    pub async fn search_all(&mut self) -> AppResult<Vec<u32>> {
        self.search("ALL").await
    }

    /// Match messages whose Message-ID header equals `message_id`
    ///
    /// An empty result is a not-found condition for single delete; the
    /// caller decides.
    pub async fn search_message_id(&mut self, message_id: &str) -> AppResult<Vec<u32>> {
        let query = format!("HEADER Message-ID \"{}\"", escape_imap_quoted(message_id)?);
        self.search(&query).await
    }

    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        let set = timeout(socket_timeout(&self.config), self.session.search(query))
            .await
            .map_err(|_| AppError::Timeout("SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Upstream(format!("SEARCH failed: {e}"))))?;
        let mut seqs: Vec<u32> = set.into_iter().collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Mark the given sequence numbers deleted and expunge
    ///
    /// A failure at either step aborts the remaining messages without
    /// retry; the caller reports them as failed.
    pub async fn delete(&mut self, seqs: &[u32]) -> AppResult<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let seq_set = format_seq_set(seqs);

        let stream = timeout(
            socket_timeout(&self.config),
            self.session.store(&seq_set, "+FLAGS.SILENT (\\Deleted)"),
        )
        .await
        .map_err(|_| AppError::Timeout("STORE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Upstream(format!("STORE failed: {e}"))))?;
        let _: Vec<Fetch> = timeout(socket_timeout(&self.config), stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("STORE stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Upstream(format!("STORE stream failed: {e}"))))?;

        let stream = timeout(socket_timeout(&self.config), self.session.expunge())
            .await
            .map_err(|_| AppError::Timeout("EXPUNGE timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Upstream(format!("EXPUNGE failed: {e}"))))?;
        let _: Vec<u32> = timeout(socket_timeout(&self.config), stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("EXPUNGE stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Upstream(format!("EXPUNGE stream failed: {e}")))
            })?;
        Ok(())
    }

    /// Close the session politely; always attempted, outcome ignored
    pub async fn close(mut self) {
        let _ = timeout(socket_timeout(&self.config), self.session.logout()).await;
    }
}

/// Clear every message in the first selectable folder from `candidates`
///
/// Drives the full session lifecycle. The connection is single-use: opened,
/// driven, closed. Mid-sequence failures drop the connection, which closes
/// it forcibly.
pub async fn clear_folder(
    config: Arc<GatewayConfig>,
    email: String,
    access_token: String,
    candidates: Vec<String>,
) -> AppResult<(String, BatchStats)> {
    let connection = connect(Arc::clone(&config)).await?;
    let session = connection.authenticate(&email, &access_token).await?;
    let candidate_refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
    let mut folder = session.open_any(&candidate_refs).await?;

    let outcome = clear_open_folder(&mut folder).await;
    let folder_name = folder.folder().to_owned();
    folder.close().await;

    let stats = outcome?;
    tracing::info!(
        folder = %folder_name,
        total = stats.total,
        deleted = stats.deleted,
        failed = stats.failed,
        "IMAP folder cleared"
    );
    Ok((folder_name, stats))
}

async fn clear_open_folder(folder: &mut FolderSession) -> AppResult<BatchStats> {
    let seqs = folder.search_all().await?;
    if seqs.is_empty() {
        return Ok(BatchStats::empty());
    }
    let total = seqs.len();
    folder.delete(&seqs).await.map_err(|e| {
        AppError::Upstream(format!("IMAP batch delete failed for {total} message(s): {e}"))
    })?;
    Ok(BatchStats {
        total,
        deleted: total,
        failed: 0,
    })
}

/// Delete a single message by Message-ID header from a named folder
///
/// # Errors
///
/// `NotFound` when no message in the folder carries the Message-ID.
pub async fn delete_by_message_id(
    config: Arc<GatewayConfig>,
    email: String,
    access_token: String,
    folder_name: String,
    message_id: String,
) -> AppResult<()> {
    let connection = connect(Arc::clone(&config)).await?;
    let session = connection.authenticate(&email, &access_token).await?;
    let mut folder = session.open(&folder_name).await?;

    let outcome = async {
        let seqs = folder.search_message_id(&message_id).await?;
        if seqs.is_empty() {
            return Err(AppError::NotFound(format!(
                "no message with Message-ID {message_id} in '{folder_name}'"
            )));
        }
        folder.delete(&seqs).await
    }
    .await;

    folder.close().await;
    outcome
}

/// Format sequence numbers as an IMAP sequence set (e.g., `1,4,9`)
fn format_seq_set(seqs: &[u32]) -> String {
    seqs.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape backslashes and quotes for IMAP quoted strings
///
/// Rejects control characters outright; a Message-ID containing CR/LF is an
/// injection attempt, not a valid header value.
fn escape_imap_quoted(input: &str) -> AppResult<String> {
    if input.is_empty() || input.len() > 998 {
        return Err(AppError::InvalidInput(
            "message_id must be 1..998 characters".to_owned(),
        ));
    }
    if input.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(
            "message_id must not contain control characters".to_owned(),
        ));
    }
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::{JUNK_FOLDER_CANDIDATES, escape_imap_quoted, format_seq_set};

    #[test]
    fn seq_set_joins_with_commas() {
        assert_eq!(format_seq_set(&[1, 4, 9]), "1,4,9");
        assert_eq!(format_seq_set(&[7]), "7");
    }

    #[test]
    fn junk_candidates_start_with_outlook_default() {
        assert_eq!(JUNK_FOLDER_CANDIDATES[0], "Junk Email");
        assert_eq!(JUNK_FOLDER_CANDIDATES.len(), 3);
    }

    #[test]
    fn escape_quotes_message_id_safely() {
        let escaped = escape_imap_quoted(r#"<abc"def@domain>"#).expect("must pass");
        assert_eq!(escaped, r#"<abc\"def@domain>"#);
    }

    #[test]
    fn escape_rejects_crlf_injection() {
        let err = escape_imap_quoted("<abc@domain>\r\nA1 EXPUNGE").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn escape_rejects_empty_message_id() {
        escape_imap_quoted("").expect_err("must fail");
    }
}
