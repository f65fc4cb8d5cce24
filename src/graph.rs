//! Graph REST backend: cursor-paginated listing, delete, and send
//!
//! All calls are bearer-authenticated JSON over HTTPS against the
//! configured Graph base URL. Listing follows `@odata.nextLink` until
//! exhausted; deletes run strictly sequentially so failure counting is
//! deterministic.

use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::models::BatchStats;

/// Well-known Graph folder id for the primary inbox
pub const INBOX_FOLDER: &str = "inbox";

/// Well-known Graph folder id for the junk folder
pub const JUNK_FOLDER: &str = "junkemail";

/// Page size requested from the listing endpoint
const LIST_PAGE_SIZE: usize = 1000;

/// One message reference from a listing page
#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// One page of the Graph listing endpoint
#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<MessageRef>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Bearer-authenticated Graph API client, scoped to one request
pub struct GraphClient {
    http: reqwest::Client,
    base: String,
    access_token: String,
}

impl GraphClient {
    /// Create a client for one access token
    pub fn new(http: reqwest::Client, base: impl Into<String>, access_token: String) -> Self {
        Self {
            http,
            base: base.into(),
            access_token,
        }
    }

    /// List all message ids in a folder, following pagination to the end
    ///
    /// Every page is fetched before the caller attempts any delete, so the
    /// reported total equals the sum of all page item counts.
    pub async fn list_message_ids(&self, folder: &str) -> AppResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut next = Some(format!(
            "{}/me/mailFolders/{}/messages?$select=id&$top={}",
            self.base, folder, LIST_PAGE_SIZE
        ));

        while let Some(url) = next {
            tracing::debug!(%url, "fetching message page");
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| AppError::Upstream(format!("Graph list request failed: {e}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AppError::Upstream(format!("Graph list read failed: {e}")))?;
            if !status.is_success() {
                return Err(AppError::Upstream(format!(
                    "Graph list returned status {status}: {body}"
                )));
            }

            let page: MessagePage = serde_json::from_str(&body)
                .map_err(|e| AppError::Upstream(format!("Graph list JSON parse failed: {e}")))?;
            ids.extend(page.value.into_iter().map(|m| m.id));
            next = page.next_link;
        }

        Ok(ids)
    }

    /// Delete one message by Graph id
    pub async fn delete_message(&self, message_id: &str) -> AppResult<()> {
        let url = self.message_url(message_id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Graph delete request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!(
                "message '{message_id}' not found"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Graph delete of '{message_id}' returned status {status}: {body}"
            )));
        }
        Ok(())
    }

    /// Delete every message in a folder, best-effort
    ///
    /// Per-item failures are logged, counted as failed, and never abort the
    /// remaining items. An empty folder yields zero stats and is success.
    pub async fn clear_folder(&self, folder: &str) -> AppResult<BatchStats> {
        let ids = self.list_message_ids(folder).await?;
        if ids.is_empty() {
            return Ok(BatchStats::empty());
        }

        let mut stats = BatchStats {
            total: ids.len(),
            ..BatchStats::empty()
        };
        for id in &ids {
            match self.delete_message(id).await {
                Ok(()) => stats.deleted += 1,
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "message delete failed");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            folder,
            total = stats.total,
            deleted = stats.deleted,
            failed = stats.failed,
            "Graph folder cleared"
        );
        Ok(stats)
    }

    /// Submit one outbound message via `sendMail`
    pub async fn send_message(&self, message: &OutgoingMessage) -> AppResult<()> {
        let payload = message.to_graph_payload()?;
        let url = format!("{}/me/sendMail", self.base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Graph sendMail request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Graph sendMail returned status {status}: {body}"
            )));
        }
        Ok(())
    }

    fn message_url(&self, message_id: &str) -> String {
        format!(
            "{}/me/messages/{}",
            self.base,
            urlencoding::encode(message_id)
        )
    }
}

/// One outbound message as accepted by the send endpoint
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Comma-separated recipient list
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl OutgoingMessage {
    /// Build the Graph `sendMail` JSON payload
    ///
    /// HTML is preferred over plain text when both bodies are given.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if no recipient or no body is present.
    pub fn to_graph_payload(&self) -> AppResult<serde_json::Value> {
        let recipients = parse_recipients(&self.to)?;
        let to_recipients: Vec<serde_json::Value> = recipients
            .iter()
            .map(|address| serde_json::json!({ "emailAddress": { "address": address } }))
            .collect();

        let (content_type, content) = match (&self.html, &self.text) {
            (Some(html), _) => ("HTML", html.as_str()),
            (None, Some(text)) => ("Text", text.as_str()),
            (None, None) => {
                return Err(AppError::InvalidInput(
                    "Missing required parameters: text or html".to_owned(),
                ));
            }
        };

        Ok(serde_json::json!({
            "message": {
                "subject": self.subject,
                "body": { "contentType": content_type, "content": content },
                "toRecipients": to_recipients,
            }
        }))
    }
}

/// Split a comma-separated recipient list, trimming whitespace
///
/// Empty entries are skipped; an entirely empty list is invalid.
fn parse_recipients(to: &str) -> AppResult<Vec<String>> {
    let recipients: Vec<String> = to
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned)
        .collect();
    if recipients.is_empty() {
        return Err(AppError::InvalidInput(
            "to must contain at least one recipient".to_owned(),
        ));
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_deserializes_next_link() {
        let page: MessagePage = serde_json::from_str(
            r#"{"value":[{"id":"a"},{"id":"b"}],"@odata.nextLink":"https://g/next"}"#,
        )
        .expect("must parse");
        assert_eq!(page.value.len(), 2);
        assert_eq!(page.next_link.as_deref(), Some("https://g/next"));
    }

    #[test]
    fn final_page_has_no_next_link() {
        let page: MessagePage =
            serde_json::from_str(r#"{"value":[{"id":"a"}]}"#).expect("must parse");
        assert!(page.next_link.is_none());
    }

    #[test]
    fn empty_page_body_yields_no_ids() {
        let page: MessagePage = serde_json::from_str("{}").expect("must parse");
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn recipients_are_trimmed_and_empties_skipped() {
        let recipients = parse_recipients("a@x.com, b@y.com ,,  c@z.com").expect("must pass");
        assert_eq!(recipients, vec!["a@x.com", "b@y.com", "c@z.com"]);
    }

    #[test]
    fn blank_recipient_list_is_invalid() {
        parse_recipients(" , ,").expect_err("must fail");
    }

    #[test]
    fn html_body_wins_over_text() {
        let message = OutgoingMessage {
            to: "a@x.com".to_owned(),
            subject: "hi".to_owned(),
            text: Some("plain".to_owned()),
            html: Some("<b>rich</b>".to_owned()),
        };
        let payload = message.to_graph_payload().expect("must build");
        assert_eq!(payload["message"]["body"]["contentType"], "HTML");
        assert_eq!(payload["message"]["body"]["content"], "<b>rich</b>");
    }

    #[test]
    fn text_body_used_when_no_html() {
        let message = OutgoingMessage {
            to: "a@x.com".to_owned(),
            subject: "hi".to_owned(),
            text: Some("plain".to_owned()),
            html: None,
        };
        let payload = message.to_graph_payload().expect("must build");
        assert_eq!(payload["message"]["body"]["contentType"], "Text");
    }

    #[test]
    fn missing_both_bodies_is_invalid() {
        let message = OutgoingMessage {
            to: "a@x.com".to_owned(),
            subject: "hi".to_owned(),
            text: None,
            html: None,
        };
        message.to_graph_payload().expect_err("must fail");
    }

    #[tokio::test]
    async fn clear_folder_fetches_every_page_before_deleting() {
        use axum::extract::Path;
        use axum::http::Uri;
        use axum::routing::{delete, get};
        use axum::{Json, Router};
        use std::sync::{Arc, Mutex};

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub must bind");
        let base = format!("http://{}/v1.0", listener.local_addr().expect("stub addr"));

        let list_log = Arc::clone(&log);
        let list_base = base.clone();
        let delete_log = Arc::clone(&log);
        let app = Router::new()
            .route(
                "/v1.0/me/mailFolders/{folder}/messages",
                get(move |uri: Uri| {
                    let log = Arc::clone(&list_log);
                    let base = list_base.clone();
                    async move {
                        let second = uri.query().is_some_and(|q| q.contains("page=2"));
                        log.lock()
                            .expect("log lock")
                            .push(if second { "list-2" } else { "list-1" }.to_owned());
                        if second {
                            Json(serde_json::json!({ "value": [{ "id": "c" }] }))
                        } else {
                            Json(serde_json::json!({
                                "value": [{ "id": "a" }, { "id": "b" }],
                                "@odata.nextLink":
                                    format!("{base}/me/mailFolders/inbox/messages?page=2"),
                            }))
                        }
                    }
                }),
            )
            .route(
                "/v1.0/me/messages/{id}",
                delete(move |Path(id): Path<String>| {
                    let log = Arc::clone(&delete_log);
                    async move {
                        log.lock().expect("log lock").push(format!("delete-{id}"));
                        axum::http::StatusCode::NO_CONTENT
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub must serve");
        });

        let client = GraphClient::new(reqwest::Client::new(), base, "tok".to_owned());
        let stats = client.clear_folder("inbox").await.expect("must clear");

        assert_eq!(stats.total, 3, "total must equal the sum of both pages");
        assert_eq!(stats.deleted, 3);
        assert_eq!(stats.failed, 0);
        let calls = log.lock().expect("log lock").clone();
        assert_eq!(
            calls,
            vec!["list-1", "list-2", "delete-a", "delete-b", "delete-c"],
            "both pages must be fetched before the first delete"
        );
    }

    #[test]
    fn message_url_percent_encodes_the_id() {
        let client = GraphClient::new(
            reqwest::Client::new(),
            "https://graph.example/v1.0",
            "tok".to_owned(),
        );
        assert_eq!(
            client.message_url("AAMkAD/+="),
            "https://graph.example/v1.0/me/messages/AAMkAD%2F%2B%3D"
        );
    }
}
