//! HTTP utilities for JSON management APIs

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate long bodies and strip control characters before logging
fn sanitize_for_log(body: &str) -> String {
    let printable: String = body
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();

    if printable.len() > MAX_LOG_BODY_LENGTH {
        let head: String = printable.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        printable
    }
}

/// Message carried by a management API error body.
///
/// Understands `{"error": {"message": ...}}` and `{"message": ...}`; falls
/// back to the sanitized body.
pub fn remote_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| v.get("message"))
        })
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| sanitize_for_log(body))
}

/// HTTP client wrapper for management API calls
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    token: Option<String>,
}

impl RestClient {
    /// Create a new client; the bearer token is passed through as-is
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudtree/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, token })
    }

    /// GET a JSON document; 404 is `None`
    pub async fn get(&self, url: &Url) -> Result<Option<Value>> {
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url.clone()), url).await
    }

    /// PUT a JSON body (create or replace)
    pub async fn put(&self, url: &Url, body: &Value) -> Result<Value> {
        tracing::debug!("PUT {}", url);
        let response = self.send(self.client.put(url.clone()).json(body), url).await?;
        response.ok_or_else(|| anyhow::anyhow!("API request failed: 404 Not Found - {}", url))
    }

    /// PATCH a JSON body (partial update)
    pub async fn patch(&self, url: &Url, body: &Value) -> Result<Value> {
        tracing::debug!("PATCH {}", url);
        let response = self.send(self.client.patch(url.clone()).json(body), url).await?;
        response.ok_or_else(|| anyhow::anyhow!("API request failed: 404 Not Found - {}", url))
    }

    /// DELETE a resource; deleting something already gone is not an error
    pub async fn delete(&self, url: &Url) -> Result<()> {
        tracing::debug!("DELETE {}", url);
        match self.send(self.client.delete(url.clone()), url).await? {
            Some(_) => Ok(()),
            None => {
                tracing::debug!("{} was already gone", url);
                Ok(())
            },
        }
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Option<Value>> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} {} - {}", status, url, sanitize_for_log(&body));
            return Err(anyhow::anyhow!(
                "API request failed: {} - {}",
                status,
                remote_error_message(&body)
            ));
        }

        // Handle empty response
        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }

        serde_json::from_str(&body)
            .map(Some)
            .context("Failed to parse response JSON")
    }
}
