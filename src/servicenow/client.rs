//! Authenticated access to the ServiceNow table and attachment APIs

use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::models::{AttachmentRecord, OwnerLabel};
use crate::servicenow::{AttachmentListResponse, OwnerRecordResponse, SnowApi, SnowError};

/// Client for one instance, sharing a connection pool and basic-auth credentials
#[derive(Debug, Clone)]
pub struct RecordClient {
    client: Client,
    timeout: Duration,
    base_url: String,
    username: String,
    password: String,
}

impl RecordClient {
    pub fn new(config: &Config) -> Result<Self, SnowError> {
        // No overall deadline: attachment bodies may take arbitrarily long
        let client = Client::builder()
            .user_agent(&config.http.user_agent)
            .connect_timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            timeout: config.http_timeout(),
            base_url: config.instance.base_url(),
            username: config.instance.username.clone(),
            password: config.instance.password.clone(),
        })
    }

    /// List attachment metadata matching an encoded query.
    ///
    /// The filter is embedded verbatim; callers are responsible for its encoding.
    pub async fn list_attachments(&self, filter: &str) -> Result<Vec<AttachmentRecord>, SnowError> {
        let url = format!(
            "{}{}?sysparm_query={}",
            self.base_url,
            SnowApi::ATTACHMENT_TABLE_ENDPOINT,
            filter
        );
        debug!("Listing attachments from: {}", url);

        let parsed: AttachmentListResponse = self.get_json(&url).await?;
        Ok(parsed.result)
    }

    /// Resolve the directory label of the record owning an attachment
    pub async fn resolve_owner_label(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<OwnerLabel, SnowError> {
        let url = format!(
            "{}{}/{}/{}",
            self.base_url,
            SnowApi::TABLE_ENDPOINT,
            table,
            record_id
        );
        debug!("Resolving owner record: {}", url);

        let parsed: OwnerRecordResponse = self.get_json(&url).await?;
        Ok(parsed.result.label(record_id))
    }

    /// Stream an attachment's content into `destination`, returning the bytes written.
    ///
    /// `destination` must be a path reserved by the path resolver; it is truncated
    /// before writing so a retried download starts from an empty file. The file is
    /// left as-is on failure; cleanup is the caller's decision.
    ///
    /// There is no limit on the total transfer time, but waiting longer than the
    /// configured timeout for the response headers or for the next chunk fails
    /// with `SnowError::IdleTimeout`.
    pub async fn stream_attachment(
        &self,
        attachment_id: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, SnowError> {
        let url = format!(
            "{}{}/{}/file",
            self.base_url,
            SnowApi::ATTACHMENT_ENDPOINT,
            attachment_id
        );
        debug!("Downloading attachment from: {}", url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SnowError::Cancelled),
            response = tokio::time::timeout(self.timeout, self.get(&url, None)) => {
                response.map_err(|_| self.idle_timeout(&url))??
            }
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(destination)
            .await
            .map_err(|e| SnowError::filesystem(destination, e))?;

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SnowError::Cancelled),
                chunk = tokio::time::timeout(self.timeout, stream.next()) => {
                    chunk.map_err(|_| self.idle_timeout(&url))?
                }
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            file.write_all(&chunk)
                .await
                .map_err(|e| SnowError::filesystem(destination, e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| SnowError::filesystem(destination, e))?;

        Ok(written)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SnowError> {
        let response = self.get(url, Some(self.timeout)).await?;
        let body = response.text().await?;

        serde_json::from_str(&body).map_err(|source| SnowError::Malformed {
            url: url.to_string(),
            source,
        })
    }

    /// Authenticated GET; anything but 200 is an error
    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, SnowError> {
        let mut request = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SnowError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        Ok(response)
    }

    fn idle_timeout(&self, url: &str) -> SnowError {
        SnowError::IdleTimeout {
            url: url.to_string(),
            idle: self.timeout,
        }
    }
}
