//! HTTP implementation of the remote sync and upload transports

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::{Error, RemoteError, Result};
use crate::models::UploadTask;
use crate::sync::remote::{PullBatch, PushOutcome, PushRequest, RemoteSync};
use crate::upload::{UploadReceipt, UploadTransport};

/// Talks to the remote sync service over HTTP.
///
/// Push/pull go through the `/sync` routes, chunked binary transfers
/// through `/uploads`. Failures are classified into [`RemoteError`] so
/// the engine's retry policy can tell transient trouble from requests
/// the remote will never accept.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Build a client bound to `config`, with `timeout` applied to every
    /// request.
    pub fn new(config: RemoteConfig, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::InvalidInput(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { config, client })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.config.endpoint);
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

impl RemoteSync for HttpRemote {
    async fn push(&self, request: &PushRequest) -> std::result::Result<PushOutcome, RemoteError> {
        let response = self
            .request(reqwest::Method::POST, "/sync/push")
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body = response
                .json::<VersionMismatchBody>()
                .await
                .map_err(classify_decode_error)?;
            return Ok(PushOutcome::VersionMismatch {
                remote_version: body.remote_version,
                remote_payload: body.remote_payload,
                remote_updated_at: body.remote_updated_at,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_sync_status(status, &body));
        }

        let body = response
            .json::<PushAcceptedBody>()
            .await
            .map_err(classify_decode_error)?;
        Ok(PushOutcome::Applied {
            new_version: body.new_version,
        })
    }

    async fn pull(&self, since: Option<&str>) -> std::result::Result<PullBatch, RemoteError> {
        let mut builder = self.request(reqwest::Method::GET, "/sync/pull");
        if let Some(checkpoint) = since {
            builder = builder.query(&[("since", checkpoint)]);
        }
        let response = builder.send().await.map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_sync_status(status, &body));
        }
        response
            .json::<PullBatch>()
            .await
            .map_err(classify_decode_error)
    }
}

impl UploadTransport for HttpRemote {
    async fn upload_chunk(
        &self,
        task: &UploadTask,
        chunk_index: u32,
        bytes: &[u8],
    ) -> std::result::Result<(), RemoteError> {
        let path = format!("/uploads/{}/chunks/{chunk_index}", task.id);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upload_status(status, &body));
        }
        Ok(())
    }

    async fn finalize_upload(
        &self,
        task: &UploadTask,
    ) -> std::result::Result<UploadReceipt, RemoteError> {
        let path = format!("/uploads/{}/complete", task.id);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({
                "filename": task.filename,
                "mime_type": task.mime_type,
                "file_size": task.file_size,
                "total_chunks": task.total_chunks,
            }))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_upload_status(status, &body));
        }
        let body = response
            .json::<FinalizeBody>()
            .await
            .map_err(classify_decode_error)?;
        Ok(UploadReceipt {
            file_id: body.file_id,
            remote_url: body.remote_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PushAcceptedBody {
    new_version: i64,
}

#[derive(Debug, Deserialize)]
struct VersionMismatchBody {
    remote_version: i64,
    #[serde(default)]
    remote_payload: Value,
    remote_updated_at: i64,
}

#[derive(Debug, Deserialize)]
struct FinalizeBody {
    file_id: String,
    remote_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn classify_send_error(err: reqwest::Error) -> RemoteError {
    // Anything that failed before a response arrived is worth retrying
    RemoteError::Transient(err.to_string())
}

fn classify_decode_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Validation(format!("invalid response payload: {err}"))
}

/// Classification for the `/sync` routes. Rate limiting is transient
/// here; the push backs off and replays.
fn classify_sync_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Validation(message)
    }
}

/// Classification for the `/uploads` routes, where 413/429 mean the
/// quota is spent and only user action can help.
fn classify_upload_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status == StatusCode::PAYLOAD_TOO_LARGE || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::QuotaExceeded(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        RemoteError::Transient(message)
    } else {
        RemoteError::Validation(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
