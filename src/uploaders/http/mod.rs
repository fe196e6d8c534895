use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use crate::config::Config;
use crate::core::cancellation::cancellable;
use crate::core::{FileRegistration, PartReceipt, PartUpload, RemoteApi, Result, UploadError};
use crate::utils::retry::{RetryPolicy, retry_with_policy};

/// `RemoteApi` over the drive's REST endpoints.
#[derive(Clone)]
pub struct HttpRemoteApi {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpRemoteApi {
    pub fn new(endpoint: &str, token: Option<String>, retry: RetryPolicy) -> Result<Self> {
        // Keep the endpoint's own path when joining relative routes
        let endpoint = if endpoint.ends_with('/') {
            Url::parse(endpoint)?
        } else {
            Url::parse(&format!("{}/", endpoint))?
        };

        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            token,
            retry,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.endpoint, config.token.clone(), config.retry.clone())
    }

    pub fn url(&self, route: &str) -> Result<Url> {
        Ok(self.endpoint.join(route)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send with retries, racing the token, and decode the JSON body.
    async fn execute<F>(&self, cancel: &CancellationToken, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_with_policy(&self.retry, cancel, || {
            let request = self.authorize(build());
            cancellable(cancel, async move {
                let response = check_response(request.send().await?).await?;
                let body = response.text().await?;
                if body.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(serde_json::from_str(&body)?)
                }
            })
        })
        .await
    }
}

async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, &body))
}

/// Map a non-2xx response onto the error taxonomy.
pub fn classify_failure(status: StatusCode, body: &str) -> UploadError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::CONFLICT || message.contains("already exists") {
        UploadError::AlreadyExists(message)
    } else {
        UploadError::remote(status.as_u16(), message)
    }
}

fn remote_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_folder(
        &self,
        name: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let url = self.url("api/files")?;
        let body = json!({ "name": name, "type": "folder", "path": path });

        let value = self
            .execute(cancel, || self.client.post(url.clone()).json(&body))
            .await?;
        Ok(remote_id(&value))
    }

    async fn file_exists(&self, name: &str, path: &str, cancel: &CancellationToken) -> Result<bool> {
        let url = self.url("api/files")?;
        let query = [("path", path), ("name", name), ("operation", "find")];

        let value = self
            .execute(cancel, || self.client.get(url.clone()).query(&query))
            .await?;
        Ok(value
            .get("files")
            .and_then(Value::as_array)
            .is_some_and(|files| !files.is_empty()))
    }

    async fn upload_part(&self, part: PartUpload, cancel: &CancellationToken) -> Result<PartReceipt> {
        let url = self.url(&format!("api/uploads/{}", part.upload_id))?;
        let mut query = vec![
            ("partName", part.part_name.clone()),
            ("fileName", part.file_name.clone()),
            ("partNo", part.part_number.to_string()),
            ("encrypted", part.encrypted.to_string()),
        ];
        if let Some(channel_id) = part.channel_id {
            query.push(("channelId", channel_id.to_string()));
        }

        let value = self
            .execute(cancel, || {
                self.client
                    .post(url.clone())
                    .query(&query)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(part.data.clone())
            })
            .await?;

        debug!(part = part.part_number, name = %part.part_name, "Part acknowledged");
        Ok(serde_json::from_value(value)?)
    }

    async fn register_file(
        &self,
        registration: &FileRegistration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let url = self.url("api/files")?;

        let value = self
            .execute(cancel, || self.client.post(url.clone()).json(registration))
            .await?;
        Ok(remote_id(&value))
    }
}
