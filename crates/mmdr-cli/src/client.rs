//! HTTP client for a running mmdr server.

use mmdr_core::{Format, RenderOptions};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("Server error ({status}): {message}")]
    Server { status: StatusCode, message: String },
}

/// A rendered artifact plus the diagnostic headers that came with it.
#[derive(Debug)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    /// `(header, value)` for every `x-mermaid-*` header.
    pub diagnostics: Vec<(String, String)>,
}

impl Rendered {
    pub fn diagnostic(&self, name: &str) -> Option<&str> {
        self.diagnostics
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Serialize)]
struct ConvertBody<'a> {
    mermaid: &'a str,
    #[serde(flatten)]
    options: &'a RenderOptions,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// WebSocket URL of the live channel.
    pub fn live_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/ws", ws_base)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn check(res: Response) -> Result<Response, ClientError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let body: Value = res.json().await.unwrap_or(Value::Null);
        let message = body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        if status == StatusCode::NOT_FOUND {
            Err(ClientError::NotFound(message))
        } else {
            Err(ClientError::Server { status, message })
        }
    }

    pub async fn render(
        &self,
        source: &str,
        format: Format,
        options: &RenderOptions,
    ) -> Result<Rendered, ClientError> {
        let res = self
            .request(Method::POST, &format!("/convert/{}", format))
            .json(&ConvertBody {
                mermaid: source,
                options,
            })
            .send()
            .await?;
        let res = Self::check(res).await?;

        let diagnostics = res
            .headers()
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-mermaid-"))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = res.bytes().await?.to_vec();

        Ok(Rendered { bytes, diagnostics })
    }

    pub async fn cache_stats(&self) -> Result<Value, ClientError> {
        let res = self.request(Method::GET, "/cache/stats").send().await?;
        Ok(Self::check(res).await?.json().await?)
    }

    pub async fn clear_cache(&self) -> Result<Value, ClientError> {
        let res = self.request(Method::DELETE, "/cache").send().await?;
        Ok(Self::check(res).await?.json().await?)
    }

    pub async fn delete_cache_entry(&self, key: &str) -> Result<Value, ClientError> {
        let res = self
            .request(Method::DELETE, &format!("/cache/{}", key))
            .send()
            .await?;
        Ok(Self::check(res).await?.json().await?)
    }
}
