//! Retry-aware HTTP client shared by strategies, providers and handlers.
//!
//! Every outbound call goes through [`HttpClient`] so the timeout, retry
//! and TLS fallback policy is the same everywhere.

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpSettings;

/// HTTP failures, classified for retry decisions
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("Failed to decode response from {url}: {message}")]
    Body { url: String, message: String },

    #[error("Response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl HttpError {
    /// Timeouts, transport errors, 429 and 5xx are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Timeout { .. } | HttpError::Transport { .. } => true,
            HttpError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            HttpError::Body { .. } | HttpError::TooLarge { .. } | HttpError::Build(_) => false,
        }
    }

    /// Status code, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            HttpError::Status {
                status,
                url: url.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            HttpError::Body {
                url: url.to_string(),
                message: error_chain(&err),
            }
        } else {
            HttpError::Transport {
                url: url.to_string(),
                message: error_chain(&err),
            }
        }
    }

    fn is_tls(&self) -> bool {
        match self {
            HttpError::Transport { message, .. } => {
                let message = message.to_ascii_lowercase();
                ["certificate", "tls", "ssl", "handshake"]
                    .iter()
                    .any(|needle| message.contains(needle))
            }
            _ => false,
        }
    }
}

/// Full source chain; reqwest hides the TLS cause a few levels down
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Whether a request carries credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Credentials {
    Anonymous,
    Bearer,
}

/// Shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,

    /// Accepts invalid certificates; only used after a TLS failure of a
    /// request without credentials
    insecure: Option<Client>,

    retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, HttpError> {
        let build = |insecure: bool| {
            Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .user_agent(settings.user_agent.clone())
                .danger_accept_invalid_certs(insecure)
                .build()
                .map_err(|e| HttpError::Build(e.to_string()))
        };

        Ok(Self {
            client: build(false)?,
            insecure: if settings.insecure_fallback {
                Some(build(true)?)
            } else {
                None
            },
            retries: settings.retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        })
    }

    /// GET a URL as text
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self
            .execute(Method::GET, url, Credentials::Anonymous, |request| request)
            .await?;
        response
            .text()
            .await
            .map_err(|e| HttpError::from_reqwest(url, e))
    }

    /// GET a URL and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let response = self
            .execute(Method::GET, url, Credentials::Anonymous, |request| {
                request.header(header::ACCEPT, "application/json")
            })
            .await?;
        decode_json(url, response).await
    }

    /// GET with a bearer token and decode the JSON body
    pub async fn get_json_authorized<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
    ) -> Result<T, HttpError> {
        let response = self
            .execute(Method::GET, url, Credentials::Bearer, |request| {
                request
                    .header(header::ACCEPT, "application/json")
                    .bearer_auth(token)
            })
            .await?;
        decode_json(url, response).await
    }

    /// GET a URL as bytes, refusing bodies larger than `limit`
    pub async fn get_bytes(&self, url: &str, limit: usize) -> Result<Vec<u8>, HttpError> {
        let mut response = self
            .execute(Method::GET, url, Credentials::Anonymous, |request| request)
            .await?;

        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(HttpError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HttpError::from_reqwest(url, e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(HttpError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B, T>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let credentials = match bearer {
            Some(_) => Credentials::Bearer,
            None => Credentials::Anonymous,
        };
        let response = self
            .execute(Method::POST, url, credentials, |request| {
                let request = request.json(body);
                match bearer {
                    Some(token) => request.bearer_auth(token),
                    None => request,
                }
            })
            .await?;
        decode_json(url, response).await
    }

    /// Client to retry a TLS failure with. Never one that skips certificate
    /// checks when the request carries a token.
    fn tls_fallback(&self, credentials: Credentials) -> Option<&Client> {
        match credentials {
            Credentials::Anonymous => self.insecure.as_ref(),
            Credentials::Bearer => None,
        }
    }

    /// Send with retries; non-success statuses become errors
    async fn execute<F>(
        &self,
        method: Method,
        url: &str,
        credentials: Credentials,
        prepare: F,
    ) -> Result<Response, HttpError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let result = self
                .send_once(&self.client, method.clone(), url, &prepare)
                .await;

            let result = match (result, self.tls_fallback(credentials)) {
                (Err(e), Some(insecure)) if e.is_tls() => {
                    warn!(url, error = %e, "TLS failure, retrying without certificate checks");
                    self.send_once(insecure, method.clone(), url, &prepare).await
                }
                (result, _) => result,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.retry_delay * attempt;
                    debug!(url, attempt, error = %e, "Retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<F>(
        &self,
        client: &Client,
        method: Method,
        url: &str,
        prepare: &F,
    ) -> Result<Response, HttpError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let response = prepare(client.request(method, url))
            .send()
            .await
            .map_err(|e| HttpError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

async fn decode_json<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, HttpError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HttpError::from_reqwest(url, e))?;
    serde_json::from_slice(&bytes).map_err(|e| HttpError::Body {
        url: url.to_string(),
        message: e.to_string(),
    })
}
