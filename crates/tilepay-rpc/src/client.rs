//! JSON-RPC 1.0 transport to the node.
//!
//! One POST per call against the node's root endpoint. Credentials and the
//! content type are installed as default headers when the client is built;
//! btcd's self-signed `rpc.cert` can be added as an extra trusted root.
//! Transient failures are retried with a doubling delay.

use crate::error::RpcError;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Basic-auth credentials (`rpcuser` / `rpcpassword`).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Both halves, or nothing.
    pub fn pair(user: Option<String>, password: Option<String>) -> Option<Self> {
        Some(Self {
            user: user?,
            password: password?,
        })
    }

    fn header(&self) -> Result<HeaderValue, RpcError> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.user, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {}", token))
            .map_err(|e| RpcError::Other(format!("unusable credentials: {}", e)))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Node endpoint, e.g. `http://127.0.0.1:18443`.
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Extra PEM root certificate for HTTPS endpoints.
    pub root_cert_pem: Option<Vec<u8>>,
    pub timeout: Duration,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay before the first retry; doubles afterwards.
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: format!("http://127.0.0.1:{}", crate::ports::BITCOIND_REGTEST),
            credentials: None,
            root_cert_pem: None,
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Fault>,
}

#[derive(Deserialize)]
struct Fault {
    code: i64,
    message: String,
}

pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
    retries: u32,
    retry_delay: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Unauthenticated client with default settings.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(credentials) = &config.credentials {
            headers.insert(AUTHORIZATION, credentials.header()?);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout);
        if let Some(pem) = &config.root_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| RpcError::Certificate(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| RpcError::Other(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.url.trim_end_matches('/').to_string(),
            retries: config.retries,
            retry_delay: config.retry_delay,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.endpoint
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.retry_delay
            .saturating_mul(1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX))
    }

    /// Invoke `method` with positional `params`, retrying transient failures.
    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let mut retry = 0;
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match self.send_once(id, method, params).await {
                Err(e) if e.is_transient() && retry < self.retries => {
                    retry += 1;
                    let delay = self.backoff(retry);
                    log::debug!("{} failed ({}); retry {} in {:?}", method, e, retry, delay);
                    tokio::time::sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }

    async fn send_once(&self, id: u64, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let transport = |source: reqwest::Error| RpcError::Http {
            method: method.to_string(),
            url: self.endpoint.clone(),
            source,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&Request {
                jsonrpc: "1.0",
                id,
                method,
                params,
            })
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RpcError::AuthFailed {
                url: self.endpoint.clone(),
            });
        }
        let text = response.text().await.map_err(transport)?;

        // Nodes answer RPC-level failures with an error status and a JSON
        // body, so the body is consulted before the status.
        let reply: Reply = match serde_json::from_str(&text) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(RpcError::HttpStatus {
                    method: method.to_string(),
                    url: self.endpoint.clone(),
                    status: status.as_u16(),
                    body: text.chars().take(500).collect(),
                })
            }
            Err(e) => return Err(RpcError::Json(e)),
        };

        if let Some(fault) = reply.error {
            return Err(RpcError::Rpc {
                code: fault.code,
                message: fault.message,
                method: method.to_string(),
            });
        }
        if reply.result.is_null() {
            return Err(RpcError::NoResult {
                context: method.to_string(),
            });
        }
        Ok(reply.result)
    }
}
