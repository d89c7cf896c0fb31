//! RPC error types.

use thiserror::Error;

/// JSON-RPC error codes returned by bitcoind/btcd.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Transaction or block not found.
    pub const INVALID_ADDRESS_OR_KEY: i64 = -5;
    /// Node is still warming up.
    pub const IN_WARMUP: i64 = -28;
    /// Transaction rejected by the node.
    pub const VERIFY_REJECTED: i64 = -26;
    /// Transaction inputs already spent.
    pub const VERIFY_ALREADY_IN_CHAIN: i64 = -27;
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error calling {method} at {url}: {source}")]
    Http {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} calling {method} at {url}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        code: i64,
        message: String,
        method: String,
    },

    #[error("no result in response to {context}")]
    NoResult { context: String },

    #[error("authentication failed at {url}")]
    AuthFailed { url: String },

    #[error("failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            RpcError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            RpcError::Rpc { code, .. } => *code == codes::IN_WARMUP,
            _ => false,
        }
    }

    /// Whether the node explicitly refused the request, as opposed to the
    /// request failing in transit.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { .. })
    }

    pub(crate) fn decode(context: impl Into<String>, reason: impl ToString) -> Self {
        RpcError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}
