//! Remote client error types

use crate::models::Server;

/// Errors that can occur while talking to HWProxy
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network failure, timeout or unreadable body
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// HTTP 429 on finish/download
    #[error("Too many requests. Keep calm and try later!")]
    RateLimited,

    /// 2xx response whose body does not have the expected shape
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Status probe rejected (401 or any non-2xx)
    #[error("not authenticated on {server} (HTTP {status})")]
    Unauthorized { server: Server, status: u16 },

    /// Could not build the HTTP client
    #[error("failed to create HTTP client: {0}")]
    Setup(#[source] reqwest::Error),
}

impl ClientError {
    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }
}
