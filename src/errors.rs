use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error taxonomy for the proxy core.
///
/// Transient upstream failures (I/O, 429, 5xx) are retried by the client
/// layer and never bubble out of the refreshers; permanent upstream failures
/// keep their status code so handlers can surface it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    #[error("all API keys exhausted, last error: {0}")]
    AllKeysExhausted(#[source] Box<ProxyError>),

    #[error("cache loader failed: {0}")]
    LoadFailed(#[source] Box<ProxyError>),

    #[error("failed to decode upstream payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unparseable {field} field: {value:?}")]
    Field { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("read deadline exceeded after {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error("no data available")]
    NoData,

    #[error("operation cancelled")]
    Cancelled,
}

impl ProxyError {
    /// Status code preserved from a permanent upstream rejection, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProxyError::UpstreamStatus { status } => Some(*status),
            ProxyError::AllKeysExhausted(cause) | ProxyError::LoadFailed(cause) => {
                cause.upstream_status()
            }
            _ => None,
        }
    }

    /// True for failures worth another attempt: network I/O, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            ProxyError::Request(e) => !e.is_builder(),
            ProxyError::UpstreamStatus { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_preserved_through_wrappers() {
        let err = ProxyError::AllKeysExhausted(Box::new(ProxyError::UpstreamStatus {
            status: 404,
        }));
        assert_eq!(err.upstream_status(), Some(404));

        let err = ProxyError::LoadFailed(Box::new(ProxyError::UpstreamStatus { status: 400 }));
        assert_eq!(err.upstream_status(), Some(400));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProxyError::UpstreamStatus { status: 429 }.is_transient());
        assert!(ProxyError::UpstreamStatus { status: 503 }.is_transient());
        assert!(!ProxyError::UpstreamStatus { status: 404 }.is_transient());
        assert!(!ProxyError::NoData.is_transient());
        assert!(!ProxyError::Cancelled.is_transient());
    }
}
