use http::StatusCode;
use std::fmt;

/// Per-request failures of the routing engine.
///
/// Every variant is recoverable: the handler converts it into a structured
/// HTTP response and the connection keeps serving. Configuration problems
/// never show up here, they abort startup through `anyhow` instead.
#[derive(Debug)]
pub enum ProxyError {
    NoRouteMatched { url: String },
    MissingHeader,
    IncorrectHeader { name: String },
    InvalidUrl { url: String },
    MalformedUrl { url: String, reason: String },
    InvalidRequest(String),
    InvalidHost,
    UpstreamTimeout,
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            ProxyError::MissingHeader
            | ProxyError::IncorrectHeader { .. }
            | ProxyError::InvalidUrl { .. }
            | ProxyError::MalformedUrl { .. }
            | ProxyError::InvalidRequest(_)
            | ProxyError::InvalidHost => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Client-facing message.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::NoRouteMatched { url } => {
                write!(f, "'{}' is not matching any route patterns", url)
            }
            ProxyError::MissingHeader => write!(f, "One of the required headers is missing"),
            ProxyError::IncorrectHeader { name } => {
                write!(f, "Incorrect header value for header '{}'", name)
            }
            ProxyError::InvalidUrl { url } => write!(f, "Invalid url, missing netloc in {}", url),
            ProxyError::MalformedUrl { url, reason } => {
                write!(f, "Invalid url '{}': {}", url, reason)
            }
            ProxyError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProxyError::InvalidHost => write!(f, "Invalid host header"),
            ProxyError::UpstreamTimeout => write!(f, "Upstream timeout"),
            ProxyError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}
