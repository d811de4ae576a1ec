use crate::error::ProxyError;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::uri::Authority;
use http::{HeaderMap, HeaderValue, Method, Request, Response};
use http_body_util::{BodyExt, Empty, Full};
use url::Url;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type on both sides of the proxy. Unsync so upstream byte streams
/// (which are only `Send`) can be relayed without buffering.
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> BoxBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn box_body<B>(body: B) -> BoxBody
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// An inbound request as the routing engine sees it.
pub struct InboundRequest {
    pub method: Method,
    /// Full request url: scheme, host, path and query.
    pub url: Url,
    /// The catch-all path parameter: the request path without its leading `/`.
    pub path: String,
    /// Port as the client wrote it, kept even when `url` drops it as the
    /// scheme default.
    pub port: Option<u16>,
    pub headers: HeaderMap,
    pub body: BoxBody,
}

impl InboundRequest {
    /// Build from an HTTP request.
    ///
    /// The scheme comes from the request target, then `X-Forwarded-Proto`,
    /// then defaults to `http`. The host comes from the request target, then
    /// the `Host` header, then `fallback_host` (the listener address).
    pub fn from_http<B>(req: Request<B>, fallback_host: &str) -> Result<Self, ProxyError>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let scheme = parts
            .uri
            .scheme_str()
            .map(|s| s.to_ascii_lowercase())
            .or_else(|| forwarded_proto(&parts.headers))
            .unwrap_or_else(|| "http".to_string());
        let authority = parts
            .uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| fallback_host.to_string());
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let raw = format!("{scheme}://{authority}{path_and_query}");
        let port = explicit_port(&raw);
        let url = Url::parse(&raw)
            .map_err(|e| ProxyError::InvalidRequest(format!("cannot parse '{raw}': {e}")))?;

        let path = parts.uri.path();
        let path = path.strip_prefix('/').unwrap_or(path).to_string();

        Ok(Self {
            method: parts.method,
            url,
            path,
            port,
            headers: parts.headers,
            body: box_body(body),
        })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }
}

/// Port written in the authority of `<scheme>://<authority>...`.
///
/// `url::Url` forgets a port equal to its scheme default, which matters once
/// the scheme is rewritten.
pub(crate) fn explicit_port(with_scheme: &str) -> Option<u16> {
    let (_, rest) = with_scheme.split_once("://")?;
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    rest[..end].parse::<Authority>().ok()?.port_u16()
}

fn forwarded_proto(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-proto")?.to_str().ok()?;
    let proto = value.split(',').next()?.trim().to_ascii_lowercase();
    match proto.as_str() {
        "http" | "https" => Some(proto),
        _ => None,
    }
}

/// Render a per-request error. With `hide_details` every error collapses
/// into the same generic 400 so routing internals never reach the client.
pub fn error_response(err: &ProxyError, hide_details: bool) -> Response<BoxBody> {
    let (status, detail) = if hide_details {
        (http::StatusCode::BAD_REQUEST, "Bad request".to_string())
    } else {
        (err.status(), err.detail())
    };

    let body = serde_json::json!({ "detail": detail }).to_string();
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
