use crate::config::UpstreamSettings;
use crate::error::ProxyError;
use crate::proxy::context::{BoxBody, BoxError};
use anyhow::Context;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use http::header::{CONNECTION, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, Method, StatusCode};
use http_body_util::BodyExt;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// A fully prepared outbound request.
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<BoxBody>,
}

/// Upstream response head plus a body that has not been read yet.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, BoxError>>,
}

/// The transport seam of the forwarding engine.
///
/// Dropping the returned body stream must release the upstream connection.
pub trait UpstreamClient: Send + Sync {
    fn send(&self, req: UpstreamRequest) -> BoxFuture<'_, Result<UpstreamResponse, ProxyError>>;
}

/// Pooled HTTP/1.1 + HTTP/2 client over rustls.
pub struct HttpClient {
    inner: reqwest::Client,
    response_timeout: Duration,
}

impl HttpClient {
    pub fn new(settings: &UpstreamSettings) -> anyhow::Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .pool_idle_timeout(settings.pool_idle_timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .no_proxy()
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self {
            inner,
            response_timeout: settings.response_timeout(),
        })
    }
}

impl UpstreamClient for HttpClient {
    fn send(&self, req: UpstreamRequest) -> BoxFuture<'_, Result<UpstreamResponse, ProxyError>> {
        Box::pin(async move {
            let UpstreamRequest {
                method,
                url,
                mut headers,
                body,
            } = req;
            remove_hop_headers(&mut headers);

            let mut builder = self.inner.request(method, url.clone()).headers(headers);
            if let Some(body) = body {
                builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
            }

            let resp = match tokio::time::timeout(self.response_timeout, builder.send()).await {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) if e.is_timeout() => {
                    warn!("upstream: connect timed out, url={}", url);
                    return Err(ProxyError::UpstreamTimeout);
                }
                Ok(Err(e)) => {
                    warn!("upstream: request failed, url={}, error={}", url, e);
                    return Err(ProxyError::Upstream(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "upstream: no response within {:?}, url={}",
                        self.response_timeout, url
                    );
                    return Err(ProxyError::UpstreamTimeout);
                }
            };

            let status = resp.status();
            let mut headers = resp.headers().clone();
            remove_hop_headers(&mut headers);
            let body = resp
                .bytes_stream()
                .map_err(|e| Box::new(e) as BoxError)
                .boxed();

            Ok(UpstreamResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Strip connection-scoped headers; they describe one hop, not the exchange.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("proxy-connection"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailer"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in hop_headers {
        headers.remove(h);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_remove_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        remove_hop_headers(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key("x-request-id"));
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn test_http_client_builds_from_defaults() {
        assert!(HttpClient::new(&UpstreamSettings::default()).is_ok());
    }
}
