use crate::error::ProxyError;
use crate::proxy::client::{UpstreamClient, UpstreamRequest};
use crate::proxy::context::{empty_body, BoxBody, BoxError, InboundRequest};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use http::header::HOST;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Frame;
use hyper::Response;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Browsers probing `/favicon.ico` through a full-path proxy end up with this
/// as the target host.
const FAVICON_HOST: &str = "favicon.ico";

/// Sends a prepared request upstream and relays the response back unbuffered.
#[derive(Clone)]
pub struct ForwardingEngine {
    client: Arc<dyn UpstreamClient>,
}

impl ForwardingEngine {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    pub async fn forward(
        &self,
        url: Url,
        req: InboundRequest,
    ) -> Result<Response<BoxBody>, ProxyError> {
        if is_favicon(&url) {
            debug!("proxy: favicon probe answered locally, url={}", url);
            let mut resp = Response::new(empty_body());
            *resp.status_mut() = StatusCode::NO_CONTENT;
            return Ok(resp);
        }

        let InboundRequest {
            method,
            mut headers,
            body,
            ..
        } = req;
        // The upstream host comes from the url, not from the client.
        headers.remove(HOST);
        let body = carries_body(&method).then_some(body);

        let started = Instant::now();
        let target = url.to_string();
        let upstream = self
            .client
            .send(UpstreamRequest {
                method: method.clone(),
                url,
                headers,
                body,
            })
            .await?;

        info!(
            "proxy: upstream responded, method={}, url={}, status={}, elapsed_ms={}",
            method,
            target,
            upstream.status.as_u16(),
            started.elapsed().as_millis()
        );

        let guard = ExchangeGuard {
            url: target,
            started,
            bytes: 0,
            chunks: 0,
            completed: false,
        };
        let body = RelayBody {
            stream: upstream.body,
            guard: Some(guard),
        };

        let mut resp = Response::new(body.boxed_unsync());
        *resp.status_mut() = upstream.status;
        *resp.headers_mut() = upstream.headers;
        Ok(resp)
    }
}

fn is_favicon(url: &Url) -> bool {
    url.port().is_none() && url.host_str() == Some(FAVICON_HOST)
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Lifetime of one upstream exchange. Logged once, when the relay ends or
/// is abandoned by the client.
struct ExchangeGuard {
    url: String,
    started: Instant,
    bytes: u64,
    chunks: u64,
    completed: bool,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if self.completed {
            debug!(
                "proxy: upstream released, url={}, bytes={}, chunks={}, elapsed_ms={}",
                self.url,
                self.bytes,
                self.chunks,
                self.started.elapsed().as_millis()
            );
        } else {
            info!(
                "proxy: upstream released before end of body, url={}, bytes={}, chunks={}, elapsed_ms={}",
                self.url,
                self.bytes,
                self.chunks,
                self.started.elapsed().as_millis()
            );
        }
    }
}

/// Response body that pulls from the upstream one chunk per poll.
///
/// Dropping it drops the upstream stream and with it the connection.
struct RelayBody {
    stream: BoxStream<'static, Result<Bytes, BoxError>>,
    guard: Option<ExchangeGuard>,
}

impl RelayBody {
    fn finish(&mut self, completed: bool) {
        self.stream = stream::empty().boxed();
        if let Some(mut guard) = self.guard.take() {
            guard.completed = completed;
        }
    }
}

impl hyper::body::Body for RelayBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.stream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(guard) = this.guard.as_mut() {
                    guard.bytes += chunk.len() as u64;
                    guard.chunks += 1;
                }
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.guard.is_none()
    }
}
