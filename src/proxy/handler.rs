use crate::error::ProxyError;
use crate::proxy::context::{error_response, BoxBody, BoxError, InboundRequest};
use crate::server::ProxyState;
use bytes::Bytes;
use http::header::HOST;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Handle one inbound request:
///
/// 1. build the routing view of the request
/// 2. trusted host check
/// 3. select a router (first match wins)
/// 4. validate, rewrite, forward
/// 5. turn any failure into a JSON error response
/// 6. access log
pub async fn handle_request<B>(
    req: Request<B>,
    state: ProxyState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, Infallible>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let start = Instant::now();
    let method = req.method().clone();
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path = req.uri().path().to_string();

    let mut router_idx = None;
    let resp = match process(req, &state, &mut router_idx).await {
        Ok(resp) => resp,
        Err(e) => {
            match e.status().as_u16() {
                500..=599 => warn!("proxy: request failed, method={}, path={}, error={}", method, path, e),
                _ => info!("proxy: request rejected, method={}, path={}, error={}", method, path, e),
            }
            error_response(&e, state.settings.hide_error_message)
        }
    };

    info!(
        client_ip = %peer_addr.ip(),
        method = %method,
        host = %host,
        path = %path,
        status = resp.status().as_u16(),
        router = ?router_idx,
        latency_ms = %start.elapsed().as_millis(),
        "access"
    );
    Ok(resp)
}

async fn process<B>(
    req: Request<B>,
    state: &ProxyState,
    router_idx: &mut Option<usize>,
) -> Result<Response<BoxBody>, ProxyError>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let inbound = InboundRequest::from_http(req, &state.settings.listen)?;

    if !state.settings.is_host_allowed(inbound.host()) {
        return Err(ProxyError::InvalidHost);
    }

    if state.settings.log_all_headers {
        info!(
            "proxy: inbound request, method={}, url={}, headers={:?}",
            inbound.method, inbound.url, inbound.headers
        );
    }

    let (idx, router) = state.routing.select(&inbound)?;
    *router_idx = Some(idx);
    router.route(inbound, &state.engine).await
}
