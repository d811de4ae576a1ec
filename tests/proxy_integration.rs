//! End-to-end tests: a real upstream and the proxy, both on ephemeral ports.

use bytes::Bytes;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rulegate::config::{MatchingRuleConfig, ProxyConfig, RouterConfig, Settings};
use rulegate::proxy::context::full_body;
use rulegate::proxy::{BoxBody, BoxError, ForwardingEngine, HttpClient};
use rulegate::routing::RoutingTable;
use rulegate::server::{run_proxy_server, ProxyState};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

async fn upstream_handler(req: Request<Incoming>) -> Result<Response<BoxBody>, Infallible> {
    match req.uri().path() {
        "/stream" => {
            let chunks = futures_util::stream::unfold(0u32, |i| async move {
                if i == 3 {
                    return None;
                }
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                let frame: Result<Frame<Bytes>, BoxError> =
                    Ok(Frame::data(Bytes::from(format!("part-{i};"))));
                Some((frame, i + 1))
            });
            Ok(Response::new(StreamBody::new(chunks).boxed_unsync()))
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Response::new(full_body("too late")))
        }
        _ => {
            let method = req.method().to_string();
            let target = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default();
            let headers: BTreeMap<String, String> = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let body = req.into_body().collect().await.unwrap().to_bytes();
            let echo = serde_json::json!({
                "method": method,
                "target": target,
                "headers": headers,
                "body": String::from_utf8_lossy(&body),
            });
            let mut resp = Response::new(full_body(echo.to_string()));
            resp.headers_mut()
                .insert("x-upstream", "echo".parse().unwrap());
            Ok(resp)
        }
    }
}

async fn start_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(upstream_handler))
                    .await;
            });
        }
    });
    addr
}

/// A port nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

struct Proxy {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Proxy {
    async fn start(routers: Vec<RouterConfig>, settings: Settings) -> Self {
        let routing = RoutingTable::from_config(&ProxyConfig { routers }).unwrap();
        let client = HttpClient::new(&settings.upstream).unwrap();
        let state = ProxyState::new(settings, routing, ForwardingEngine::new(Arc::new(client)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_proxy_server(listener, state, shutdown.clone()));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Everything goes to `upstream` over plain http, request path kept as is.
fn to_upstream(upstream: SocketAddr) -> RouterConfig {
    RouterConfig {
        replace_target_host: Some(format!("http://{upstream}")),
        force_https: false,
        request_path_has_full_path: false,
        ..RouterConfig::with_rules(vec![MatchingRuleConfig::default()])
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn json(resp: reqwest::Response) -> serde_json::Value {
    serde_json::from_str(&resp.text().await.unwrap()).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_forwards_with_rewritten_host() {
    let upstream = start_upstream().await;
    let proxy = Proxy::start(vec![to_upstream(upstream)], Settings::default()).await;

    let resp = client()
        .get(proxy.url("/items/42?expand=true"))
        .header("x-custom", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "echo");

    let echo = json(resp).await;
    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["target"], "/items/42?expand=true");
    assert_eq!(echo["headers"]["x-custom"], "kept");
    assert_eq!(echo["headers"]["host"], upstream.to_string());
}

#[tokio::test]
async fn test_full_path_mode() {
    let upstream = start_upstream().await;
    let router = RouterConfig {
        force_https: false,
        ..RouterConfig::with_rules(vec![MatchingRuleConfig::default()])
    };
    let proxy = Proxy::start(vec![router], Settings::default()).await;

    let resp = client()
        .get(proxy.url(&format!("/http://{upstream}/full/path?q=1")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let echo = json(resp).await;
    assert_eq!(echo["target"], "/full/path?q=1");
}

#[tokio::test]
async fn test_post_body_forwarded() {
    let upstream = start_upstream().await;
    let proxy = Proxy::start(vec![to_upstream(upstream)], Settings::default()).await;

    let resp = client()
        .post(proxy.url("/submit"))
        .header("content-type", "text/plain")
        .body("hello upstream")
        .send()
        .await
        .unwrap();
    let echo = json(resp).await;
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["body"], "hello upstream");
}

#[tokio::test]
async fn test_streaming_response_arrives_in_pieces() {
    let upstream = start_upstream().await;
    let proxy = Proxy::start(vec![to_upstream(upstream)], Settings::default()).await;

    let mut resp = client().get(proxy.url("/stream")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut pieces = Vec::new();
    while let Some(chunk) = resp.chunk().await.unwrap() {
        pieces.push(chunk);
    }
    let all: Vec<u8> = pieces.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(&all[..], b"part-0;part-1;part-2;");
    assert!(pieces.len() >= 2, "body was buffered into {} piece(s)", pieces.len());
}

#[tokio::test]
async fn test_first_matching_router_wins() {
    let upstream = start_upstream().await;
    let dead = closed_port().await;
    let api_only = RouterConfig {
        matching_rules: vec![MatchingRuleConfig {
            url_patterns: vec![r"http://[^/]+/api/".to_string()],
            ..MatchingRuleConfig::default()
        }],
        ..to_upstream(upstream)
    };
    let proxy = Proxy::start(vec![api_only, to_upstream(dead)], Settings::default()).await;

    let resp = client().get(proxy.url("/api/v1")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client().get(proxy.url("/web/index")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_no_route_is_404() {
    let upstream = start_upstream().await;
    let router = RouterConfig {
        matching_rules: vec![MatchingRuleConfig {
            url_patterns: vec!["https://never/".to_string()],
            ..MatchingRuleConfig::default()
        }],
        ..to_upstream(upstream)
    };
    let proxy = Proxy::start(vec![router], Settings::default()).await;

    let resp = client().get(proxy.url("/x")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = json(resp).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .ends_with("is not matching any route patterns"));
}

#[tokio::test]
async fn test_required_headers_enforced() {
    let upstream = start_upstream().await;
    let router = RouterConfig {
        required_headers: [("x-api-key".to_string(), "^k-".to_string())].into(),
        ..to_upstream(upstream)
    };
    let proxy = Proxy::start(vec![router], Settings::default()).await;

    let resp = client().get(proxy.url("/a")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(resp).await["detail"], "One of the required headers is missing");

    let resp = client()
        .get(proxy.url("/a"))
        .header("x-api-key", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client()
        .get(proxy.url("/a"))
        .header("x-api-key", "k-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_hidden_errors() {
    let dead = closed_port().await;
    let settings = Settings {
        hide_error_message: true,
        ..Settings::default()
    };
    let proxy = Proxy::start(vec![to_upstream(dead)], settings).await;

    let resp = client().get(proxy.url("/a")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(resp).await["detail"], "Bad request");
}

#[tokio::test]
async fn test_upstream_timeout_is_504() {
    let upstream = start_upstream().await;
    let mut settings = Settings::default();
    settings.upstream.response_timeout_secs = 0.2;
    let proxy = Proxy::start(vec![to_upstream(upstream)], settings).await;

    let resp = client().get(proxy.url("/slow")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json(resp).await["detail"], "Upstream timeout");
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let upstream = start_upstream().await;
    let proxy = Proxy::start(vec![to_upstream(upstream)], Settings::default()).await;

    let ping = proxy.url("/ping");
    let resp = client().get(&ping).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    drop(resp);

    proxy.shutdown.notify_one();
    let result = tokio::time::timeout(Duration::from_secs(5), proxy.handle)
        .await
        .expect("proxy did not drain in time")
        .unwrap();
    assert!(result.is_ok());

    assert!(client().get(&ping).send().await.is_err());
}
