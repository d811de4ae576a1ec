use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::proxy::InboundRequest;
use crate::routing::router::Router;
use anyhow::{Context, Result};
use tracing::debug;

/// Ordered routers; declaration order is precedence.
#[derive(Debug)]
pub struct RoutingTable {
    routers: Vec<Router>,
}

impl RoutingTable {
    /// Compile every pattern once. Any bad regex, header name or target host
    /// fails the whole table.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let routers = config
            .routers
            .iter()
            .enumerate()
            .map(|(idx, r)| Router::compile(r).with_context(|| format!("router #{idx}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { routers })
    }

    /// The first router with a matching rule. Later routers are never consulted
    /// once one matches.
    pub fn select(&self, req: &InboundRequest) -> Result<(usize, &Router), ProxyError> {
        for (idx, router) in self.routers.iter().enumerate() {
            if let Some(rule) = router.matching_rule_index(req) {
                debug!("routing: matched, router={}, rule={}, url={}", idx, rule, req.url);
                return Ok((idx, router));
            }
        }
        Err(ProxyError::NoRouteMatched {
            url: req.url.to_string(),
        })
    }

    pub fn to_config(&self) -> ProxyConfig {
        ProxyConfig {
            routers: self.routers.iter().map(Router::to_config).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}
