use crate::config::RouterConfig;
use crate::error::ProxyError;
use crate::proxy::context::explicit_port;
use crate::proxy::{BoxBody, ForwardingEngine, InboundRequest};
use crate::routing::matcher::{HeaderRequirement, MatchingRule};
use anyhow::{Context, Result};
use hyper::Response;
use tracing::{debug, info};
use url::Url;

/// A compiled router, the runtime counterpart of `RouterConfig`.
///
/// Three concerns: which requests it takes (`matching_rules`), which of those
/// it accepts (`required_headers`) and where it sends them (url rewrite).
#[derive(Debug)]
pub struct Router {
    matching_rules: Vec<MatchingRule>,
    replace_target_host: Option<TargetHost>,
    force_https: bool,
    request_path_has_full_path: bool,
    required_headers: HeaderRequirement,
}

/// `replace_target_host`, normalized and parsed once at load.
#[derive(Debug, Clone)]
struct TargetHost {
    raw: String,
    url: Url,
    /// Port as written; `url` drops it when it equals the scheme default.
    port: Option<u16>,
}

impl TargetHost {
    fn parse(raw: &str) -> Result<Self> {
        let normalized = with_default_scheme(raw.trim());
        let url = Url::parse(&normalized)
            .with_context(|| format!("invalid replace_target_host '{raw}'"))?;
        match url.host_str() {
            Some(h) if !h.is_empty() => {}
            _ => anyhow::bail!("replace_target_host '{raw}' has no host"),
        }
        Ok(Self {
            raw: raw.to_string(),
            port: explicit_port(&normalized),
            url,
        })
    }
}

impl Router {
    pub fn compile(config: &RouterConfig) -> Result<Self> {
        if config.matching_rules.is_empty() {
            anyhow::bail!("router has no matching_rules");
        }
        let matching_rules = config
            .matching_rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                MatchingRule::compile(rule).with_context(|| format!("matching rule #{idx}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let replace_target_host = config
            .replace_target_host
            .as_deref()
            .map(TargetHost::parse)
            .transpose()?;
        if let Some(ref target) = replace_target_host {
            // Without force_https the override scheme is used as is, and only
            // http(s) can be forwarded.
            let scheme = target.url.scheme();
            if !config.force_https && scheme != "http" && scheme != "https" {
                anyhow::bail!(
                    "replace_target_host '{}' has scheme '{}', use http or https or enable force_https",
                    target.raw,
                    scheme
                );
            }
        }
        let required_headers =
            HeaderRequirement::compile(&config.required_headers).context("required_headers")?;

        Ok(Self {
            matching_rules,
            replace_target_host,
            force_https: config.force_https,
            request_path_has_full_path: config.request_path_has_full_path,
            required_headers,
        })
    }

    /// First rule in declaration order that matches, if any.
    pub fn matching_rule_index(&self, req: &InboundRequest) -> Option<usize> {
        self.matching_rules.iter().position(|r| r.is_matching(req))
    }

    /// Validate, rewrite, forward. Nothing touches the network unless the
    /// first two steps succeed.
    pub async fn route(
        &self,
        req: InboundRequest,
        engine: &ForwardingEngine,
    ) -> Result<Response<BoxBody>, ProxyError> {
        info!("router: processing request, method={}, url={}", req.method, req.url);
        self.validate_request(&req)?;
        let url = self.prepare_url(&req)?;
        debug!("router: rewritten, from={}, to={}", req.url, url);
        engine.forward(url, req).await
    }

    pub fn validate_request(&self, req: &InboundRequest) -> Result<(), ProxyError> {
        self.required_headers.validate(&req.headers)
    }

    /// Outbound url for `req`. Each step may overwrite the previous one:
    ///
    /// 1. base: the captured path (scheme defaulted to https) or the request url
    /// 2. `replace_target_host`: its scheme, then host and port (port cleared
    ///    when the override has none)
    /// 3. `force_https`, which changes the scheme only; the port in effect
    ///    is kept even when it was the old scheme's default
    /// 4. reject when no host is left, then restore the port as written
    pub fn prepare_url(&self, req: &InboundRequest) -> Result<Url, ProxyError> {
        let (mut url, mut port) = if self.request_path_has_full_path {
            let target = with_default_scheme(&req.path);
            let mut url = Url::parse(&target).map_err(|e| match e {
                url::ParseError::EmptyHost => ProxyError::InvalidUrl {
                    url: target.clone(),
                },
                e => ProxyError::MalformedUrl {
                    url: target.clone(),
                    reason: e.to_string(),
                },
            })?;
            if url.query().is_none() {
                url.set_query(req.query());
            }
            let port = explicit_port(&target);
            (url, port)
        } else {
            (req.url.clone(), req.port)
        };

        if let Some(ref target) = self.replace_target_host {
            // Step 3 overwrites the scheme anyway.
            if !self.force_https {
                switch_scheme(&mut url, target.url.scheme())?;
            }
            if url.set_host(target.url.host_str()).is_err() {
                return Err(malformed(&url, "cannot replace host"));
            }
            port = target.port;
            // The override replaces the whole netloc, credentials included.
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }

        if self.force_https {
            switch_scheme(&mut url, "https")?;
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => {
                return Err(ProxyError::InvalidUrl {
                    url: url.to_string(),
                })
            }
        }
        if url.set_port(port).is_err() {
            return Err(malformed(&url, "cannot set port"));
        }
        Ok(url)
    }

    pub fn to_config(&self) -> RouterConfig {
        RouterConfig {
            matching_rules: self.matching_rules.iter().map(MatchingRule::to_config).collect(),
            replace_target_host: self.replace_target_host.as_ref().map(|t| t.raw.clone()),
            force_https: self.force_https,
            request_path_has_full_path: self.request_path_has_full_path,
            required_headers: self.required_headers.to_config(),
        }
    }
}

fn switch_scheme(url: &mut Url, scheme: &str) -> Result<(), ProxyError> {
    if url.scheme() == scheme {
        return Ok(());
    }
    let from = url.scheme().to_string();
    url.set_scheme(scheme)
        .map_err(|_| malformed(url, &format!("cannot switch scheme from '{from}' to '{scheme}'")))
}

fn malformed(url: &Url, reason: &str) -> ProxyError {
    ProxyError::MalformedUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Prefix `https://` unless `raw` already starts with `<scheme>://`.
fn with_default_scheme(raw: &str) -> String {
    if has_scheme(raw) {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

fn has_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
