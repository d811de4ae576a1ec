use crate::config::MatchingRuleConfig;
use crate::error::ProxyError;
use crate::proxy::InboundRequest;
use crate::routing::pattern::{compile_patterns, Pattern};
use anyhow::{Context, Result};
use http::{HeaderMap, HeaderName};
use std::collections::BTreeMap;

/// A selection predicate over an inbound request.
///
/// Matches when the headers match (every listed header present and matching)
/// AND the url matches (any url pattern matching).
#[derive(Debug, Clone)]
pub struct MatchingRule {
    url_patterns: Vec<Pattern>,
    header_patterns: Vec<(HeaderName, Pattern)>,
}

impl MatchingRule {
    pub fn compile(config: &MatchingRuleConfig) -> Result<Self> {
        let url_patterns =
            compile_patterns(config.url_patterns.as_slice()).context("url_patterns")?;
        let header_patterns =
            compile_header_patterns(&config.header_patterns).context("header_patterns")?;
        Ok(Self {
            url_patterns,
            header_patterns,
        })
    }

    pub fn is_matching(&self, req: &InboundRequest) -> bool {
        self.are_headers_matching(&req.headers) && self.is_url_matching(req.url.as_str())
    }

    fn are_headers_matching(&self, headers: &HeaderMap) -> bool {
        self.header_patterns.iter().all(|(name, pattern)| {
            match headers.get(name) {
                None => false,
                Some(value) => value.to_str().map_or(false, |v| pattern.matches(v)),
            }
        })
    }

    /// An empty pattern list matches nothing.
    fn is_url_matching(&self, url: &str) -> bool {
        if self.url_patterns.iter().any(Pattern::is_wildcard) {
            return true;
        }
        self.url_patterns.iter().any(|p| p.matches(url))
    }

    pub fn to_config(&self) -> MatchingRuleConfig {
        MatchingRuleConfig {
            url_patterns: self
                .url_patterns
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            header_patterns: export_header_patterns(&self.header_patterns),
        }
    }
}

/// The post-selection header gate of a router.
///
/// Unlike `MatchingRule`, a failure here rejects the request instead of
/// moving on to the next candidate.
#[derive(Debug, Clone, Default)]
pub struct HeaderRequirement {
    required: Vec<(HeaderName, Pattern)>,
}

impl HeaderRequirement {
    pub fn compile(raw: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            required: compile_header_patterns(raw)?,
        })
    }

    /// Presence of every header is checked before any value.
    pub fn validate(&self, headers: &HeaderMap) -> Result<(), ProxyError> {
        if self
            .required
            .iter()
            .any(|(name, _)| !headers.contains_key(name))
        {
            return Err(ProxyError::MissingHeader);
        }

        for (name, pattern) in &self.required {
            if pattern.is_wildcard() {
                continue;
            }
            let ok = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map_or(false, |v| pattern.matches(v));
            if !ok {
                return Err(ProxyError::IncorrectHeader {
                    name: name.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    pub fn to_config(&self) -> BTreeMap<String, String> {
        export_header_patterns(&self.required)
    }
}

fn compile_header_patterns(raw: &BTreeMap<String, String>) -> Result<Vec<(HeaderName, Pattern)>> {
    raw.iter()
        .map(|(name, pattern)| {
            let header = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let pattern = Pattern::compile(pattern)
                .with_context(|| format!("pattern for header '{name}'"))?;
            Ok((header, pattern))
        })
        .collect()
}

fn export_header_patterns(patterns: &[(HeaderName, Pattern)]) -> BTreeMap<String, String> {
    patterns
        .iter()
        .map(|(name, p)| (name.as_str().to_string(), p.as_str().to_string()))
        .collect()
}
