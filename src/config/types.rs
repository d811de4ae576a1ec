use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level routing document.
///
/// This is the draft form: plain strings exactly as written in the file.
/// `RoutingTable::from_config` compiles it into the runtime structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Evaluated in declaration order, first match wins.
    pub routers: Vec<RouterConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Required. A router matches when any of its rules matches.
    pub matching_rules: Vec<MatchingRuleConfig>,

    /// Replaces the host of the outgoing url. May carry a scheme and/or a port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_target_host: Option<String>,

    /// Always use https towards the upstream, even if http was requested.
    #[serde(default = "default_true")]
    pub force_https: bool,

    /// The request path carries the whole target (`www.example.com/resource`)
    /// rather than only the resource path.
    #[serde(default = "default_true")]
    pub request_path_has_full_path: bool,

    /// Header name -> regex. Every header must be present; `*` accepts any value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingRuleConfig {
    /// Regexes matched from the start of the full request url. `*` catches all.
    #[serde(default = "default_url_patterns")]
    pub url_patterns: Vec<String>,

    /// Header name -> regex, all must match (AND semantics).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header_patterns: BTreeMap<String, String>,
}

impl Default for MatchingRuleConfig {
    fn default() -> Self {
        Self {
            url_patterns: default_url_patterns(),
            header_patterns: BTreeMap::new(),
        }
    }
}

impl RouterConfig {
    /// A router with the given rules and every other field at its default.
    pub fn with_rules(matching_rules: Vec<MatchingRuleConfig>) -> Self {
        Self {
            matching_rules,
            replace_target_host: None,
            force_https: true,
            request_path_has_full_path: true,
            required_headers: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_url_patterns() -> Vec<String> {
    vec!["*".to_string()]
}
