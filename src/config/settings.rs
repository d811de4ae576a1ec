use std::path::PathBuf;
use std::time::Duration;

/// Process-level settings.
///
/// Built from defaults, then environment variables, then CLI flags (applied
/// by `main`). Routing rules do not live here, they come from the routing
/// document at `routing_config_path`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub routing_config_path: PathBuf,
    pub listen: String,
    /// Replace every error status/detail with a generic 400.
    pub hide_error_message: bool,
    pub log_all_headers: bool,
    /// Host allowlist. `*` allows any host, `*.example.com` allows subdomains.
    pub allowed_hosts: Vec<String>,
    pub upstream: UpstreamSettings,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub connect_timeout_secs: f64,
    /// Upper bound for receiving the upstream status line and headers.
    pub response_timeout_secs: f64,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub max_redirects: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            routing_config_path: PathBuf::from("routing.yaml"),
            listen: "0.0.0.0:8000".to_string(),
            hide_error_message: false,
            log_all_headers: false,
            allowed_hosts: vec!["*".to_string()],
            upstream: UpstreamSettings::default(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10.0,
            response_timeout_secs: 60.0,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
            max_redirects: 10,
        }
    }
}

impl UpstreamSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Settings {
    /// Defaults with `RULEGATE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Apply overrides from a key lookup. Unparsable values keep the current value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RULEGATE_ROUTING_CONFIG_PATH") {
            self.routing_config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RULEGATE_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("RULEGATE_HIDE_ERROR_MESSAGE") {
            self.hide_error_message = parse_bool(&v);
        }
        if let Some(v) = lookup("RULEGATE_LOG_ALL_HEADERS") {
            self.log_all_headers = parse_bool(&v);
        }
        if let Some(v) = lookup("RULEGATE_ALLOWED_HOSTS") {
            let hosts: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !hosts.is_empty() {
                self.allowed_hosts = hosts;
            }
        }

        // Upstream client
        if let Some(n) = lookup("RULEGATE_UPSTREAM_CONNECT_TIMEOUT").and_then(|v| parse_secs(&v)) {
            self.upstream.connect_timeout_secs = n;
        }
        if let Some(n) = lookup("RULEGATE_UPSTREAM_RESPONSE_TIMEOUT").and_then(|v| parse_secs(&v)) {
            self.upstream.response_timeout_secs = n;
        }
        if let Some(n) = lookup("RULEGATE_UPSTREAM_POOL_IDLE_TIMEOUT").and_then(|v| v.parse().ok())
        {
            self.upstream.pool_idle_timeout_secs = n;
        }
        if let Some(n) = lookup("RULEGATE_UPSTREAM_POOL_SIZE").and_then(|v| v.parse().ok()) {
            self.upstream.pool_max_idle_per_host = n;
        }
        if let Some(n) = lookup("RULEGATE_UPSTREAM_MAX_REDIRECTS").and_then(|v| v.parse().ok()) {
            self.upstream.max_redirects = n;
        }
    }

    /// Whether `host` (port already stripped) passes the allowlist.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|pattern| host_matches(host, pattern))
    }
}

/// Finite, positive seconds; anything else keeps the current value.
fn parse_secs(v: &str) -> Option<f64> {
    v.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
}

fn parse_bool(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}

/// Supported patterns:
/// - `*`: any host
/// - `*.example.com`: any subdomain of example.com
/// - `api.example.com`: exact match (case-insensitive)
fn host_matches(req_host: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        req_host.len() > suffix.len()
            && req_host[req_host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    } else {
        req_host.eq_ignore_ascii_case(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.routing_config_path, PathBuf::from("routing.yaml"));
        assert!(!s.hide_error_message);
        assert!(!s.log_all_headers);
        assert_eq!(s.allowed_hosts, vec!["*".to_string()]);
        assert_eq!(s.upstream.max_redirects, 10);
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_overrides(lookup_from(&[
            ("RULEGATE_ROUTING_CONFIG_PATH", "/etc/rulegate/routes.toml"),
            ("RULEGATE_LISTEN", "127.0.0.1:9000"),
            ("RULEGATE_HIDE_ERROR_MESSAGE", "1"),
            ("RULEGATE_LOG_ALL_HEADERS", "TRUE"),
            ("RULEGATE_ALLOWED_HOSTS", "a.com, *.b.com ,"),
            ("RULEGATE_UPSTREAM_RESPONSE_TIMEOUT", "2.5"),
            ("RULEGATE_UPSTREAM_MAX_REDIRECTS", "3"),
        ]));
        assert_eq!(
            s.routing_config_path,
            PathBuf::from("/etc/rulegate/routes.toml")
        );
        assert_eq!(s.listen, "127.0.0.1:9000");
        assert!(s.hide_error_message);
        assert!(s.log_all_headers);
        assert_eq!(s.allowed_hosts, vec!["a.com", "*.b.com"]);
        assert_eq!(s.upstream.response_timeout(), Duration::from_millis(2500));
        assert_eq!(s.upstream.max_redirects, 3);
    }

    #[test]
    fn test_unparsable_number_keeps_default() {
        let mut s = Settings::default();
        s.apply_overrides(lookup_from(&[("RULEGATE_UPSTREAM_POOL_SIZE", "lots")]));
        assert_eq!(s.upstream.pool_max_idle_per_host, 32);

        s.apply_overrides(lookup_from(&[
            ("RULEGATE_UPSTREAM_CONNECT_TIMEOUT", "-1"),
            ("RULEGATE_UPSTREAM_RESPONSE_TIMEOUT", "NaN"),
        ]));
        assert_eq!(s.upstream.connect_timeout(), Duration::from_secs(10));
        assert_eq!(s.upstream.response_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_host_allowlist() {
        let s = Settings {
            allowed_hosts: vec!["api.example.com".to_string(), "*.internal".to_string()],
            ..Settings::default()
        };
        assert!(s.is_host_allowed("api.example.com"));
        assert!(s.is_host_allowed("API.Example.com"));
        assert!(s.is_host_allowed("svc.internal"));
        assert!(!s.is_host_allowed("internal"));
        assert!(!s.is_host_allowed("other.example.com"));

        assert!(Settings::default().is_host_allowed("anything.at.all"));
    }
}
