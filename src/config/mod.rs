pub mod settings;
pub mod types;


pub use settings::{Settings, UpstreamSettings};
pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

impl ProxyConfig {
    /// Load the routing document from a file. The format is picked from the
    /// extension; unknown fields anywhere in the document are rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read routing config {}", path.display()))?;
        let config = Self::parse(&content, path.extension().and_then(|e| e.to_str()))
            .with_context(|| format!("invalid routing config {}", path.display()))?;

        config.validate()?;
        tracing::info!(
            routers = config.routers.len(),
            rules = config.total_rule_count(),
            path = %path.display(),
            "loaded routing configuration"
        );
        Ok(config)
    }

    pub fn parse(content: &str, extension: Option<&str>) -> Result<Self> {
        let config: ProxyConfig = match extension {
            Some("yaml") | Some("yml") => serde_yaml::from_str(content)?,
            Some("toml") => toml::from_str(content)?,
            Some("json") => serde_json::from_str(content)?,
            Some(ext) => {
                anyhow::bail!("unsupported config format: .{ext}, use .yaml, .toml or .json")
            }
            None => anyhow::bail!("config file has no extension, use .yaml, .toml or .json"),
        };
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.routers.is_empty() {
            anyhow::bail!("routing config defines no routers");
        }
        for (idx, router) in self.routers.iter().enumerate() {
            if router.matching_rules.is_empty() {
                anyhow::bail!("router #{} has no matching_rules", idx);
            }
            if let Some(ref host) = router.replace_target_host {
                if host.trim().is_empty() {
                    anyhow::bail!("router #{} has an empty replace_target_host", idx);
                }
            }
        }
        Ok(())
    }

    /// Rule count across all routers.
    pub fn total_rule_count(&self) -> usize {
        self.routers.iter().map(|r| r.matching_rules.len()).sum()
    }
}
