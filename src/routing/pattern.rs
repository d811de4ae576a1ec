use anyhow::{Context, Result};
use regex::Regex;

/// The literal that stands for "match anything".
pub const WILDCARD: &str = "*";

/// A compiled matcher, built once at configuration load.
#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    Regex {
        /// Text as written in the config, kept for export.
        raw: String,
        /// `raw` anchored at the start of the subject.
        regex: Regex,
    },
}

impl Pattern {
    /// `*` becomes the wildcard and never reaches the regex compiler.
    /// Anything else is a regex that must match from the start of the value
    /// (it may stop short of the end).
    pub fn compile(raw: &str) -> Result<Self> {
        if raw == WILDCARD {
            return Ok(Pattern::Wildcard);
        }
        let regex = Regex::new(&format!(r"\A(?:{raw})"))
            .with_context(|| format!("invalid regex pattern '{raw}'"))?;
        Ok(Pattern::Regex {
            raw: raw.to_string(),
            regex,
        })
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Pattern::Wildcard)
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Wildcard => true,
            Pattern::Regex { regex, .. } => regex.is_match(value),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Wildcard => WILDCARD,
            Pattern::Regex { raw, .. } => raw,
        }
    }
}

/// Compile each string once, preserving order.
pub fn compile_patterns<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Pattern>> {
    raw.iter().map(|p| Pattern::compile(p.as_ref())).collect()
}
