//! Adapter configuration
//!
//! Everything here is read once while the schema is built and then handed
//! down explicitly to the resolvers and connections that need it.

use std::env;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;

/// Adapter configuration, usually loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Request-context keys copied into `FindOptions::extra`, keyed by context key.
    ///
    /// Lets a caller-supplied value such as a tenant or locale reach the ORM
    /// without every resolver having to forward it by hand.
    pub context_to_options: IndexMap<String, String>,

    /// Ask for `COUNT(*) OVER()` alongside paginated rows when the dialect supports it
    pub window_count: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_to_options: IndexMap::new(),
            window_count: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let context_to_options = match env::var("GRAPHQL_ORM_CONTEXT_TO_OPTIONS") {
            Ok(raw) => parse_key_pairs(&raw).context("Invalid GRAPHQL_ORM_CONTEXT_TO_OPTIONS")?,
            Err(_) => IndexMap::new(),
        };

        Ok(Self {
            context_to_options,

            window_count: env::var("GRAPHQL_ORM_WINDOW_COUNT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }

    /// Map an additional context key onto a find-options key
    pub fn map_context(mut self, context_key: impl Into<String>, option_key: impl Into<String>) -> Self {
        self.context_to_options
            .insert(context_key.into(), option_key.into());
        self
    }
}

/// Parse `a=b,c=d` into an ordered map.
fn parse_key_pairs(raw: &str) -> Result<IndexMap<String, String>> {
    let mut pairs = IndexMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("expected `contextKey=optionKey`, got `{entry}`");
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            bail!("empty key in `{entry}`");
        }
        pairs.insert(key.to_string(), value.to_string());
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_pairs() {
        let pairs = parse_key_pairs("tenant=tenantId, locale = lang").unwrap();
        assert_eq!(pairs.get("tenant").map(String::as_str), Some("tenantId"));
        assert_eq!(pairs.get("locale").map(String::as_str), Some("lang"));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_parse_key_pairs_rejects_garbage() {
        assert!(parse_key_pairs("tenant").is_err());
        assert!(parse_key_pairs("=lang").is_err());
        assert!(parse_key_pairs("").unwrap().is_empty());
    }

    #[test]
    fn test_map_context() {
        let config = Config::default().map_context("tenant", "tenantId");
        assert!(config.window_count);
        assert_eq!(config.context_to_options["tenant"], "tenantId");
    }
}
