//! Runtime configuration from environment variables (and `.env`)

use crate::error::{Result, SketchError};
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_TEMPLATES_PATH: &str = "templates.json";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub templates_path: PathBuf,
    pub database_url: Option<String>,
    pub bind: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("templates_path", &self.templates_path)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("bind", &self.bind)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: get("SKETCHER_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            embedding_model: get("SKETCHER_EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            templates_path: get("SKETCHER_TEMPLATES")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_PATH)),
            database_url: get("DATABASE_URL"),
            bind: get("SKETCHER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SketchError::Config("OPENAI_API_KEY is not set".to_string()))
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| SketchError::Config("DATABASE_URL is not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.templates_path, PathBuf::from("templates.json"));
        assert!(matches!(config.require_api_key(), Err(SketchError::Config(_))));
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("SKETCHER_CHAT_MODEL", "gpt-4o-mini"),
            ("DATABASE_URL", "sqlite://spider.db"),
            ("SKETCHER_BIND", "   "),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.require_database_url().unwrap(), "sqlite://spider.db");
        assert_eq!(config.bind, DEFAULT_BIND);
        assert!(!format!("{:?}", config).contains("sk-test"));
    }
}
