use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_DOCUMENT_CHARS: usize = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chatgpt_api_key: String,
    /// Bot is disabled when absent.
    pub telegram_token: Option<String>,
    pub http_addr: SocketAddr,
    pub model: String,
    /// SQLite file for dialogue state; in-memory when absent.
    pub dialogue_db: Option<String>,
    pub generation_timeout: Duration,
    pub max_document_chars: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let chatgpt_api_key =
            var("CHATGPT_API_KEY").ok_or(ConfigError::Missing("CHATGPT_API_KEY"))?;

        Ok(Self {
            chatgpt_api_key,
            telegram_token: var("TELOXIDE_TOKEN"),
            http_addr: parse_or(var("QUIZ_HTTP_ADDR"), "QUIZ_HTTP_ADDR", || {
                SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT))
            })?,
            model: var("QUIZ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dialogue_db: var("QUIZ_DIALOGUE_DB"),
            generation_timeout: Duration::from_secs(parse_or(
                var("QUIZ_GENERATION_TIMEOUT_SECS"),
                "QUIZ_GENERATION_TIMEOUT_SECS",
                || DEFAULT_GENERATION_TIMEOUT_SECS,
            )?),
            max_document_chars: parse_or(
                var("QUIZ_MAX_DOCUMENT_CHARS"),
                "QUIZ_MAX_DOCUMENT_CHARS",
                || DEFAULT_MAX_DOCUMENT_CHARS,
            )?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("CHATGPT_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.chatgpt_api_key, "sk-test");
        assert_eq!(config.telegram_token, None);
        assert_eq!(config.http_addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.dialogue_db, None);
        assert_eq!(config.generation_timeout, Duration::from_secs(300));
        assert_eq!(config.max_document_chars, 60_000);
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing("CHATGPT_API_KEY"))
        ));
        assert!(matches!(
            config(&[("CHATGPT_API_KEY", "  ")]),
            Err(ConfigError::Missing("CHATGPT_API_KEY"))
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("CHATGPT_API_KEY", "sk-test"),
            ("TELOXIDE_TOKEN", "123:abc"),
            ("QUIZ_HTTP_ADDR", "127.0.0.1:8080"),
            ("QUIZ_MODEL", "gpt-4o-mini"),
            ("QUIZ_DIALOGUE_DB", "db.sqlite"),
            ("QUIZ_GENERATION_TIMEOUT_SECS", "120"),
        ])
        .unwrap();
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.dialogue_db.as_deref(), Some("db.sqlite"));
        assert_eq!(config.generation_timeout, Duration::from_secs(120));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = config(&[
            ("CHATGPT_API_KEY", "sk-test"),
            ("QUIZ_MAX_DOCUMENT_CHARS", "lots"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "QUIZ_MAX_DOCUMENT_CHARS has an invalid value \"lots\""
        );
    }
}
