use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as URL: {source}")]
    ParseUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },
}

const DEFAULT_SITE_URL: &str = "http://localhost:8000";

/// Forum configuration loaded from environment variables.
///
/// Passed explicitly to the engine and the notice dispatcher; nothing in the
/// crate reads process-wide settings on its own.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Paging
    pub posts_per_page: usize,
    pub topics_per_page: usize,
    pub followed_topics_per_page: usize,

    // Antispam
    pub spam_limit: Duration,

    // Site identity
    pub site_url: Url,
    pub site_name: String,
    pub email_noreply: String,
    pub bot_account: String,

    // Search
    pub suggestion_limit: usize,

    // Notices
    pub mail_relay_url: Option<Url>,
    pub mail_relay_token: Option<String>,
    pub notice_poll_interval: Duration,
    pub notice_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/forum.sqlite"),
            posts_per_page: 21,
            topics_per_page: 21,
            followed_topics_per_page: 21,
            spam_limit: Duration::from_secs(900),
            site_url: Url::parse(DEFAULT_SITE_URL).expect("default site URL is valid"),
            site_name: "Forum".to_string(),
            email_noreply: "noreply@localhost".to_string(),
            bot_account: "admin".to_string(),
            suggestion_limit: 5,
            mail_relay_url: None,
            mail_relay_token: None,
            notice_poll_interval: Duration::from_secs(10),
            notice_max_attempts: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or empty variables fall back to [`Config::default`].
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            // Database
            database_path: optional_env("DATABASE_PATH")
                .map_or(defaults.database_path, PathBuf::from),

            // Paging
            posts_per_page: parse_env_usize("POSTS_PER_PAGE", defaults.posts_per_page)?,
            topics_per_page: parse_env_usize("TOPICS_PER_PAGE", defaults.topics_per_page)?,
            followed_topics_per_page: parse_env_usize(
                "FOLLOWED_TOPICS_PER_PAGE",
                defaults.followed_topics_per_page,
            )?,

            // Antispam
            spam_limit: Duration::from_secs(parse_env_u64(
                "SPAM_LIMIT_SECS",
                defaults.spam_limit.as_secs(),
            )?),

            // Site identity
            site_url: parse_env_url("SITE_URL")?.unwrap_or(defaults.site_url),
            site_name: env_or_default("SITE_NAME", &defaults.site_name),
            email_noreply: env_or_default("EMAIL_NOREPLY", &defaults.email_noreply),
            bot_account: env_or_default("BOT_ACCOUNT", &defaults.bot_account),

            // Search
            suggestion_limit: parse_env_usize("SUGGESTION_LIMIT", defaults.suggestion_limit)?,

            // Notices
            mail_relay_url: parse_env_url("MAIL_RELAY_URL")?,
            mail_relay_token: optional_env("MAIL_RELAY_TOKEN"),
            notice_poll_interval: Duration::from_secs(parse_env_u64(
                "NOTICE_POLL_INTERVAL_SECS",
                defaults.notice_poll_interval.as_secs(),
            )?),
            notice_max_attempts: parse_env_u32(
                "NOTICE_MAX_ATTEMPTS",
                defaults.notice_max_attempts,
            )?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("POSTS_PER_PAGE", self.posts_per_page),
            ("TOPICS_PER_PAGE", self.topics_per_page),
            ("FOLLOWED_TOPICS_PER_PAGE", self.followed_topics_per_page),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.notice_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "NOTICE_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.bot_account.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BOT_ACCOUNT".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Site URL without a trailing slash, ready for path concatenation.
    #[must_use]
    pub fn site_root(&self) -> &str {
        self.site_url.as_str().trim_end_matches('/')
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(name) {
        Some(val) => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        None => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_env(name) {
        Some(val) => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        None => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match optional_env(name) {
        Some(val) => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        None => Ok(default),
    }
}

fn parse_env_url(name: &str) -> Result<Option<Url>, ConfigError> {
    optional_env(name)
        .map(|val| {
            Url::parse(&val).map_err(|e| ConfigError::ParseUrl {
                name: name.to_string(),
                source: e,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.posts_per_page, 21);
        assert_eq!(config.spam_limit, Duration::from_secs(900));
    }

    #[test]
    fn test_site_root_has_no_trailing_slash() {
        let config = Config::default();
        assert_eq!(config.site_root(), "http://localhost:8000");
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config = Config {
            posts_per_page: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "POSTS_PER_PAGE"
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("POSTS_PER_PAGE", "15");
        std::env::set_var("SITE_URL", "https://forum.example.org/");
        let config = Config::from_env().unwrap();
        std::env::remove_var("POSTS_PER_PAGE");
        std::env::remove_var("SITE_URL");

        assert_eq!(config.posts_per_page, 15);
        assert_eq!(config.site_root(), "https://forum.example.org");
        assert!(config.mail_relay_url.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_bad_integer() {
        std::env::set_var("SPAM_LIMIT_SECS", "soon");
        let result = Config::from_env();
        std::env::remove_var("SPAM_LIMIT_SECS");

        assert!(matches!(result, Err(ConfigError::ParseInt { .. })));
    }
}
