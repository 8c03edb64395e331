use std::{env, path::PathBuf, str::FromStr};

use thiserror::Error;

/// Largest media file accepted with a post, in bytes.
pub const MAX_UPLOAD_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub session_ttl_secs: i64,
    /// Public origin, `https://{DOMAIN}` when a domain is configured.
    pub origin: String,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_or("PORT", 8080u16)?;

        let domain = env::var("DOMAIN").ok().filter(|x| !x.is_empty());

        let origin = match &domain {
            Some(domain) => format!("https://{domain}"),
            None => format!("http://localhost:{port}"),
        };

        let secure_cookies = parse_or("COOKIE_SECURE", domain.is_some())?;

        let session_ttl_secs = parse_or("SESSION_TTL_SECS", 60 * 60 * 24i64)?;

        if session_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                value: session_ttl_secs.to_string(),
            });
        }

        Ok(Config {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://social.db?mode=rwc".into()),
            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "static/uploads".into())
                .into(),
            session_ttl_secs,
            origin,
            secure_cookies,
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own key so parallel tests do not race on the environment.

    #[test]
    fn missing_key_uses_default() {
        assert_eq!(parse_or("SOCIAL_FEED_TEST_MISSING", 42u16).unwrap(), 42);
    }

    #[test]
    fn invalid_value_names_the_key() {
        env::set_var("SOCIAL_FEED_TEST_PORT", "eighty");

        let err = parse_or("SOCIAL_FEED_TEST_PORT", 80u16).unwrap_err();

        assert_eq!(err.to_string(), "SOCIAL_FEED_TEST_PORT: invalid value \"eighty\"");
    }

    #[test]
    fn bool_values_parse() {
        env::set_var("SOCIAL_FEED_TEST_SECURE", "true");

        assert!(parse_or("SOCIAL_FEED_TEST_SECURE", false).unwrap());
    }

    // The only test that touches the real keys, so nothing races it.
    #[test]
    fn from_env_derives_origin_and_cookie_security() {
        for key in ["PORT", "DOMAIN", "COOKIE_SECURE", "SESSION_TTL_SECS"] {
            env::remove_var(key);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.origin, "http://localhost:8080");
        assert!(!config.secure_cookies);
        assert_eq!(config.session_ttl_secs, 86400);

        env::set_var("DOMAIN", "feed.example.com");
        let config = Config::from_env().unwrap();
        assert_eq!(config.origin, "https://feed.example.com");
        assert!(config.secure_cookies);

        env::set_var("COOKIE_SECURE", "false");
        assert!(!Config::from_env().unwrap().secure_cookies);

        env::remove_var("DOMAIN");
        env::set_var("COOKIE_SECURE", "true");
        assert!(Config::from_env().unwrap().secure_cookies);
        env::remove_var("COOKIE_SECURE");

        for ttl in ["0", "-5"] {
            env::set_var("SESSION_TTL_SECS", ttl);
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().starts_with("SESSION_TTL_SECS"), "{err}");
        }
        env::remove_var("SESSION_TTL_SECS");
    }
}
