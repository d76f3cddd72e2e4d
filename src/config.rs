use std::env;

use actix_web::cookie::Key;
use thiserror::Error;

/// actix's signing key needs at least this many bytes of material.
const MIN_SESSION_KEY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SESSION_KEY environment variable not set")]
    MissingSessionKey,
    #[error("SESSION_KEY must be at least 64 bytes long")]
    ShortSessionKey,
    #[error("APP_PORT must be a valid port number, got '{0}'")]
    InvalidPort(String),
    #[error("COOKIE_SECURE must be true or false, got '{0}'")]
    InvalidFlag(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub cookie_secure: bool,
    session_key: Vec<u8>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cookie_secure", &self.cookie_secure)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_key = lookup("SESSION_KEY").ok_or(ConfigError::MissingSessionKey)?;
        if session_key.len() < MIN_SESSION_KEY_LEN {
            return Err(ConfigError::ShortSessionKey);
        }

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://goclean.db".to_string());
        let host = lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match lookup("APP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 8080,
        };
        let cookie_secure = match lookup("COOKIE_SECURE") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(ConfigError::InvalidFlag(raw)),
            },
            None => false,
        };

        Ok(Self {
            database_url,
            host,
            port,
            cookie_secure,
            session_key: session_key.into_bytes(),
        })
    }

    pub fn session_key(&self) -> Key {
        Key::from(self.session_key.as_slice())
    }
}
