use crate::constants::*;
use std::env;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    pub data_path: String,
    pub session_secret: String,
    pub session_secure: bool,
    pub cors_origin: Option<String>,
    pub price_url: String,
    pub realtime_capacity: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SESSION_SECRET environment variable is required")]
    MissingSessionSecret,
    #[error("Invalid session secret: {0}")]
    InvalidSessionSecret(String),
    #[error("Invalid port number: {0}")]
    InvalidPort(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup so tests don't have to touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = lookup("SERVER_PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
        let data_path = lookup("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATA_PATH.to_string());

        // Validate port is a valid number
        if port.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidPort(port));
        }

        let session_secret = lookup("SESSION_SECRET").ok_or(ConfigError::MissingSessionSecret)?;
        if session_secret.len() < MIN_SESSION_SECRET_LENGTH {
            return Err(ConfigError::InvalidSessionSecret(format!(
                "must be at least {} bytes long",
                MIN_SESSION_SECRET_LENGTH
            )));
        }

        let session_secure = match lookup("SESSION_SECURE") {
            Some(v) => parse_bool("SESSION_SECURE", &v)?,
            None => false,
        };

        let cors_origin = lookup("CORS_ORIGIN").filter(|o| !o.trim().is_empty());
        let price_url = lookup("PRICE_URL").unwrap_or_else(|| DEFAULT_PRICE_URL.to_string());

        let realtime_capacity = match lookup("REALTIME_CAPACITY") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "REALTIME_CAPACITY",
                        value: v,
                    });
                }
            },
            None => DEFAULT_REALTIME_CAPACITY,
        };

        Ok(Config {
            host,
            port,
            data_path,
            session_secret,
            session_secure,
            cors_origin,
            price_url,
            realtime_capacity,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
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

    fn secret() -> String {
        "s".repeat(MIN_SESSION_SECRET_LENGTH)
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let secret = secret();
        let config = Config::from_lookup(lookup_from(&[("SESSION_SECRET", &secret)])).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.data_path, DEFAULT_DATA_PATH);
        assert_eq!(config.realtime_capacity, DEFAULT_REALTIME_CAPACITY);
        assert!(!config.session_secure);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSessionSecret));
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SESSION_SECRET", "short")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSessionSecret(_)));
    }

    #[test]
    fn bad_port_is_rejected() {
        let secret = secret();
        let err = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", &secret),
            ("SERVER_PORT", "http"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid port number: http");
    }

    #[test]
    fn optional_values_are_parsed() {
        let secret = secret();
        let config = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", &secret),
            ("SESSION_SECURE", "true"),
            ("CORS_ORIGIN", "http://localhost:5173"),
            ("REALTIME_CAPACITY", "16"),
        ]))
        .unwrap();

        assert!(config.session_secure);
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:5173"));
        assert_eq!(config.realtime_capacity, 16);
    }

    #[test]
    fn zero_realtime_capacity_is_rejected() {
        let secret = secret();
        let err = Config::from_lookup(lookup_from(&[
            ("SESSION_SECRET", &secret),
            ("REALTIME_CAPACITY", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
