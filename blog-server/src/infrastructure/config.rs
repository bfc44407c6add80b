use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    pub storage_dir: PathBuf,
    /// Prefix of the URLs handed out for stored objects.
    pub public_base_url: String,
    pub token_ttl_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".into());
        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .map_err(|e| anyhow!("invalid PORT: {}", e))?;
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|| "20".into())
            .parse()
            .map_err(|e| anyhow!("invalid DB_MAX_CONNECTIONS: {}", e))?;
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() {
            return Err(anyhow!("JWT_SECRET must not be empty"));
        }
        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let storage_dir = PathBuf::from(lookup("STORAGE_DIR").unwrap_or_else(|| "./storage".into()));
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();
        let token_ttl_secs = lookup("TOKEN_TTL_SECS")
            .unwrap_or_else(|| "3600".into())
            .parse()
            .map_err(|e| anyhow!("invalid TOKEN_TTL_SECS: {}", e))?;
        if token_ttl_secs <= 0 {
            return Err(anyhow!("TOKEN_TTL_SECS must be positive"));
        }

        Ok(Self {
            host,
            port,
            database_url,
            db_max_connections,
            jwt_secret,
            cors_origins,
            storage_dir,
            public_base_url,
            token_ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/blog"),
        ("JWT_SECRET", "s3cret"),
    ];

    #[test]
    fn defaults_fill_optional_settings() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.storage_dir, PathBuf::from("./storage"));
        assert_eq!(config.public_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.token_ttl_secs, 3600);
    }

    #[test]
    fn explicit_values_win() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "9000"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("PUBLIC_BASE_URL", "https://blog.test/"),
            ("TOKEN_TTL_SECS", "60"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.public_base_url, "https://blog.test");
        assert_eq!(config.token_ttl_secs, 60);
    }

    #[test]
    fn missing_or_invalid_settings_fail() {
        assert!(AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x")])).is_err());
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TOKEN_TTL_SECS", "0"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }
}
