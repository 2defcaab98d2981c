use std::path::PathBuf;

/// Runtime settings, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// `BACKEND_ADDR`
    pub addr: String,
    /// `API_KEY`, checked against the `X-API-KEY` header on protected routes.
    pub api_key: String,
    /// `DATA_DIR`, holding the SQLite file and the oracle key.
    pub data_dir: PathBuf,
    /// `DB_MAX_CONNECTIONS`
    pub db_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            // In production, this should be a strong secret from environment.
            api_key: "dev-secret-key".to_string(),
            data_dir: PathBuf::from("data"),
            db_max_connections: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            addr: lookup("BACKEND_ADDR").unwrap_or(defaults.addr),
            api_key: lookup("API_KEY").unwrap_or(defaults.api_key),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.db_max_connections),
        }
    }

    pub fn db_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.data_dir.join("ledger.sqlite").to_string_lossy())
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.addr, "127.0.0.1:8080");
        assert_eq!(config.api_key, "dev-secret-key");
        assert_eq!(config.db_max_connections, 5);
    }

    #[test]
    fn variables_override_and_bad_numbers_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("BACKEND_ADDR", "0.0.0.0:9000"),
            ("DATA_DIR", "/var/lib/ledger"),
            ("DB_MAX_CONNECTIONS", "zero"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ledger"));
        assert_eq!(config.db_max_connections, 5);
        assert!(config.db_url().ends_with("ledger.sqlite?mode=rwc"));
    }
}
