//! Runtime configuration read from environment variables
//!
//! `.env` files are loaded by the binary (via `dotenvy`) before
//! [`Config::from_env`] runs, so both sources are honored.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - DSN of the database (default: "sqlite:data.db")
//! - `DB_USER` / `DB_PASS` - Credentials, unused by SQLite
//! - `DB_PREFIX` - Table name prefix (default: "yourls_")
//! - `ABSPATH` - Application root (default: ".")
//! - `USERDIR` - User directory with plugins and pages (default: "$ABSPATH/user")
//! - `FAST_INIT` - Stop bootstrap right after the database is up (default: false)
//! - `BOOTSTRAP_POLICY` - JSON object overriding bootstrap steps,
//!   e.g. `{"check_new_version": false}`

use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::bootstrap::BootstrapPolicy;
use crate::database::DEFAULT_PREFIX;
use crate::driver::Credentials;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_user: Option<String>,
    pub db_pass: Option<String>,
    pub db_prefix: String,
    pub abspath: PathBuf,
    pub userdir: PathBuf,
    pub fast_init: bool,
    pub policy: BootstrapPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, missing keys take
    /// their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let abspath = PathBuf::from(lookup("ABSPATH").unwrap_or_else(|| ".".to_string()));
        let userdir = lookup("USERDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| abspath.join("user"));

        let fast_init = lookup("FAST_INIT")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let policy = match lookup("BOOTSTRAP_POLICY") {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "invalid BOOTSTRAP_POLICY, using defaults");
                BootstrapPolicy::default()
            }),
            None => BootstrapPolicy::default(),
        };

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:data.db".to_string()),
            db_user: lookup("DB_USER"),
            db_pass: lookup("DB_PASS"),
            db_prefix: lookup("DB_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            abspath,
            userdir,
            fast_init,
            policy,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            dsn: self.database_url.clone(),
            user: self.db_user.clone(),
            password: self.db_pass.clone(),
        }
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.userdir.join("plugins")
    }

    /// Presence of this file puts the site in maintenance mode
    pub fn maintenance_file(&self) -> PathBuf {
        self.abspath.join(".maintenance")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::Step;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.database_url, "sqlite:data.db");
        assert_eq!(cfg.db_prefix, "yourls_");
        assert_eq!(cfg.userdir, PathBuf::from("./user"));
        assert_eq!(cfg.plugin_dir(), PathBuf::from("./user/plugins"));
        assert!(!cfg.fast_init);
        assert_eq!(cfg.policy, BootstrapPolicy::default());
        assert_eq!(cfg.credentials().user, None);
    }

    #[test]
    fn test_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("DB_PREFIX", "s_"),
            ("ABSPATH", "/srv/short"),
            ("FAST_INIT", "True"),
            ("BOOTSTRAP_POLICY", r#"{"check_new_version": false, "redirect_ssl": false}"#),
        ]));
        assert_eq!(cfg.credentials().dsn, "sqlite::memory:");
        assert_eq!(cfg.db_prefix, "s_");
        assert_eq!(cfg.userdir, PathBuf::from("/srv/short/user"));
        assert_eq!(cfg.maintenance_file(), PathBuf::from("/srv/short/.maintenance"));
        assert!(cfg.fast_init);
        assert!(!cfg.policy.enabled(Step::CheckNewVersion));
        assert!(!cfg.policy.enabled(Step::RedirectSsl));
        assert!(cfg.policy.enabled(Step::IncludeDb));
    }

    #[test]
    fn test_invalid_policy_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("BOOTSTRAP_POLICY", "not json")]));
        assert_eq!(cfg.policy, BootstrapPolicy::default());
    }
}
