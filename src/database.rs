//! Table definitions and the options/keyword read-through helpers
//!
//! The storage handle only caches; these helpers are what fill the caches
//! from the database and write option changes back.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::driver::{Driver, SqlValue};
use crate::error::StorageError;
use crate::model::KeywordInfo;
use crate::storage::StorageHandle;

/// Prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "yourls_";

/// Schema version this code expects. An installed database reporting a
/// lower `db_version` option needs an upgrade.
pub const DB_VERSION: u64 = 505;

/// Name of the option holding the schema version
pub const DB_VERSION_OPTION: &str = "db_version";

/// Fully qualified table names for one installation
///
/// Example with the default prefix:
/// - `yourls_url` - one row per short URL, keyed by keyword
/// - `yourls_options` - name/value option pairs
/// - `yourls_log` - one row per click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub url: String,
    pub options: String,
    pub log: String,
}

impl Tables {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            url: format!("{prefix}url"),
            options: format!("{prefix}options"),
            log: format!("{prefix}log"),
        }
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }
}

/// Creates the three tables if they do not exist yet
pub fn create_tables<D: Driver>(
    db: &mut StorageHandle<D>,
    tables: &Tables,
) -> Result<(), StorageError> {
    db.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                keyword TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL,
                ip TEXT NOT NULL DEFAULT '',
                clicks INTEGER NOT NULL DEFAULT 0
            )",
            tables.url
        ),
        &[],
    )?;
    db.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                option_id INTEGER PRIMARY KEY AUTOINCREMENT,
                option_name TEXT NOT NULL UNIQUE,
                option_value TEXT NOT NULL
            )",
            tables.options
        ),
        &[],
    )?;
    db.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                click_id INTEGER PRIMARY KEY AUTOINCREMENT,
                click_time TEXT NOT NULL,
                shorturl TEXT NOT NULL,
                referrer TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                country_code TEXT NOT NULL DEFAULT ''
            )",
            tables.log
        ),
        &[],
    )?;
    Ok(())
}

/// Loads every stored option into the cache.
///
/// A readable options table means the application is installed. If the
/// query fails (typically because the table does not exist yet) the handle
/// is marked as not installed and the error is swallowed.
///
/// Returns the resulting installed state.
pub fn preload_options<D: Driver>(db: &mut StorageHandle<D>, tables: &Tables) -> bool {
    let sql = format!("SELECT option_name, option_value FROM {}", tables.options);
    match db.fetch_pairs(&sql, &[]) {
        Ok(pairs) => {
            let count = pairs.len();
            for (name, raw) in pairs {
                db.set_option(name, decode_option(raw));
            }
            db.set_installed(true);
            info!(count, "options preloaded");
            true
        }
        Err(e) => {
            warn!(error = %e, "options unavailable, treating as not installed");
            db.set_installed(false);
            false
        }
    }
}

/// Writes an option to the database and refreshes the cache entry
pub fn save_option<D: Driver>(
    db: &mut StorageHandle<D>,
    tables: &Tables,
    name: &str,
    value: Value,
) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT INTO {} (option_name, option_value) VALUES (?1, ?2)
         ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value",
        tables.options
    );
    db.execute(&sql, &[name.into(), encode_option(&value).into()])?;
    db.set_option(name, value);
    Ok(())
}

/// Removes an option from both the database and the cache
pub fn delete_stored_option<D: Driver>(
    db: &mut StorageHandle<D>,
    tables: &Tables,
    name: &str,
) -> Result<(), StorageError> {
    let sql = format!("DELETE FROM {} WHERE option_name = ?1", tables.options);
    db.execute(&sql, &[name.into()])?;
    db.delete_option(name);
    Ok(())
}

/// True when the cached schema version is missing or older than
/// [`DB_VERSION`]
pub fn upgrade_needed<D: Driver>(db: &StorageHandle<D>) -> bool {
    let stored = db.get_option(DB_VERSION_OPTION).ok().and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    stored.map_or(true, |version| version < DB_VERSION)
}

/// Keyword metadata, served from the cache when present, otherwise read
/// from the URL table and memoized. `Ok(None)` means no such keyword.
pub fn keyword_info<D: Driver>(
    db: &mut StorageHandle<D>,
    tables: &Tables,
    keyword: &str,
) -> Result<Option<KeywordInfo>, StorageError> {
    if let Ok(info) = db.get_keyword_info(keyword) {
        return Ok(Some(info.clone()));
    }

    let sql = format!(
        "SELECT keyword, url, title, timestamp, ip, clicks FROM {} WHERE keyword = ?1",
        tables.url
    );
    let Some(row) = db.query(&sql, &[keyword.into()])?.into_iter().next() else {
        debug!(keyword, "keyword not found");
        return Ok(None);
    };

    let text = |i: usize| row.get(i).and_then(SqlValue::to_text).unwrap_or_default();
    let clicks = match row.get(5) {
        Some(SqlValue::Integer(n)) => u64::try_from(*n).unwrap_or(0),
        _ => 0,
    };
    let info = KeywordInfo {
        keyword: text(0),
        url: text(1),
        title: text(2),
        timestamp: parse_timestamp(&text(3)),
        ip: text(4),
        clicks,
    };

    db.set_keyword_info(keyword, info.clone());
    Ok(Some(info))
}

/// Stored values are JSON when they parse as JSON, plain strings otherwise
fn decode_option(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn encode_option(value: &Value) -> String {
    match value {
        Value::String(s) if serde_json::from_str::<Value>(s).is_err() => s.clone(),
        other => other.to_string(),
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|t| t.and_utc())
        })
        .unwrap_or_else(|_| {
            warn!(raw, "unparseable keyword timestamp");
            DateTime::<Utc>::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names() {
        let t = Tables::with_prefix("short_");
        assert_eq!(t.url, "short_url");
        assert_eq!(t.options, "short_options");
        assert_eq!(t.log, "short_log");
        assert_eq!(Tables::default().options, "yourls_options");
    }

    #[test]
    fn test_option_encoding() {
        assert_eq!(decode_option("42".into()), json!(42));
        assert_eq!(decode_option("[\"a.php\"]".into()), json!(["a.php"]));
        assert_eq!(decode_option("hello world".into()), json!("hello world"));

        assert_eq!(encode_option(&json!("hello world")), "hello world");
        // a string that looks like JSON must survive a round trip as a string
        assert_eq!(encode_option(&json!("42")), "\"42\"");
        assert_eq!(decode_option(encode_option(&json!("42"))), json!("42"));
        assert_eq!(encode_option(&json!({"a": 1})), "{\"a\":1}");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-01-17T13:40:00Z");
        let b = parse_timestamp("2024-01-17 13:40:00");
        assert_eq!(a, b);
        assert_eq!(parse_timestamp("garbage"), DateTime::<Utc>::default());
    }
}
