//! Integration tests for the storage handle on a real SQLite database
//!
//! These tests verify:
//! - The connection lifecycle against the SQLite driver
//! - Query profiling
//! - Options preload and persistence
//! - Keyword info read-through caching

use serde_json::json;
use tempfile::NamedTempFile;

use shortener::database::{
    create_tables, delete_stored_option, keyword_info, preload_options, save_option,
    upgrade_needed, Tables, DB_VERSION,
};
use shortener::driver::Credentials;
use shortener::sqlite::SqliteDriver;
use shortener::storage::StorageHandle;

/// Helper creating an initialized handle on a temporary database file
fn setup_storage() -> (StorageHandle, NamedTempFile) {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let credentials = Credentials {
        dsn: format!("sqlite:{}", temp_db.path().display()),
        ..Default::default()
    };

    let mut db = StorageHandle::new(SqliteDriver, credentials);
    db.init().expect("Failed to connect to test database");

    (db, temp_db)
}

fn installed_storage() -> (StorageHandle, NamedTempFile, Tables) {
    let (mut db, temp_db) = setup_storage();
    let tables = Tables::default();
    create_tables(&mut db, &tables).expect("Failed to create tables");
    (db, temp_db, tables)
}

#[test]
fn test_init_on_sqlite() {
    let (db, _temp_db) = setup_storage();

    assert!(db.is_connected());
    assert!(db.is_profiling());
    // SQLite cannot report prepare emulation, which counts as off
    assert!(!db.get_emulate_state());
    assert!(!db.is_installed());
    assert!(!db.get_server_version_string().unwrap().is_empty());
}

#[test]
fn test_query_log_only_counts_statements() {
    let (mut db, _temp_db) = setup_storage();

    db.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
    db.log_message("DEBUG starting");
    db.execute("INSERT INTO t (id) VALUES (?1)", &[1i64.into()])
        .unwrap();
    let failed = db.execute("INSERT INTO missing VALUES (1)", &[]);

    assert!(failed.is_err());
    assert_eq!(
        db.get_queries(),
        vec![
            "SQL CREATE TABLE t (id INTEGER)",
            "SQL INSERT INTO t (id) VALUES (?1)",
            "SQL INSERT INTO missing VALUES (1)",
        ]
    );
    assert_eq!(db.get_query_count(), 3);
    assert!(db
        .query_log()
        .entries()
        .iter()
        .any(|e| e.starts_with("ERROR ")));
}

#[test]
fn test_preload_without_tables_means_not_installed() {
    let (mut db, _temp_db) = setup_storage();
    db.set_installed(true);

    let installed = preload_options(&mut db, &Tables::default());

    assert!(!installed);
    assert!(!db.is_installed());
    assert!(db.get_options().is_empty());
}

#[test]
fn test_preload_caches_stored_options() {
    let (mut db, temp_db, tables) = installed_storage();
    save_option(&mut db, &tables, "site_name", json!("My Links")).unwrap();
    save_option(&mut db, &tables, "active_plugins", json!(["a/plugin.php"])).unwrap();
    save_option(&mut db, &tables, "db_version", json!(DB_VERSION)).unwrap();
    save_option(&mut db, &tables, "zip", json!("02134")).unwrap();

    // a fresh handle on the same file sees what was persisted
    let path = temp_db.path().display().to_string();
    let mut fresh = StorageHandle::new(
        SqliteDriver,
        Credentials {
            dsn: format!("sqlite:{path}"),
            ..Default::default()
        },
    );
    fresh.init().unwrap();

    assert!(preload_options(&mut fresh, &tables));
    assert!(fresh.is_installed());
    assert_eq!(fresh.get_option("site_name").unwrap(), &json!("My Links"));
    assert_eq!(
        fresh.get_option("active_plugins").unwrap(),
        &json!(["a/plugin.php"])
    );
    assert_eq!(fresh.get_option("zip").unwrap(), &json!("02134"));
    assert!(!upgrade_needed(&fresh));
}

#[test]
fn test_save_option_overwrites_and_delete_removes() {
    let (mut db, _temp_db, tables) = installed_storage();
    save_option(&mut db, &tables, "theme", json!("dark")).unwrap();
    save_option(&mut db, &tables, "theme", json!("light")).unwrap();
    assert_eq!(db.get_option("theme").unwrap(), &json!("light"));

    db.set_options(Default::default());
    preload_options(&mut db, &tables);
    assert_eq!(db.get_option("theme").unwrap(), &json!("light"));

    delete_stored_option(&mut db, &tables, "theme").unwrap();
    assert!(!db.has_option("theme"));
    preload_options(&mut db, &tables);
    assert!(!db.has_option("theme"));
}

#[test]
fn test_upgrade_needed_for_old_or_missing_version() {
    let (mut db, _temp_db) = setup_storage();
    assert!(upgrade_needed(&db));

    db.set_option("db_version", "482");
    assert!(upgrade_needed(&db));

    db.set_option("db_version", json!(DB_VERSION + 1));
    assert!(!upgrade_needed(&db));
}

#[test]
fn test_keyword_info_is_memoized() {
    let (mut db, _temp_db, tables) = installed_storage();
    db.execute(
        &format!(
            "INSERT INTO {} (keyword, url, title, timestamp, ip, clicks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            tables.url
        ),
        &[
            "abc123".into(),
            "https://example.com".into(),
            "Example".into(),
            "2024-01-17 13:40:00".into(),
            "127.0.0.1".into(),
            12i64.into(),
        ],
    )
    .unwrap();

    let before = db.get_query_count();
    let info = keyword_info(&mut db, &tables, "abc123").unwrap().unwrap();
    assert_eq!(info.url, "https://example.com");
    assert_eq!(info.title, "Example");
    assert_eq!(info.clicks, 12);
    assert_eq!(info.timestamp.to_rfc3339(), "2024-01-17T13:40:00+00:00");
    assert_eq!(db.get_query_count(), before + 1);

    // second lookup is served from the cache
    let again = keyword_info(&mut db, &tables, "abc123").unwrap().unwrap();
    assert_eq!(again, info);
    assert_eq!(db.get_query_count(), before + 1);
    assert!(db.has_keyword_info("abc123"));

    assert!(keyword_info(&mut db, &tables, "nope").unwrap().is_none());
    assert!(!db.has_keyword_info("nope"));
}
