//! Application entry point
//!
//! Loads configuration, runs the bootstrap against the configured database
//! and reports where it stopped. A database connection failure is logged
//! together with the status the request would have been answered with.

use std::process::ExitCode;

use dotenvy::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shortener::sqlite::SqliteDriver;
use shortener::storage::server_version_number;
use shortener::{Bootstrapper, Config, Outcome};

/// Application entry point
///
/// 1. Loads environment variables from .env file
/// 2. Reads configuration (see `shortener::config`)
/// 3. Runs every enabled bootstrap step
/// 4. Logs the resulting state of the storage handle
fn main() -> ExitCode {
    // Load environment variables from .env file if it exists
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shortener=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    info!(
        database_url = %config.database_url,
        prefix = %config.db_prefix,
        userdir = %config.userdir.display(),
        fast_init = config.fast_init,
        "configuration loaded"
    );

    let bootstrapper = Bootstrapper::new(config)
        .on_external_step(|step| info!(?step, "step delegated to host"));

    match bootstrapper.run(SqliteDriver) {
        Ok(done) => {
            if let Some(db) = done.storage.as_ref() {
                let raw_version = db.get_server_version_string().unwrap_or_default();
                info!(
                    installed = db.is_installed(),
                    server_version = %server_version_number(&raw_version),
                    options = db.get_options().len(),
                    plugins = db.get_plugins().len(),
                    queries = db.get_query_count(),
                    "storage ready"
                );
            }
            match done.outcome {
                Outcome::Ready | Outcome::FastInit => {}
                other => warn!(outcome = ?other, "bootstrap needs attention"),
            }
            ExitCode::SUCCESS
        }
        Err(termination) => {
            error!(
                status = %termination.status(),
                message = %termination.message(),
                "bootstrap terminated"
            );
            ExitCode::FAILURE
        }
    }
}
