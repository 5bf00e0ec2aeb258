//! Library exports for the URL shortener's bootstrap and storage layer
//! 
//! This module exposes the bootstrap policy and runner, the storage handle
//! with its caches, and the database driver they sit on.

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod driver;
pub mod error;
pub mod model;
pub mod profiler;
pub mod sqlite;
pub mod storage;

pub use bootstrap::{BootstrapPolicy, Bootstrapper, Outcome, Step};
pub use config::Config;
pub use error::{StorageError, Termination};
pub use storage::StorageHandle;
