//! Data models held in the storage handle caches
//!
//! This module defines the per-keyword metadata record and the plugin admin
//! page record kept in the plugin page registry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata of one short URL, memoized per keyword
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeywordInfo {
    /// Short identifier (e.g. "abc123")
    pub keyword: String,

    /// Destination the keyword redirects to
    pub url: String,

    /// Page title captured when the link was created
    #[serde(default)]
    pub title: String,

    /// When the short URL was created
    pub timestamp: DateTime<Utc>,

    /// Address of the client that created it
    #[serde(default)]
    pub ip: String,

    /// Number of times this short URL has been followed
    #[serde(default)]
    pub clicks: u64,
}

/// Callback rendering the body of a plugin admin page
pub type RenderFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Admin page registered by a plugin
#[derive(Clone)]
pub struct PluginPage {
    pub slug: String,
    pub title: String,
    pub function: RenderFn,
}

impl PluginPage {
    pub fn render(&self) -> String {
        (self.function)()
    }
}

impl fmt::Debug for PluginPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPage")
            .field("slug", &self.slug)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}
