//! Error types and the fatal termination path
//!
//! Ordinary failures are [`StorageError`] values. A failed database
//! connection is different: it is not recoverable, so it is reported as a
//! [`Termination`] that the top-level request handler must turn into the
//! final response.

use std::fs;
use std::path::{Path, PathBuf};

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is not connected; init() has not run")]
    NotConnected,

    #[error("Database error: {0}")]
    Query(#[from] DriverError),

    #[error("option '{0}' is not cached")]
    MissingOption(String),

    #[error("no cached info for keyword '{0}'")]
    MissingKeyword(String),
}

/// End of the current request. Produced once, never recovered from.
#[must_use = "a termination must be turned into the final response"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Page supplied by the site's own error page file
    CustomPage(String),

    /// Generic fatal error page
    Fatal {
        message: String,
        title: String,
        status: StatusCode,
    },
}

impl Termination {
    pub fn status(&self) -> StatusCode {
        match self {
            Termination::CustomPage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Termination::Fatal { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Termination::CustomPage(page) => page,
            Termination::Fatal { message, .. } => message,
        }
    }
}

impl IntoResponse for Termination {
    fn into_response(self) -> Response {
        let status = self.status();
        let page = match self {
            Termination::CustomPage(page) => page,
            Termination::Fatal { message, title, .. } => format!(
                "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n\
                 <body>\n<h2>{title}</h2>\n<p>{message}</p>\n</body>\n</html>\n"
            ),
        };
        (status, Html(page)).into_response()
    }
}

/// Site-provided replacement for the generic database error page
pub trait ErrorPageHook {
    /// Returns the page to serve, or `None` to fall back to the generic one
    fn custom_page(&self) -> Option<String>;
}

/// No custom page; always falls back
#[derive(Debug, Default, Clone, Copy)]
pub struct NoErrorPage;

impl ErrorPageHook for NoErrorPage {
    fn custom_page(&self) -> Option<String> {
        None
    }
}

/// Serves `db_error.html` from the user directory when that file exists
#[derive(Debug, Clone)]
pub struct UserDirErrorPage {
    path: PathBuf,
}

impl UserDirErrorPage {
    pub const FILE_NAME: &'static str = "db_error.html";

    pub fn new(userdir: &Path) -> Self {
        Self {
            path: userdir.join(Self::FILE_NAME),
        }
    }
}

impl ErrorPageHook for UserDirErrorPage {
    fn custom_page(&self) -> Option<String> {
        if !self.path.is_file() {
            return None;
        }
        match fs::read_to_string(&self.path) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable custom error page");
                None
            }
        }
    }
}

/// Message localization used when building user-facing error text
pub trait Translator {
    fn translate(&self, text: &str) -> String;
}

/// Returns every message as written
#[derive(Debug, Default, Clone, Copy)]
pub struct Untranslated;

impl Translator for Untranslated {
    fn translate(&self, text: &str) -> String {
        text.to_string()
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_custom_page_only_when_file_exists() {
        let dir = tempdir().unwrap();
        let hook = UserDirErrorPage::new(dir.path());
        assert_eq!(hook.custom_page(), None);

        fs::write(dir.path().join(UserDirErrorPage::FILE_NAME), "<p>down</p>").unwrap();
        assert_eq!(hook.custom_page().as_deref(), Some("<p>down</p>"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_custom_page_status() {
        let t = Termination::CustomPage("x".into());
        assert_eq!(t.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(t.message(), "x");
    }
}
