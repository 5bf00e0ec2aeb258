//! Storage handle: one database connection plus the request-scoped caches
//!
//! The handle owns the connection produced by a [`Driver`] and layers on top
//! of it:
//! - installation state and the current admin page context
//! - an options cache and a per-keyword metadata cache
//! - the plugin and plugin page registries
//! - a query log that records every statement run through the handle
//!
//! Lifecycle is `uninitialized -> connected -> profiling`, driven by
//! [`StorageHandle::init`], which must be called exactly once.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::driver::{
    Attribute, AttributeValue, ConnectOptions, Credentials, Driver, Row, SqlConnection, SqlValue,
};
use crate::error::{
    escape_html, ErrorPageHook, NoErrorPage, StorageError, Termination, Translator, Untranslated,
};
use crate::model::{KeywordInfo, PluginPage, RenderFn};
use crate::profiler::QueryLog;
use crate::sqlite::SqliteDriver;

pub struct StorageHandle<D: Driver = SqliteDriver> {
    driver: D,
    credentials: Credentials,
    connect_options: ConnectOptions,
    connection: Option<D::Connection>,

    error_page: Box<dyn ErrorPageHook>,
    translator: Box<dyn Translator>,

    installed: bool,
    emulate_prepare: bool,
    html_context: String,

    options: HashMap<String, Value>,
    keyword_info: HashMap<String, KeywordInfo>,

    // Removal leaves `None` behind so later entries keep their position
    plugins: Vec<Option<String>>,
    plugin_pages: BTreeMap<String, PluginPage>,

    profiling: bool,
    query_log: QueryLog,
}

impl<D: Driver> StorageHandle<D> {
    /// Creates an unconnected handle. Nothing touches the database until
    /// [`init`](Self::init) runs.
    pub fn new(driver: D, credentials: Credentials) -> Self {
        Self {
            driver,
            credentials,
            connect_options: ConnectOptions::default(),
            connection: None,
            error_page: Box::new(NoErrorPage),
            translator: Box::new(Untranslated),
            installed: false,
            emulate_prepare: false,
            html_context: String::new(),
            options: HashMap::new(),
            keyword_info: HashMap::new(),
            plugins: Vec::new(),
            plugin_pages: BTreeMap::new(),
            profiling: false,
            query_log: QueryLog::default(),
        }
    }

    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.connect_options = options;
        self
    }

    pub fn with_error_page(mut self, hook: impl ErrorPageHook + 'static) -> Self {
        self.error_page = Box::new(hook);
        self
    }

    pub fn with_translator(mut self, translator: impl Translator + 'static) -> Self {
        self.translator = Box::new(translator);
        self
    }

    /// Connects, records the prepare emulation capability, then starts the
    /// query log. A connection failure stops here and yields the termination.
    pub fn init(&mut self) -> Result<(), Termination> {
        self.connect()?;
        self.probe_emulate_state();
        self.start_profiler();
        Ok(())
    }

    /// Opens the connection with the credentials given at construction.
    ///
    /// On failure the custom error page gets the first chance to end the
    /// request; otherwise a generic 503 page is built.
    pub fn connect(&mut self) -> Result<(), Termination> {
        match self
            .driver
            .connect(&self.credentials, &self.connect_options)
        {
            Ok(conn) => {
                self.connection = Some(conn);
                info!("database connected");
                self.log_message("CONNECTED");
                Ok(())
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "could not connect to database");
                Err(self.fatal_termination(e.kind(), &e.to_string()))
            }
        }
    }

    fn fatal_termination(&self, kind: &str, message: &str) -> Termination {
        if let Some(page) = self.error_page.custom_page() {
            return Termination::CustomPage(page);
        }

        let mut text = self
            .translator
            .translate("Incorrect DB config, or could not connect to DB");
        text.push_str("<br/>");
        text.push_str(&escape_html(kind));
        text.push_str(": ");
        text.push_str(&escape_html(message));

        Termination::Fatal {
            message: text,
            title: self.translator.translate("Fatal error"),
            status: axum::http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Reads the prepare emulation attribute. Drivers that cannot report it
    /// are treated as not emulating; the error is never propagated.
    pub fn probe_emulate_state(&mut self) {
        let probed = self
            .connection
            .as_ref()
            .map(|conn| conn.attribute(Attribute::EmulatePrepares));

        self.emulate_prepare = match probed {
            Some(Ok(AttributeValue::Bool(on))) => on,
            Some(Ok(other)) => {
                debug!(value = ?other, "unexpected emulate-prepare attribute value");
                false
            }
            Some(Err(e)) => {
                debug!(error = %e, "emulate-prepare attribute unavailable");
                false
            }
            None => false,
        };
        self.log_message(format!("EMULATE_PREPARE {}", self.emulate_prepare));
    }

    pub fn get_emulate_state(&self) -> bool {
        self.emulate_prepare
    }

    /// Starts recording statements in the query log
    pub fn start_profiler(&mut self) {
        self.profiling = true;
        self.query_log.log_message("PROFILER started");
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Appends a diagnostic message to the query log while profiling
    pub fn log_message(&mut self, message: impl Into<String>) {
        if self.profiling {
            self.query_log.log_message(message);
        }
    }

    pub fn get_query_count(&self) -> usize {
        self.query_log.query_count()
    }

    pub fn get_queries(&self) -> Vec<&str> {
        self.query_log.queries()
    }

    pub fn query_log(&self) -> &QueryLog {
        &self.query_log
    }

    /// Raw version string as reported by the driver, not normalized
    pub fn get_server_version_string(&self) -> Result<String, StorageError> {
        self.connection
            .as_ref()
            .map(|conn| conn.server_version())
            .ok_or(StorageError::NotConnected)
    }

    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StorageError> {
        let conn = self.connection.as_mut().ok_or(StorageError::NotConnected)?;
        let started = Instant::now();
        let result = conn.execute(sql, params);
        if self.profiling {
            self.query_log.log_query(sql, started.elapsed());
        }
        result.map_err(|e| self.statement_failed(e))
    }

    pub fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StorageError> {
        let conn = self.connection.as_mut().ok_or(StorageError::NotConnected)?;
        let started = Instant::now();
        let result = conn.query(sql, params);
        if self.profiling {
            self.query_log.log_query(sql, started.elapsed());
        }
        result.map_err(|e| self.statement_failed(e))
    }

    /// Runs a two-column query and returns the columns as text pairs.
    /// Rows whose first column is NULL are skipped.
    pub fn fetch_pairs(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<(String, String)>, StorageError> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut cols = row.into_iter();
                let key = cols.next()?.to_text()?;
                let value = cols.next().and_then(|v| v.to_text()).unwrap_or_default();
                Some((key, value))
            })
            .collect())
    }

    fn statement_failed(&mut self, e: crate::driver::DriverError) -> StorageError {
        debug!(error = %e, "statement failed");
        self.log_message(format!("ERROR {e}"));
        StorageError::Query(e)
    }

    pub fn set_installed(&mut self, installed: bool) {
        self.installed = installed;
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn set_html_context(&mut self, context: impl Into<String>) {
        self.html_context = context.into();
    }

    pub fn get_html_context(&self) -> &str {
        &self.html_context
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(name.into(), value.into());
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Cached value of `name`; check [`has_option`](Self::has_option) first
    pub fn get_option(&self, name: &str) -> Result<&Value, StorageError> {
        self.options
            .get(name)
            .ok_or_else(|| StorageError::MissingOption(name.to_string()))
    }

    pub fn delete_option(&mut self, name: &str) {
        self.options.remove(name);
    }

    pub fn get_options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    /// Replaces the whole options cache
    pub fn set_options(&mut self, options: HashMap<String, Value>) {
        self.options = options;
    }

    pub fn set_keyword_info(&mut self, keyword: impl Into<String>, info: KeywordInfo) {
        self.keyword_info.insert(keyword.into(), info);
    }

    pub fn has_keyword_info(&self, keyword: &str) -> bool {
        self.keyword_info.contains_key(keyword)
    }

    pub fn get_keyword_info(&self, keyword: &str) -> Result<&KeywordInfo, StorageError> {
        self.keyword_info
            .get(keyword)
            .ok_or_else(|| StorageError::MissingKeyword(keyword.to_string()))
    }

    pub fn delete_keyword_info(&mut self, keyword: &str) {
        self.keyword_info.remove(keyword);
    }

    /// Registered plugins in load order
    pub fn get_plugins(&self) -> Vec<&str> {
        self.plugins.iter().flatten().map(String::as_str).collect()
    }

    /// Positional view of the registry, removed entries show up as `None`
    pub fn plugin_slots(&self) -> &[Option<String>] {
        &self.plugins
    }

    pub fn set_plugins(&mut self, plugins: Vec<String>) {
        self.plugins = plugins.into_iter().map(Some).collect();
    }

    pub fn add_plugin(&mut self, plugin: impl Into<String>) {
        self.plugins.push(Some(plugin.into()));
    }

    /// Unregisters every entry equal to `plugin`, keeping the positions of
    /// the others
    pub fn remove_plugin(&mut self, plugin: &str) {
        for slot in self.plugins.iter_mut() {
            if slot.as_deref() == Some(plugin) {
                *slot = None;
            }
        }
    }

    pub fn get_plugin_pages(&self) -> &BTreeMap<String, PluginPage> {
        &self.plugin_pages
    }

    pub fn set_plugin_pages(&mut self, pages: BTreeMap<String, PluginPage>) {
        self.plugin_pages = pages;
    }

    pub fn add_plugin_page(
        &mut self,
        slug: impl Into<String>,
        title: impl Into<String>,
        function: RenderFn,
    ) {
        let slug = slug.into();
        let page = PluginPage {
            slug: slug.clone(),
            title: title.into(),
            function,
        };
        self.plugin_pages.insert(slug, page);
    }

    pub fn remove_plugin_page(&mut self, slug: &str) {
        self.plugin_pages.remove(slug);
    }
}

/// Extracts the dotted version number from a raw server version string:
/// leading non-digits are dropped and the number ends at the first
/// character that is neither a digit nor a dot.
///
/// ```
/// # use shortener::storage::server_version_number;
/// assert_eq!(server_version_number("omgmysql-5.5-ubuntu-4.20"), "5.5");
/// assert_eq!(server_version_number("3.46.0"), "3.46.0");
/// ```
pub fn server_version_number(raw: &str) -> String {
    raw.trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}
