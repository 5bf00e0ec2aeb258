//! Database driver abstraction
//!
//! The storage handle never talks to a concrete database library directly.
//! It holds a connection produced by a [`Driver`], which lets the SQLite
//! backend be swapped for a test double that fails on demand.

use thiserror::Error;

/// Connection credentials supplied before `connect` is attempted.
///
/// The DSN format is driver specific (e.g. `sqlite:data.db`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub dsn: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Extra settings applied right after a connection is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Statements executed once, in order, on the fresh connection
    pub init_commands: Vec<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            init_commands: vec!["PRAGMA foreign_keys = ON".to_string()],
        }
    }
}

/// Driver capabilities that can be introspected after connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Whether prepared statements are emulated client-side
    EmulatePrepares,
    /// Name of the driver backing the connection
    DriverName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    Text(String),
}

/// A value bound to a statement parameter or read back from a result column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Text rendering of the value, `None` for SQL NULL
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

pub type Row = Vec<SqlValue>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unsupported DSN '{0}'")]
    InvalidDsn(String),

    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("attribute {0:?} is not supported by this driver")]
    UnsupportedAttribute(Attribute),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Short name of the error kind, shown on the fatal error page
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::InvalidDsn(_) => "InvalidDsn",
            DriverError::Sqlite(_) => "SqliteError",
            DriverError::UnsupportedAttribute(_) => "UnsupportedAttribute",
            DriverError::Other(_) => "DriverError",
        }
    }
}

/// Opens connections. One driver value produces the single connection
/// owned by a storage handle.
pub trait Driver {
    type Connection: SqlConnection;

    fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<Self::Connection, DriverError>;
}

/// A live, exclusively owned database connection. All calls block.
pub trait SqlConnection {
    /// Run a statement that returns no rows, yielding the affected row count
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, DriverError>;

    /// Run a query and collect every row
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DriverError>;

    fn attribute(&self, attribute: Attribute) -> Result<AttributeValue, DriverError>;

    /// Raw version string reported by the server or library
    fn server_version(&self) -> String;
}
