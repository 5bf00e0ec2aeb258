//! SQLite driver backed by `rusqlite`
//!
//! DSNs take the form `sqlite:<path>` for a file database or
//! `sqlite::memory:` for a throwaway in-memory one.

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, ToSql};
use tracing::debug;

use crate::driver::{
    Attribute, AttributeValue, ConnectOptions, Credentials, Driver, DriverError, Row,
    SqlConnection, SqlValue,
};

const DSN_SCHEME: &str = "sqlite:";
const MEMORY_TARGET: &str = ":memory:";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

pub struct SqliteConnection {
    conn: Connection,
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;

    fn connect(
        &self,
        credentials: &Credentials,
        options: &ConnectOptions,
    ) -> Result<SqliteConnection, DriverError> {
        // SQLite has no notion of users, the credentials only carry the DSN
        let target = credentials
            .dsn
            .strip_prefix(DSN_SCHEME)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DriverError::InvalidDsn(credentials.dsn.clone()))?;

        let conn = if target == MEMORY_TARGET {
            Connection::open_in_memory()?
        } else {
            Connection::open(target)?
        };

        for command in &options.init_commands {
            conn.execute_batch(command)?;
        }

        debug!(target = %target, "sqlite connection opened");
        Ok(SqliteConnection { conn })
    }
}

impl SqlConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, DriverError> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DriverError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.column_count();

        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            (0..columns)
                .map(|i| row.get::<_, Value>(i).map(SqlValue::from))
                .collect::<rusqlite::Result<Row>>()
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<Row>>>()?)
    }

    fn attribute(&self, attribute: Attribute) -> Result<AttributeValue, DriverError> {
        match attribute {
            Attribute::DriverName => Ok(AttributeValue::Text("sqlite".to_string())),
            // Statements are always prepared natively by SQLite
            Attribute::EmulatePrepares => Err(DriverError::UnsupportedAttribute(attribute)),
        }
    }

    fn server_version(&self) -> String {
        rusqlite::version().to_string()
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SqliteConnection {
        let creds = Credentials {
            dsn: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        SqliteDriver
            .connect(&creds, &ConnectOptions::default())
            .unwrap()
    }

    #[test]
    fn test_rejects_foreign_dsn() {
        let creds = Credentials {
            dsn: "mysql:host=localhost;dbname=yourls".to_string(),
            ..Default::default()
        };
        let err = SqliteDriver
            .connect(&creds, &ConnectOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::InvalidDsn(_)));
        assert_eq!(err.kind(), "InvalidDsn");
    }

    #[test]
    fn test_execute_and_query() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (name TEXT, n INTEGER)", &[])
            .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t (name, n) VALUES (?1, ?2)",
                &["alpha".into(), 7i64.into()],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = conn.query("SELECT name, n FROM t", &[]).unwrap();
        assert_eq!(
            rows,
            vec![vec![SqlValue::Text("alpha".into()), SqlValue::Integer(7)]]
        );
    }

    #[test]
    fn test_emulate_prepares_is_unsupported() {
        let conn = memory();
        assert!(conn.attribute(Attribute::EmulatePrepares).is_err());
        assert_eq!(
            conn.attribute(Attribute::DriverName).unwrap(),
            AttributeValue::Text("sqlite".into())
        );
    }

    #[test]
    fn test_server_version_is_reported() {
        let conn = memory();
        assert!(conn.server_version().starts_with('3'));
    }
}
