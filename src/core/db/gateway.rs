/// Database Gateway Module
///
/// The gateway is the single entry point for running statements. It owns a
/// connection configuration and nothing else: every operation opens its own
/// connection, runs exactly one statement inside a transaction, and closes
/// the connection again before returning.

use crate::core::db::connection::{self, ConnectionConfig};
use crate::core::db::query::{duplicate_table_name, has_returning_clause, read_row, QueryText, Row};
use crate::core::{GatewayError, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, Params, TransactionBehavior};
use tracing::{debug, error, warn};

/// Connection-per-call gateway over a SQLite database.
///
/// The gateway holds no connection between calls, so a single instance can
/// be shared freely between threads.
#[derive(Debug, Clone)]
pub struct Gateway {
    config: ConnectionConfig,
}

impl Gateway {
    /// Creates a gateway that will connect using `config`
    pub fn new(config: ConnectionConfig) -> Self {
        Gateway { config }
    }

    /// The configuration this gateway connects with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a new connection
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConnectionFailure` if the connection cannot be
    /// opened or the file is not a readable database.
    pub fn connect(&self) -> Result<Connection> {
        connection::open(&self.config).map_err(|e| {
            error!("Failed to connect: {}", e);
            e
        })
    }

    /// Runs `op` against a fresh connection and closes it afterwards.
    ///
    /// The connection is closed on every path. A failed close is logged and
    /// does not replace the result of `op`.
    fn with_connection<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let outcome = op(&mut conn);

        match conn.close() {
            Ok(()) => debug!("Connection closed"),
            Err((_, e)) => warn!("Failed to close connection: {}", e),
        }
        outcome
    }

    /// Executes a CREATE TABLE statement and commits it
    ///
    /// Unlike `execute` and the `fetch_*` calls, the text is run as a batch:
    /// several `;`-separated statements are accepted and commit or roll back
    /// together, which lets a table ship with its indexes.
    ///
    /// # Errors
    ///
    /// - `GatewayError::InvalidQuery` if `statement` is not text; no
    ///   connection is opened in that case
    /// - `GatewayError::TableAlreadyExists` if the table already exists
    /// - `GatewayError::ExecutionFailure` for any other driver error
    /// - `GatewayError::ConnectionFailure` if the connection cannot be opened
    pub fn create_table<'q>(&self, statement: impl Into<QueryText<'q>>) -> Result<()> {
        let statement = statement.into();
        let sql = statement.require_text()?;

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| classify_execution(sql, e))?;

            debug!("Creating table: {}", sql);
            if let Err(e) = tx.execute_batch(sql) {
                return Err(match duplicate_table_name(&e) {
                    Some(table) => {
                        error!("Table {} already exists", table);
                        GatewayError::table_exists(table, e)
                    }
                    None => classify_execution(sql, e),
                });
            }

            tx.commit().map_err(|e| classify_execution(sql, e))
        })
    }

    /// Executes a statement and commits it
    ///
    /// When the query text contains `RETURNING`, the first column of the
    /// first result row is returned; a RETURNING statement that produces no
    /// row yields `None`. Any other statement yields `None`.
    ///
    /// # Errors
    ///
    /// - `GatewayError::InvalidQuery` if `query` is not text
    /// - `GatewayError::ExecutionFailure` if the driver fails; nothing is
    ///   committed in that case
    /// - `GatewayError::ConnectionFailure` if the connection cannot be opened
    pub fn execute<'q, P: Params>(&self, query: impl Into<QueryText<'q>>, params: P) -> Result<Option<Value>> {
        let query = query.into();
        let sql = query.require_text()?;
        let returning = has_returning_clause(sql);

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| classify_execution(sql, e))?;

            debug!("Executing: {}", sql);
            let value = {
                let mut stmt = tx.prepare(sql).map_err(|e| classify_execution(sql, e))?;
                let mut rows = stmt.query(params).map_err(|e| classify_execution(sql, e))?;
                let first = rows.next().map_err(|e| classify_execution(sql, e))?;
                let value = match first {
                    Some(row) if returning => Some(row.get::<_, Value>(0).map_err(|e| classify_execution(sql, e))?),
                    _ => None,
                };
                value
            };

            tx.commit().map_err(|e| classify_execution(sql, e))?;
            Ok(value)
        })
    }

    /// Returns the first row of a query, or `None` if it matched nothing
    ///
    /// The read runs in a transaction that is always rolled back, so writes
    /// issued through this path are never persisted.
    ///
    /// # Errors
    ///
    /// - `GatewayError::InvalidQuery` if `query` is not text
    /// - `GatewayError::ExecutionFailure` if the driver fails
    /// - `GatewayError::ConnectionFailure` if the connection cannot be opened
    pub fn fetch_one<'q, P: Params>(&self, query: impl Into<QueryText<'q>>, params: P) -> Result<Option<Row>> {
        let query = query.into();
        let sql = query.require_text()?;

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Deferred)
                .map_err(|e| classify_execution(sql, e))?;

            debug!("Fetching one: {}", sql);
            let row = {
                let mut stmt = tx.prepare(sql).map_err(|e| classify_execution(sql, e))?;
                let mut rows = stmt.query(params).map_err(|e| classify_execution(sql, e))?;
                let first = rows.next().map_err(|e| classify_execution(sql, e))?;
                let row = match first {
                    Some(row) => Some(read_row(row).map_err(|e| classify_execution(sql, e))?),
                    None => None,
                };
                row
            };

            tx.rollback().map_err(|e| classify_execution(sql, e))?;
            Ok(row)
        })
    }

    /// Returns every row of a query in order; no rows is an empty vector
    ///
    /// # Errors
    ///
    /// - `GatewayError::InvalidQuery` if `query` is not text
    /// - `GatewayError::ExecutionFailure` if the driver fails
    /// - `GatewayError::ConnectionFailure` if the connection cannot be opened
    pub fn fetch_all<'q, P: Params>(&self, query: impl Into<QueryText<'q>>, params: P) -> Result<Vec<Row>> {
        let query = query.into();
        let sql = query.require_text()?;

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Deferred)
                .map_err(|e| classify_execution(sql, e))?;

            debug!("Fetching all: {}", sql);
            let rows = {
                let mut stmt = tx.prepare(sql).map_err(|e| classify_execution(sql, e))?;
                let rows = stmt
                    .query_map(params, |row| read_row(row))
                    .map_err(|e| classify_execution(sql, e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| classify_execution(sql, e))?;
                rows
            };

            tx.rollback().map_err(|e| classify_execution(sql, e))?;
            Ok(rows)
        })
    }
}

fn classify_execution(sql: &str, err: rusqlite::Error) -> GatewayError {
    error!("Query failed: {}", err);
    GatewayError::execution(sql, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    fn gateway_in(dir: &TempDir) -> Gateway {
        let path = dir.path().join("test.db");
        Gateway::new(ConnectionConfig::new().with("database", path.to_string_lossy().into_owned()))
    }

    #[test]
    fn test_gateway_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Gateway>();
    }

    #[test]
    fn test_create_and_duplicate_table() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway_in(&dir);

        gateway.create_table("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        match gateway.create_table("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)") {
            Err(GatewayError::TableAlreadyExists { table, message }) => {
                assert_eq!(table, "t");
                assert!(message.contains("table t already exists"));
            }
            other => panic!("Expected TableAlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_create_table_syntax_error_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway_in(&dir);

        match gateway.create_table("CREATE TABLE (") {
            Err(GatewayError::ExecutionFailure { query, message }) => {
                assert_eq!(query, "CREATE TABLE (");
                assert!(message.contains("syntax error"));
            }
            other => panic!("Expected ExecutionFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_returning_and_plain() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway_in(&dir);
        gateway.create_table("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();

        let id = gateway
            .execute("INSERT INTO t (v) VALUES (?1) RETURNING id", params!["hello"])
            .unwrap();
        assert_eq!(id, Some(Value::Integer(1)));

        let none = gateway.execute("INSERT INTO t (v) VALUES (?1)", ["world"]).unwrap();
        assert_eq!(none, None);

        let rows = gateway.fetch_all("SELECT v FROM t ORDER BY id", []).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::Text("hello".into())], vec![Value::Text("world".into())]]
        );
    }

    #[test]
    fn test_fetch_one_distinguishes_no_row_from_null_row() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway_in(&dir);
        gateway.create_table("CREATE TABLE t (v TEXT)").unwrap();
        gateway.execute("INSERT INTO t (v) VALUES (NULL)", []).unwrap();

        assert_eq!(gateway.fetch_one("SELECT v FROM t WHERE v = 'x'", []).unwrap(), None);
        assert_eq!(gateway.fetch_one("SELECT v FROM t", []).unwrap(), Some(vec![Value::Null]));
    }

    #[test]
    fn test_invalid_query_does_not_connect() {
        let gateway = Gateway::new(ConnectionConfig::new().with("database", "/nonexistent/dir/x.db"));
        let bytes: &[u8] = &[0xc3, 0x28];

        assert!(matches!(gateway.create_table(bytes), Err(GatewayError::InvalidQuery { .. })));
        assert!(matches!(gateway.execute(bytes, []), Err(GatewayError::InvalidQuery { .. })));
        assert!(matches!(gateway.fetch_one(bytes, []), Err(GatewayError::InvalidQuery { .. })));
        assert!(matches!(gateway.fetch_all(bytes, []), Err(GatewayError::InvalidQuery { .. })));

        // The same gateway does fail to connect once given text.
        assert!(matches!(gateway.fetch_all("SELECT 1", []), Err(GatewayError::ConnectionFailure { .. })));
    }
}
