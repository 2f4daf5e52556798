/// Connection Configuration Module
///
/// This module holds the opaque connection parameters a gateway is built
/// with, and the routine that turns them into an open SQLite connection.

use crate::core::{GatewayError, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Keys naming the database file, in lookup order.
const DATABASE_KEYS: [&str; 3] = ["database", "dbname", "path"];
const BUSY_TIMEOUT_KEY: &str = "busy_timeout";
const CONNECT_TIMEOUT_KEY: &str = "connect_timeout";

/// A single connection parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Opaque mapping of driver parameters.
///
/// Key names are not validated. `database` (or `dbname`/`path`),
/// `busy_timeout` (milliseconds) and `connect_timeout` (seconds) are read
/// while opening; every other key is forwarded to SQLite as a URI query
/// parameter, where unknown names are ignored by the driver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig {
    params: BTreeMap<String, ParamValue>,
}

impl ConnectionConfig {
    /// Creates an empty configuration
    pub fn new() -> Self {
        ConnectionConfig::default()
    }

    /// Adds a parameter, replacing any previous value for `key`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The configured database path, if any
    pub fn database(&self) -> Option<String> {
        DATABASE_KEYS
            .iter()
            .find_map(|key| self.params.get(*key))
            .map(ToString::to_string)
    }

    /// Resolves the busy timeout from `busy_timeout` or `connect_timeout`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConnectionFailure` if the value is not a
    /// non-negative number of at most `i32::MAX` milliseconds.
    pub fn busy_timeout(&self) -> Result<Option<Duration>> {
        if let Some(value) = self.params.get(BUSY_TIMEOUT_KEY) {
            return parse_timeout(BUSY_TIMEOUT_KEY, value, 1).map(Some);
        }
        if let Some(value) = self.params.get(CONNECT_TIMEOUT_KEY) {
            return parse_timeout(CONNECT_TIMEOUT_KEY, value, 1000).map(Some);
        }
        Ok(None)
    }

    /// Builds the `file:` URI handed to SQLite
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConnectionFailure` if no database is configured.
    pub fn to_uri(&self) -> Result<String> {
        let database = self.database().ok_or_else(|| {
            GatewayError::connection("no database configured (expected one of: database, dbname, path)")
        })?;

        let query: Vec<String> = self
            .params
            .iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .map(|(key, value)| format!("{}={}", encode_uri_part(key), encode_uri_part(&value.to_string())))
            .collect();

        // A path starting with `//` would otherwise be read as a URI authority.
        let path = encode_uri_part(&database);
        let mut uri = if path.starts_with("//") {
            format!("file://{}", path)
        } else {
            format!("file:{}", path)
        };
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query.join("&"));
        }
        Ok(uri)
    }
}

impl<K, V> FromIterator<(K, V)> for ConnectionConfig
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ConnectionConfig {
            params: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Opens a connection described by `config`
///
/// A single attempt is made. After opening, `PRAGMA schema_version` is read
/// so that a file which is not a database fails here rather than on the
/// first statement.
///
/// # Errors
///
/// Returns `GatewayError::ConnectionFailure` embedding the driver error text.
pub fn open(config: &ConnectionConfig) -> Result<Connection> {
    let uri = config.to_uri()?;
    let busy_timeout = config.busy_timeout()?;

    debug!("Opening connection to {}", uri);
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&uri, flags).map_err(GatewayError::connection)?;

    if let Some(timeout) = busy_timeout {
        conn.busy_timeout(timeout).map_err(GatewayError::connection)?;
    }

    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
        .map_err(GatewayError::connection)?;

    Ok(conn)
}

fn is_reserved_key(key: &str) -> bool {
    DATABASE_KEYS.contains(&key) || key == BUSY_TIMEOUT_KEY || key == CONNECT_TIMEOUT_KEY
}

fn parse_timeout(key: &str, value: &ParamValue, millis_per_unit: u32) -> Result<Duration> {
    let invalid = || GatewayError::connection(format!("invalid {} value: {}", key, value));

    // SQLite takes the busy timeout as an i32 count of milliseconds.
    let limit = i32::MAX as u64;
    let millis = match value {
        ParamValue::Integer(i) => u64::try_from(*i)
            .ok()
            .and_then(|units| units.checked_mul(u64::from(millis_per_unit)))
            .filter(|ms| *ms <= limit)
            .ok_or_else(invalid)?,
        ParamValue::Float(_) | ParamValue::Text(_) => {
            let units = match value {
                ParamValue::Float(x) => *x,
                _ => value.to_string().trim().parse::<f64>().map_err(|_| invalid())?,
            };
            let ms = units * f64::from(millis_per_unit);
            if !ms.is_finite() || ms < 0.0 || ms > limit as f64 {
                return Err(invalid());
            }
            ms.round() as u64
        }
        ParamValue::Bool(_) => return Err(invalid()),
    };
    Ok(Duration::from_millis(millis))
}

/// Percent-encodes the characters SQLite treats as URI delimiters
fn encode_uri_part(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | '?' | '#' | '&' | '=' => encoded.push_str(&format!("%{:02X}", c as u32)),
            _ => encoded.push(c),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_uri_passes_unknown_keys_through() {
        let config = ConnectionConfig::new()
            .with("database", "/tmp/app.db")
            .with("mode", "rwc")
            .with("busy_timeout", 250)
            .with("host", "ignored.example.com");

        assert_eq!(
            config.to_uri().unwrap(),
            "file:/tmp/app.db?host=ignored.example.com&mode=rwc"
        );
    }

    #[test]
    fn test_uri_escapes_delimiters() {
        let config = ConnectionConfig::new().with("path", "/tmp/odd?name#1%.db");
        assert_eq!(config.to_uri().unwrap(), "file:/tmp/odd%3Fname%231%25.db");
    }

    #[test]
    fn test_uri_keeps_double_slash_path_out_of_authority() {
        let config = ConnectionConfig::new().with("database", "//srv/app.db");
        assert_eq!(config.to_uri().unwrap(), "file:////srv/app.db");
    }

    #[test]
    fn test_open_double_slash_path() {
        let dir = TempDir::new().unwrap();
        let path = format!("/{}", dir.path().join("slashes.db").to_string_lossy());
        let config = ConnectionConfig::new().with("database", path);

        let conn = open(&config).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(dir.path().join("slashes.db").exists());
    }

    #[test]
    fn test_database_aliases() {
        let config = ConnectionConfig::new().with("dbname", "a.db");
        assert_eq!(config.database().as_deref(), Some("a.db"));

        let config = ConnectionConfig::new().with("path", "b.db").with("database", "c.db");
        assert_eq!(config.database().as_deref(), Some("c.db"));
    }

    #[test]
    fn test_busy_timeout_resolution() {
        let config = ConnectionConfig::new().with("busy_timeout", 1500);
        assert_eq!(config.busy_timeout().unwrap(), Some(Duration::from_millis(1500)));

        let config = ConnectionConfig::new().with("connect_timeout", "2");
        assert_eq!(config.busy_timeout().unwrap(), Some(Duration::from_secs(2)));

        let config = ConnectionConfig::new()
            .with("connect_timeout", 10)
            .with("busy_timeout", 5);
        assert_eq!(config.busy_timeout().unwrap(), Some(Duration::from_millis(5)));

        assert_eq!(ConnectionConfig::new().busy_timeout().unwrap(), None);
    }

    #[test]
    fn test_invalid_timeout_is_connection_failure() {
        for value in [ParamValue::from("soon"), ParamValue::from(-1), ParamValue::from(true)] {
            let config = ConnectionConfig::new().with("database", ":memory:").with("busy_timeout", value);
            match open(&config) {
                Err(GatewayError::ConnectionFailure { message }) => {
                    assert!(message.contains("busy_timeout"), "unexpected message: {}", message)
                }
                other => panic!("Expected ConnectionFailure, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_oversized_timeout_is_connection_failure() {
        let cases = [
            (BUSY_TIMEOUT_KEY, ParamValue::Integer(3_000_000_000)),
            (CONNECT_TIMEOUT_KEY, ParamValue::Integer(3_000_000)),
            (CONNECT_TIMEOUT_KEY, ParamValue::Float(1e20)),
            (BUSY_TIMEOUT_KEY, ParamValue::from("1e300")),
        ];

        for (key, value) in cases {
            let config = ConnectionConfig::new().with("database", ":memory:").with(key, value);
            match open(&config) {
                Err(GatewayError::ConnectionFailure { message }) => {
                    assert!(message.contains(key), "unexpected message: {}", message)
                }
                other => panic!("Expected ConnectionFailure, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_largest_timeout_is_accepted() {
        let config = ConnectionConfig::new()
            .with("database", ":memory:")
            .with("busy_timeout", i64::from(i32::MAX));
        assert_eq!(
            config.busy_timeout().unwrap(),
            Some(Duration::from_millis(i32::MAX as u64))
        );
        assert!(open(&config).is_ok());
    }

    #[test]
    fn test_open_in_memory() {
        let config = ConnectionConfig::new().with("database", ":memory:");
        let conn = open(&config).unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_open_missing_database_key() {
        let config = ConnectionConfig::new().with("user", "postgres");
        match open(&config) {
            Err(GatewayError::ConnectionFailure { message }) => assert!(message.contains("no database configured")),
            other => panic!("Expected ConnectionFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_read_only_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.db");
        let config = ConnectionConfig::new()
            .with("database", path.to_string_lossy().into_owned())
            .with("mode", "ro");

        assert!(matches!(open(&config), Err(GatewayError::ConnectionFailure { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
database = "app.db"
busy_timeout = 5000
cache = "shared"
immutable = false
"#,
        )
        .unwrap();

        assert_eq!(config.get("database"), Some(&ParamValue::Text("app.db".to_string())));
        assert_eq!(config.get("busy_timeout"), Some(&ParamValue::Integer(5000)));
        assert_eq!(config.get("immutable"), Some(&ParamValue::Bool(false)));
        assert_eq!(config.iter().count(), 4);
    }
}
