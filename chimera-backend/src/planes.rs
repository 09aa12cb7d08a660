// chimera-backend/src/planes.rs
// ============================================================================
// Module: Chimera Data Planes
// Description: SQLite and filesystem access for one data plane.
// Purpose: Serve record and file lookups confined to a plane's stores.
// Dependencies: chimera-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! A data plane couples one SQLite database, one filesystem root, and the
//! single-key warrant verifier handed to it at deployment. The production
//! and shadow planes are structurally identical; only their stores and keys
//! differ, which is what makes their responses schema-indistinguishable.
//! All paths are lexically confined to the plane's root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chimera_core::authority::PlaneVerifier;
use chimera_core::route::Route;
use rusqlite::types::Value as SqlValue;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Data plane errors.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// Database open or query failure.
    #[error("database error: {0}")]
    Db(String),
    /// Filesystem failure.
    #[error("filesystem error: {0}")]
    Io(String),
    /// A path escapes the plane root.
    #[error("path escapes the plane root")]
    PathEscape,
    /// The requested record or file does not exist on this plane.
    #[error("not found")]
    NotFound,
}

// ============================================================================
// SECTION: Data Plane
// ============================================================================

/// One warrant-gated data plane.
#[derive(Debug)]
pub struct DataPlane {
    /// Route this plane serves.
    route: Route,
    /// Single-key verifier for this plane's warrants.
    verifier: PlaneVerifier,
    /// Record store.
    db: Mutex<Connection>,
    /// Filesystem root.
    file_root: PathBuf,
    /// Table serving the confidential file overlay.
    confidential_table: String,
}

impl DataPlane {
    /// Opens a plane over a database file and filesystem root.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError`] when the database cannot be opened.
    pub fn open(
        route: Route,
        verifier: PlaneVerifier,
        db_path: &Path,
        file_root: &Path,
        confidential_table: &str,
    ) -> Result<Self, PlaneError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| PlaneError::Io(err.to_string()))?;
        }
        let db = Connection::open(db_path).map_err(|err| PlaneError::Db(err.to_string()))?;
        Ok(Self::from_connection(route, verifier, db, file_root, confidential_table))
    }

    /// Builds a plane over an existing connection (tests use `:memory:`).
    #[must_use]
    pub fn from_connection(
        route: Route,
        verifier: PlaneVerifier,
        db: Connection,
        file_root: &Path,
        confidential_table: &str,
    ) -> Self {
        Self {
            route,
            verifier,
            db: Mutex::new(db),
            file_root: file_root.to_path_buf(),
            confidential_table: confidential_table.to_string(),
        }
    }

    /// Returns the route this plane serves.
    #[must_use]
    pub const fn route(&self) -> Route {
        self.route
    }

    /// Returns this plane's warrant verifier.
    #[must_use]
    pub const fn verifier(&self) -> &PlaneVerifier {
        &self.verifier
    }

    // --- Records ------------------------------------------------------------

    /// Fetches one record by id, returning the requested columns.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NotFound`] on a miss and [`PlaneError::Db`] on
    /// query failure.
    pub fn fetch_row(
        &self,
        table: &str,
        id_field: &str,
        fields: &[String],
        id: &Value,
    ) -> Result<Map<String, Value>, PlaneError> {
        let columns = fields.join(", ");
        let sql = format!("SELECT {columns} FROM {table} WHERE {id_field} = ?1");
        let db = lock_unpoisoned(&self.db);
        let mut statement = db.prepare(&sql).map_err(|err| PlaneError::Db(err.to_string()))?;
        let mut rows = statement
            .query([json_to_sql(id)])
            .map_err(|err| PlaneError::Db(err.to_string()))?;
        let row = rows.next().map_err(|err| PlaneError::Db(err.to_string()))?;
        let Some(row) = row else {
            return Err(PlaneError::NotFound);
        };
        let mut record = Map::new();
        for (index, field) in fields.iter().enumerate() {
            let value = row.get_ref(index).map_err(|err| PlaneError::Db(err.to_string()))?;
            record.insert(field.clone(), sql_to_json(value));
        }
        Ok(record)
    }

    /// Inserts a record; used to persist synthesized shadow rows.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::Db`] on insert failure.
    pub fn insert_row(&self, table: &str, record: &Map<String, Value>) -> Result<(), PlaneError> {
        let columns: Vec<&str> = record.keys().map(String::as_str).collect();
        let placeholders: Vec<String> =
            (1..=columns.len()).map(|index| format!("?{index}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<SqlValue> = record.values().map(json_to_sql).collect();
        let db = lock_unpoisoned(&self.db);
        db.execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|err| PlaneError::Db(err.to_string()))?;
        Ok(())
    }

    /// Ensures a table exists for synthesized records.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::Db`] on DDL failure.
    pub fn ensure_table(
        &self,
        table: &str,
        id_field: &str,
        fields: &[String],
    ) -> Result<(), PlaneError> {
        let columns: Vec<String> = fields
            .iter()
            .map(|field| {
                if field == id_field {
                    format!("{field} PRIMARY KEY")
                } else {
                    field.clone()
                }
            })
            .collect();
        let sql = format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", "));
        let db = lock_unpoisoned(&self.db);
        db.execute(&sql, []).map_err(|err| PlaneError::Db(err.to_string()))?;
        Ok(())
    }

    /// Looks up a path in the confidential overlay table.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NotFound`] on a miss.
    pub fn fetch_confidential(&self, path: &str) -> Result<String, PlaneError> {
        let sql = format!("SELECT content FROM {} WHERE path = ?1", self.confidential_table);
        let db = lock_unpoisoned(&self.db);
        let mut statement = db.prepare(&sql).map_err(|err| PlaneError::Db(err.to_string()))?;
        let mut rows =
            statement.query([path]).map_err(|err| PlaneError::Db(err.to_string()))?;
        let row = rows.next().map_err(|err| PlaneError::Db(err.to_string()))?;
        let Some(row) = row else {
            return Err(PlaneError::NotFound);
        };
        row.get::<_, String>(0).map_err(|err| PlaneError::Db(err.to_string()))
    }

    // --- Files --------------------------------------------------------------

    /// Reads a file confined to the plane root.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NotFound`] when the target is absent and
    /// [`PlaneError::PathEscape`] when the path climbs out of the root.
    pub fn read_file(&self, path: &str) -> Result<String, PlaneError> {
        let target = self.confine(path)?;
        if !target.is_file() {
            return Err(PlaneError::NotFound);
        }
        std::fs::read_to_string(&target).map_err(|err| PlaneError::Io(err.to_string()))
    }

    /// Writes a file under the plane root; used to persist synthesized
    /// shadow files.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError`] on confinement or I/O failure.
    pub fn write_file(&self, path: &str, content: &str) -> Result<(), PlaneError> {
        let target = self.confine(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PlaneError::Io(err.to_string()))?;
        }
        std::fs::write(&target, content).map_err(|err| PlaneError::Io(err.to_string()))
    }

    /// Lists a directory confined to the plane root, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NotFound`] when the target is not a directory.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, PlaneError> {
        let target = self.confine(path)?;
        if !target.is_dir() {
            return Err(PlaneError::NotFound);
        }
        let mut entries = Vec::new();
        let listing =
            std::fs::read_dir(&target).map_err(|err| PlaneError::Io(err.to_string()))?;
        for entry in listing {
            let entry = entry.map_err(|err| PlaneError::Io(err.to_string()))?;
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(entries)
    }

    /// Lexically confines a request path to the plane root.
    fn confine(&self, path: &str) -> Result<PathBuf, PlaneError> {
        let trimmed = path.trim_start_matches(['/', '\\']);
        let relative = Path::new(trimmed);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(PlaneError::PathEscape);
                }
            }
        }
        Ok(self.file_root.join(relative))
    }
}

// ============================================================================
// SECTION: Value Conversion
// ============================================================================

/// Maps a JSON value onto a SQLite parameter.
fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number.as_i64().map_or_else(
            || SqlValue::Real(number.as_f64().unwrap_or(0.0)),
            SqlValue::Integer,
        ),
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Maps a SQLite column value onto JSON.
fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => {
            Number::from_f64(number).map_or(Value::Null, Value::Number)
        }
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}

/// Locks a mutex, recovering the guard when a holder panicked.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
