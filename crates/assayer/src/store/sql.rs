//! SQLite table store.

use super::{InputStore, ResourceCache};
use crate::error::StoreError;
use crate::resource::StoreParameters;
use arrow::array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store whose resources are tables (or views) of a SQLite database.
///
/// Config keys: `database` (required). `fetch_file` materializes the table
/// as a Parquet file; `fetch_native` hands out a connection string.
pub struct SqlStore {
    params: StoreParameters,
    cache: ResourceCache,
    database: String,
}

impl SqlStore {
    pub fn new(params: StoreParameters) -> Result<Self, StoreError> {
        let database = params
            .config_str("database")
            .ok_or_else(|| StoreError::access(&params.name, "missing database"))?
            .to_string();
        Ok(Self {
            params,
            cache: ResourceCache::new()?,
            database,
        })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Connection::open_with_flags(&self.database, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| StoreError::access(&self.params.name, e))
    }

    /// The table must exist.
    fn probe(&self, conn: &Connection, table: &str) -> Result<(), StoreError> {
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::access(&self.params.name, e))?;
        if count == 0 {
            return Err(StoreError::ResourceNotFound {
                store: self.params.name.clone(),
                locator: table.to_string(),
            });
        }
        Ok(())
    }

    fn write_parquet(&self, conn: &Connection, table: &str, path: &Path) -> Result<(), StoreError> {
        let access = |e: rusqlite::Error| StoreError::access(&self.params.name, e);
        let sql = format!("SELECT * FROM {}", quote_ident(table));
        let mut stmt = conn.prepare(&sql).map_err(access)?;
        let headers: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
        let mut rows = stmt.query([]).map_err(access)?;
        while let Some(row) = rows.next().map_err(access)? {
            for (i, column) in columns.iter_mut().enumerate() {
                column.push(row.get::<_, Value>(i).map_err(access)?);
            }
        }

        let fields: Vec<Field> = headers
            .iter()
            .zip(&columns)
            .map(|(name, values)| Field::new(name, column_type(values), true))
            .collect();
        let arrays: Vec<ArrayRef> = fields
            .iter()
            .zip(&columns)
            .map(|(field, values)| column_array(field.data_type(), values))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(io_err)?;

        let file = std::fs::File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None).map_err(io_err)?;
        writer.write(&batch).map_err(io_err)?;
        writer.close().map_err(io_err)?;
        Ok(())
    }
}

impl InputStore for SqlStore {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let conn = self.connect()?;
        self.probe(&conn, locator)?;
        let path = self.cache.temp_path(&format!("{locator}.parquet"));
        self.write_parquet(&conn, locator, &path)?;
        Ok(path)
    }

    fn fetch_native(&self, locator: &str) -> Result<String, StoreError> {
        let conn = self.connect()?;
        self.probe(&conn, locator)?;
        Ok(format!("sqlite://{}", self.database))
    }
}

fn io_err(e: impl std::error::Error + Send + Sync + 'static) -> StoreError {
    StoreError::Io(std::io::Error::other(e))
}

/// Quote an identifier for interpolation into SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Int64 when every value is an integer, Float64 when every value is numeric,
/// Utf8 otherwise. Nulls do not count.
fn column_type(values: &[Value]) -> DataType {
    let mut kind = DataType::Int64;
    for value in values {
        match value {
            Value::Null | Value::Integer(_) => {}
            Value::Real(_) => kind = DataType::Float64,
            Value::Text(_) | Value::Blob(_) => return DataType::Utf8,
        }
    }
    if values.iter().all(|v| matches!(v, Value::Null)) {
        return DataType::Utf8;
    }
    kind
}

fn column_array(kind: &DataType, values: &[Value]) -> ArrayRef {
    match kind {
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Integer(i) => builder.append_value(*i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Integer(i) => builder.append_value(*i as f64),
                    Value::Real(f) => builder.append_value(*f),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for value in values {
                match cell_to_string(value) {
                    Some(text) => builder.append_value(text),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn cell_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(t) => Some(t.clone()),
        Value::Blob(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}
