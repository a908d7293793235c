//! Data readers: typed views over store fetches.

use crate::error::PluginError;
use crate::resource::Resource;
use crate::store::InputStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shape of data a library consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderKind {
    /// Local file path.
    #[default]
    File,
    /// In-memory table parsed from a delimited file.
    Table,
    /// Backend-native reference (connection string, URL).
    Native,
}

/// What a [`DataReader`] hands to a plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum DataHandle {
    Path(PathBuf),
    Table(Table),
    Native(String),
}

impl DataHandle {
    pub fn into_table(self) -> Result<Table, PluginError> {
        match self {
            DataHandle::Table(table) => Ok(table),
            DataHandle::Path(path) => Table::from_path(&path),
            DataHandle::Native(uri) => Err(PluginError::InvalidParams(format!(
                "expected tabular data, got native reference '{uri}'"
            ))),
        }
    }
}

/// Rows of string cells under a header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Parse a CSV file. TSV and Parquet are picked by extension.
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") | Some("pq") => return Self::from_parquet(path),
            Some("tsv") | Some("tab") => b'\t',
            _ => b',',
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, csv::Error>>()?;
        Ok(Self { headers, rows })
    }

    #[cfg(feature = "parquet")]
    fn from_parquet(path: &Path) -> Result<Self, PluginError> {
        use arrow::record_batch::RecordBatchReader;
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = std::fs::File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let schema = reader.schema();
        let headers: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                let cells: Vec<String> = batch
                    .columns()
                    .iter()
                    .map(|column| columnar::cell_text(column.as_ref(), row))
                    .collect();
                rows.push(cells);
            }
        }
        Ok(Self { headers, rows })
    }

    #[cfg(not(feature = "parquet"))]
    fn from_parquet(path: &Path) -> Result<Self, PluginError> {
        Err(PluginError::InvalidParams(format!(
            "{} is Parquet, which this build cannot read",
            path.display()
        )))
    }

    /// Append the rows of `parts` in order. Every part must carry the same
    /// header.
    pub fn concat(parts: impl IntoIterator<Item = Table>) -> Result<Self, PluginError> {
        let mut parts = parts.into_iter();
        let Some(mut table) = parts.next() else {
            return Ok(Self::default());
        };
        for part in parts {
            if part.headers != table.headers {
                return Err(PluginError::InvalidParams(format!(
                    "parts disagree on columns: [{}] vs [{}]",
                    table.headers.join(", "),
                    part.headers.join(", ")
                )));
            }
            table.rows.extend(part.rows);
        }
        Ok(table)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cells of one column; short rows yield empty cells.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }
}

/// A store bound to the reader kind a library asks for.
#[derive(Clone)]
pub struct DataReader {
    store: Arc<dyn InputStore>,
    kind: ReaderKind,
}

impl DataReader {
    pub fn new(store: Arc<dyn InputStore>, kind: ReaderKind) -> Self {
        Self { store, kind }
    }

    pub fn fetch(&self, locator: &str) -> Result<DataHandle, PluginError> {
        match self.kind {
            ReaderKind::File => Ok(DataHandle::Path(self.store.fetch_file(locator)?)),
            ReaderKind::Table => {
                let path = self.store.fetch_file(locator)?;
                Ok(DataHandle::Table(Table::from_path(&path)?))
            }
            ReaderKind::Native => Ok(DataHandle::Native(self.store.fetch_native(locator)?)),
        }
    }

    /// One handle per locator of `resource`.
    pub fn fetch_all(&self, resource: &Resource) -> Result<Vec<DataHandle>, PluginError> {
        resource
            .path
            .locators()
            .iter()
            .map(|locator| self.fetch(locator))
            .collect()
    }

    /// The whole of `resource` as one table; multi-file resources are
    /// concatenated.
    pub fn read_table(&self, resource: &Resource) -> Result<Table, PluginError> {
        let mut parts = Vec::new();
        for locator in resource.path.locators() {
            let path = self.store.fetch_file(locator)?;
            parts.push(Table::from_path(&path)?);
        }
        Table::concat(parts)
    }
}

#[cfg(feature = "parquet")]
pub(crate) mod columnar {
    use arrow::array::*;

    /// Text of one cell. Nulls read as empty cells.
    pub(crate) fn cell_text(array: &dyn Array, row: usize) -> String {
        if array.is_null(row) {
            return String::new();
        }
        if let Some(arr) = array.as_any().downcast_ref::<StringArray>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<LargeStringArray>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<Int32Array>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<Float64Array>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<Float32Array>() {
            return arr.value(row).to_string();
        }
        if let Some(arr) = array.as_any().downcast_ref::<BooleanArray>() {
            return arr.value(row).to_string();
        }
        arrow::util::display::array_value_to_string(array, row).unwrap_or_default()
    }
}

impl std::fmt::Debug for DataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReader")
            .field("store", &self.store.name())
            .field("kind", &self.kind)
            .finish()
    }
}
