//! The `sqlite` library: SQL query constraints.
//!
//! The builder loads every resource its constraints reference into one scratch
//! SQLite database, one table per resource named after the resource. Columns
//! use NUMERIC affinity so numeric text compares as numbers; empty cells load
//! as NULL. Each constraint runs one query and checks the result:
//!
//! ```yaml
//! - name: no-negative-totals
//!   type: sqlite
//!   resources: [orders]
//!   check:
//!     query: SELECT * FROM orders WHERE total < 0
//!     expect: empty
//! - name: three-customers
//!   type: sqlite
//!   resources: [orders]
//!   check:
//!     query: SELECT COUNT(DISTINCT customer) FROM orders
//!     expect: { value: 3 }
//! ```

use assayer::{
    Affinity, BuildRequest, Constraint, DataReader, Error, ErrorSummary, Library, LibraryDecl,
    NormalizedReport, Operation, Payload, Plugin, PluginBuilder, PluginError, PluginSpec,
    ReaderKind, RenderedArtifact, StoreError, Table, ValidationReport,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;

pub const NAME: &str = "sqlite";

pub struct SqliteLibrary {
    decl: LibraryDecl,
}

impl SqliteLibrary {
    pub fn new() -> Self {
        let decl = LibraryDecl::new(NAME, rusqlite::version())
            .description("SQL query constraints over resources loaded into SQLite")
            .operation(Operation::Validation, Affinity::Sequential)
            .reader(ReaderKind::File);
        Self { decl }
    }
}

impl Default for SqliteLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl Library for SqliteLibrary {
    fn decl(&self) -> &LibraryDecl {
        &self.decl
    }

    fn builder(&self, _: Operation) -> Box<dyn PluginBuilder> {
        Box::new(SqliteBuilder {
            decl: self.decl.clone(),
            database: None,
        })
    }
}

/// Expected query result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    Empty,
    NonEmpty,
    Exact(usize),
    Minimum(usize),
    Maximum(usize),
    Range { min: usize, max: usize },
    /// First column of the first row.
    Value(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCheck {
    pub query: String,
    #[serde(default = "default_expect")]
    pub expect: Expect,
}

fn default_expect() -> Expect {
    Expect::Empty
}

impl QueryCheck {
    pub fn from_constraint(constraint: &Constraint) -> Result<Self, PluginError> {
        serde_json::from_value(constraint.check.clone())
            .map_err(|e| PluginError::InvalidParams(format!("sqlite check: {e}")))
    }
}

/// Scratch database shared by the plugins of one builder.
struct Database {
    path: TempPath,
    /// Load failure per resource name.
    failed: HashMap<String, String>,
}

struct SqliteBuilder {
    decl: LibraryDecl,
    database: Option<Database>,
}

impl SqliteBuilder {
    fn create_database(&self) -> Result<Database, Error> {
        let path = tempfile::Builder::new()
            .prefix("assayer-")
            .suffix(".db")
            .tempfile()
            .map_err(StoreError::from)?
            .into_temp_path();
        Ok(Database {
            path,
            failed: HashMap::new(),
        })
    }
}

impl PluginBuilder for SqliteBuilder {
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<Vec<Box<dyn Plugin>>, Error> {
        let mut bound = Vec::new();
        for target in request.targets()? {
            let store = target.store.clone();
            if let Some((spec, _)) = request.bind(&self.decl, target) {
                bound.push((spec, store));
            }
        }
        if bound.is_empty() {
            return Ok(Vec::new());
        }

        let mut database = self.create_database()?;
        let conn = Connection::open(&database.path).map_err(|e| StoreError::Access {
            store: NAME.into(),
            message: e.to_string(),
        })?;
        let mut loaded = HashSet::new();
        for (spec, store) in &bound {
            let resource = &spec.resource;
            if !loaded.insert(resource.name.clone()) {
                continue;
            }
            let reader = DataReader::new(store.clone(), ReaderKind::Table);
            let result = reader
                .read_table(resource)
                .and_then(|table| load_table(&conn, &resource.name, &table))
                .map_err(|e| e.to_string());
            match result {
                Ok(rows) => {
                    tracing::debug!(resource = %resource.name, rows, "loaded into sqlite");
                }
                Err(e) => {
                    tracing::warn!(
                        resource = %resource.name,
                        error = %e,
                        "failed to load resource"
                    );
                    database.failed.insert(resource.name.clone(), e);
                }
            }
        }
        drop(conn);

        let path: Arc<Path> = Arc::from(database.path.to_path_buf());
        let plugins = bound
            .into_iter()
            .map(|(spec, _)| {
                let load_error = database.failed.get(&spec.resource.name).cloned();
                Box::new(SqlitePlugin {
                    spec,
                    database: path.clone(),
                    load_error,
                }) as Box<dyn Plugin>
            })
            .collect();
        self.database = Some(database);
        Ok(plugins)
    }

    fn destroy(&mut self) {
        if let Some(database) = self.database.take() {
            let path: PathBuf = database.path.to_path_buf();
            if let Err(e) = database.path.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove sqlite database"
                );
            }
        }
    }
}

/// Load `data` as a table named `table`. Returns the row count.
fn load_table(conn: &Connection, table: &str, data: &Table) -> Result<usize, PluginError> {
    if data.headers.is_empty() {
        return Err(PluginError::Failed(format!("'{table}' has no header")));
    }
    let columns: Vec<String> = data
        .headers
        .iter()
        .map(|h| format!("{} NUMERIC", quote_ident(h)))
        .collect();
    let sql_error = |e: rusqlite::Error| PluginError::Failed(format!("sqlite: {e}"));

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({columns});",
        table = quote_ident(table),
        columns = columns.join(", ")
    ))
    .map_err(sql_error)?;

    let width = data.column_count();
    let placeholders = vec!["?"; width].join(", ");
    let insert = format!("INSERT INTO {} VALUES ({placeholders})", quote_ident(table));
    conn.execute_batch("BEGIN").map_err(sql_error)?;
    let inserted = (|| -> Result<usize, PluginError> {
        let mut stmt = conn.prepare(&insert).map_err(sql_error)?;
        for record in &data.rows {
            let values: Vec<Option<&str>> = (0..width)
                .map(|i| record.get(i).map(String::as_str).filter(|c| !c.trim().is_empty()))
                .collect();
            stmt.execute(rusqlite::params_from_iter(values))
                .map_err(sql_error)?;
        }
        Ok(data.row_count())
    })();
    match inserted {
        Ok(rows) => {
            conn.execute_batch("COMMIT").map_err(sql_error)?;
            Ok(rows)
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK").map_err(sql_error)?;
            Err(e)
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(b.iter().map(|byte| format!("{byte:02x}")).collect::<String>()),
    }
}

/// Numbers compare by value, everything else structurally.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

pub struct SqlitePlugin {
    spec: PluginSpec,
    database: Arc<Path>,
    load_error: Option<String>,
}

impl SqlitePlugin {
    /// Rows as column-keyed objects, and the first column of the first row.
    fn query(&self, sql: &str) -> Result<(Vec<Value>, Value), PluginError> {
        let sql_error = |e: rusqlite::Error| PluginError::Failed(format!("sqlite: {e}"));
        let conn = Connection::open_with_flags(&*self.database, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(sql_error)?;
        let mut stmt = conn.prepare(sql).map_err(sql_error)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt.query([]).map_err(sql_error)?;
        let mut out = Vec::new();
        let mut first = Value::Null;
        while let Some(row) = rows.next().map_err(sql_error)? {
            let mut object = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                let value = to_json(row.get_ref(i).map_err(sql_error)?);
                if out.is_empty() && i == 0 {
                    first = value.clone();
                }
                object.insert(name.clone(), value);
            }
            out.push(Value::Object(object));
        }
        Ok((out, first))
    }
}

/// Violation records for `rows` under `expect`.
fn evaluate(expect: &Expect, rows: &[Value], first: &Value) -> Vec<Value> {
    let n = rows.len();
    let count_failure = |rule: &str| vec![json!({ "rule": rule, "rows": n })];
    match expect {
        Expect::Empty => rows.to_vec(),
        Expect::NonEmpty if n == 0 => count_failure("non_empty"),
        Expect::Exact(expected) if n != *expected => count_failure("exact"),
        Expect::Minimum(min) if n < *min => count_failure("minimum"),
        Expect::Maximum(max) if n > *max => count_failure("maximum"),
        Expect::Range { min, max } if n < *min || n > *max => count_failure("range"),
        Expect::Value(expected) if !values_match(first, expected) => {
            vec![json!({ "rule": "value", "expected": expected, "actual": first })]
        }
        _ => Vec::new(),
    }
}

impl Plugin for SqlitePlugin {
    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    fn framework_name(&self) -> &str {
        NAME
    }

    fn framework_version(&self) -> String {
        rusqlite::version().to_string()
    }

    fn run_operation(&self) -> Result<Value, PluginError> {
        let start = Instant::now();
        if let Some(error) = &self.load_error {
            return Err(PluginError::Failed(format!(
                "resource '{}' not loaded: {error}",
                self.spec.resource.name
            )));
        }
        let Payload::Constraint(constraint) = &self.spec.payload else {
            return Err(PluginError::InvalidParams("validation needs a constraint".into()));
        };
        let check = QueryCheck::from_constraint(constraint)?;
        let (rows, first) = self.query(&check.query)?;
        let records = evaluate(&check.expect, &rows, &first);
        let count = records.len();
        Ok(json!({
            "valid": count == 0,
            "count": count,
            "rows": rows.len(),
            "records": self.spec.error_report.apply(records),
            "duration": start.elapsed().as_secs_f64(),
        }))
    }

    fn render_report(&self, raw: &Value) -> Result<NormalizedReport, PluginError> {
        let Payload::Constraint(constraint) = &self.spec.payload else {
            return Err(PluginError::InvalidParams("validation needs a constraint".into()));
        };
        let count = raw["count"].as_u64().unwrap_or_default() as usize;
        Ok(NormalizedReport::Validation(ValidationReport {
            framework: self.framework(),
            resource: self.spec.resource.name.clone(),
            duration: raw["duration"].as_f64().unwrap_or_default(),
            constraint: constraint.clone(),
            valid: count == 0,
            errors: ErrorSummary {
                count,
                records: raw["records"].as_array().cloned().unwrap_or_default(),
            },
        }))
    }

    fn render_artifact(&self, raw: &Value) -> Result<Vec<RenderedArtifact>, PluginError> {
        let mut value = raw.clone();
        if let Some(object) = value.as_object_mut() {
            object.remove("duration");
            object.insert("resource".into(), json!(self.spec.resource.name));
        }
        Ok(vec![RenderedArtifact::json(value, "report.json")])
    }
}
