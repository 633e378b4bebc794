//! Relational store: one SQLite table per content type.
//!
//! Tables are created from the schema on first use (`uuid` as primary key,
//! system timestamps and `state` as INTEGER, every other field untyped so
//! values keep the type they were written with). An existing table is never
//! altered; fields without a column are simply not persisted.
//!
//! Structured fields (`valueKind` `json`/`array`) are stored as JSON text and
//! decoded on read. Multi-valued relations are mirrored into
//! `crelish_relations` after the parent row is written.
//!
//! Filters and sort keys are evaluated by scalar functions registered on the
//! connection, which call the same value semantics the file store uses:
//!
//! | Function | Used for |
//! |----------|----------|
//! | `crelish_accepts(condition, value, structured)` | field conditions |
//! | `crelish_contains(value, token)` | freesearch tokens |
//! | `crelish_sort_rank(value)`, `crelish_sort_number(value)` | `ORDER BY` |

use super::{stamp_system_fields, with_retry, StorageBackend};
use crate::error::{CrelishError, Result};
use crate::model::{Attributes, Record, CREATED, FROM, STATE, TO, UPDATED, UUID};
use crate::processors::ProcessorRegistry;
use crate::query::{contains_ci, FieldFilter, FilterOp, FilterSpec, Page, SortSpec};
use crate::resolver::ModelResolver;
use crate::schema::{ContentTypeSchema, StorageMode};
use crate::value::{as_number, sort_rank, value_to_string};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

static IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

const INTEGER_COLUMNS: [&str; 5] = [STATE, CREATED, UPDATED, FROM, TO];

const RELATIONS_DDL: &str = "
    CREATE TABLE IF NOT EXISTS crelish_relations (
        ctype TEXT NOT NULL,
        uuid TEXT NOT NULL,
        field TEXT NOT NULL,
        related_uuid TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (ctype, uuid, field, position)
    );
    CREATE INDEX IF NOT EXISTS crelish_relations_related ON crelish_relations (related_uuid);
";

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Convert a stored JSON value into a bindable SQL value.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Read a column value the way it was saved. Structured columns hold JSON text.
fn from_sql(value: ValueRef<'_>, structured: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if structured {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("crelish_accepts", 3, flags, |ctx| {
        let condition: String = ctx.get(0)?;
        let filter: FieldFilter = serde_json::from_str(&condition)
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        let structured: bool = ctx.get(2)?;
        Ok(filter.accepts(&from_sql(ctx.get_raw(1), structured)))
    })?;

    conn.create_scalar_function("crelish_contains", 2, flags, |ctx| {
        let token: String = ctx.get(1)?;
        let value = from_sql(ctx.get_raw(0), false);
        Ok(contains_ci(&value_to_string(&value), &token))
    })?;

    conn.create_scalar_function("crelish_sort_rank", 1, flags, |ctx| {
        Ok(sort_rank(&from_sql(ctx.get_raw(0), false)) as i64)
    })?;

    conn.create_scalar_function("crelish_sort_number", 1, flags, |ctx| {
        Ok(as_number(&from_sql(ctx.get_raw(0), false)))
    })?;
    Ok(())
}

/// A WHERE clause and its parameters.
#[derive(Debug, Default)]
struct Predicate {
    sql: Vec<String>,
    params: Vec<SqlValue>,
}

impl Predicate {
    fn push(&mut self, sql: String, params: impl IntoIterator<Item = SqlValue>) {
        self.sql.push(sql);
        self.params.extend(params);
    }

    fn push_sql(&mut self, sql: String) {
        self.sql.push(sql);
    }

    fn clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql.join(" AND "))
        }
    }
}

fn is_structured(schema: &ContentTypeSchema, column: &str) -> bool {
    schema
        .field(column)
        .map(|f| f.value_kind.is_structured())
        .unwrap_or(false)
}

fn condition_sql(schema: &ContentTypeSchema, filter: &FieldFilter, pred: &mut Predicate) -> Result<()> {
    let col = quote(&filter.field);
    match &filter.op {
        // Identifier lookups stay on the primary key index.
        FilterOp::Strict(Value::String(uuid)) if filter.field == UUID => {
            pred.push(format!("{} = ?", col), [SqlValue::Text(uuid.clone())]);
        }
        _ => {
            let structured = i64::from(is_structured(schema, &filter.field));
            pred.push(
                format!("crelish_accepts(?, {}, {})", col, structured),
                [SqlValue::Text(serde_json::to_string(filter)?)],
            );
        }
    }
    Ok(())
}

fn where_clause(schema: &ContentTypeSchema, filter: &FilterSpec, columns: &[String]) -> Result<Predicate> {
    let mut pred = Predicate::default();
    for condition in &filter.conditions {
        if columns.contains(&condition.field) {
            condition_sql(schema, condition, &mut pred)?;
        } else {
            // Missing column reads as null, which no condition accepts.
            pred.push_sql("0".to_string());
        }
    }
    for token in &filter.freesearch {
        if columns.is_empty() {
            pred.push_sql("0".to_string());
            continue;
        }
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("crelish_contains({}, ?)", quote(c)))
            .collect();
        pred.push(
            format!("({})", ors.join(" OR ")),
            std::iter::repeat(SqlValue::Text(token.clone())).take(columns.len()),
        );
    }
    Ok(pred)
}

/// Null first, then numbers in numeric order, then text.
fn order_clause(sort: &SortSpec, columns: &[String]) -> String {
    let keys: Vec<String> = sort
        .keys
        .iter()
        .filter(|k| columns.contains(&k.field))
        .map(|k| {
            let col = quote(&k.field);
            let dir = k.direction.as_sql();
            format!(
                "crelish_sort_rank({c}) {d}, crelish_sort_number({c}) {d}, CAST({c} AS TEXT) {d}",
                c = col,
                d = dir
            )
        })
        .collect();
    if keys.is_empty() {
        " ORDER BY rowid ASC".to_string()
    } else {
        format!(" ORDER BY {}, rowid ASC", keys.join(", "))
    }
}

pub struct RelationalStore {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<ProcessorRegistry>,
    resolver: Option<Arc<ModelResolver>>,
    retries: u32,
    // table name -> column names, filled on first use
    tables: Mutex<HashMap<String, Vec<String>>>,
}

impl RelationalStore {
    pub fn open(path: &Path, registry: Arc<ProcessorRegistry>) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, registry)
    }

    pub fn open_in_memory(registry: Arc<ProcessorRegistry>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, registry)
    }

    fn with_connection(conn: Connection, registry: Arc<ProcessorRegistry>) -> Result<Self> {
        register_functions(&conn)?;
        conn.execute_batch(RELATIONS_DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
            resolver: None,
            retries: 3,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<ModelResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Table for a content type: the resolved model's table, else the
    /// lowercased type name.
    pub fn table_for(&self, ctype: &str) -> Result<String> {
        let table = match self.resolver.as_ref().map(|r| r.resolve(ctype)) {
            Some(Ok(model)) => model.table_name(),
            Some(Err(CrelishError::ModelNotFound(_))) | None => {
                debug!(ctype, "no model registered, using conventional table name");
                ctype.to_ascii_lowercase()
            }
            Some(Err(e)) => return Err(e),
        };
        if !IDENT.is_match(&table) {
            return Err(CrelishError::Store(format!("'{}' is not a valid table name", table)));
        }
        Ok(table)
    }

    fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Create the table for `schema` if needed and return its columns.
    fn ensure_table(&self, conn: &Connection, schema: &ContentTypeSchema) -> Result<(String, Vec<String>)> {
        let table = self.table_for(&schema.type_name)?;
        if let Some(columns) = self.tables.lock().get(&table) {
            return Ok((table, columns.clone()));
        }

        let mut columns = Self::table_columns(conn, &table)?;
        if columns.is_empty() {
            let defs: Vec<String> = schema
                .fields
                .iter()
                .filter(|f| IDENT.is_match(&f.key))
                .map(|f| {
                    if f.key == UUID {
                        format!("{} TEXT PRIMARY KEY NOT NULL", quote(&f.key))
                    } else if INTEGER_COLUMNS.contains(&f.key.as_str()) {
                        format!("{} INTEGER", quote(&f.key))
                    } else {
                        quote(&f.key)
                    }
                })
                .collect();
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote(&table),
                defs.join(", ")
            ))?;
            debug!(ctype = %schema.type_name, table = %table, "created content table");
            columns = Self::table_columns(conn, &table)?;
        }
        self.tables.lock().insert(table.clone(), columns.clone());
        Ok((table, columns))
    }

    /// Whether the content table has a column for `field`.
    pub fn has_attribute(&self, schema: &ContentTypeSchema, field: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let (_, columns) = self.ensure_table(&conn, schema)?;
        Ok(columns.iter().any(|c| c == field))
    }

    fn decode_row(schema: &ContentTypeSchema, columns: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Attributes> {
        let mut attrs = Attributes::new();
        for (i, name) in columns.iter().enumerate() {
            attrs.insert(name.clone(), from_sql(row.get_ref(i)?, is_structured(schema, name)));
        }
        Ok(attrs)
    }

    fn select_raw(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Attributes>> {
        let conn = self.conn.lock();
        let (table, columns) = self.ensure_table(&conn, schema)?;
        let pred = where_clause(schema, filter, &columns)?;
        let mut sql = format!(
            "SELECT {} FROM {}{}{}",
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
            quote(&table),
            pred.clause(),
            order_clause(sort, &columns)
        );
        let mut params = pred.params;
        if limit.is_some() || offset > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
            params.push(SqlValue::Integer(limit));
            params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        }
        debug!(ctype = %schema.type_name, sql = %sql, "relational query");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| Self::decode_row(schema, &columns, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count(&self, schema: &ContentTypeSchema, filter: &FilterSpec) -> Result<usize> {
        let conn = self.conn.lock();
        let (table, columns) = self.ensure_table(&conn, schema)?;
        let pred = where_clause(schema, filter, &columns)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", quote(&table), pred.clause());
        let count: i64 = conn.query_row(&sql, params_from_iter(pred.params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn process_all(&self, schema: &ContentTypeSchema, rows: Vec<Attributes>) -> Result<Vec<Record>> {
        rows.iter()
            .map(|raw| self.registry.process_record(schema, raw))
            .collect()
    }

    fn write_row(&self, schema: &ContentTypeSchema, data: &Attributes, uuid: &str, is_new: bool) -> Result<()> {
        let conn = self.conn.lock();
        let (table, columns) = self.ensure_table(&conn, schema)?;
        let writable: Vec<&String> = columns
            .iter()
            .filter(|c| data.contains_key(c.as_str()))
            .collect();
        let values: Vec<SqlValue> = writable.iter().map(|c| to_sql(&data[c.as_str()])).collect();

        if is_new {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&table),
                writable.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
                vec!["?"; writable.len()].join(", ")
            );
            conn.execute(&sql, params_from_iter(values.iter()))?;
        } else {
            let assignments: Vec<String> = writable
                .iter()
                .filter(|c| c.as_str() != UUID)
                .map(|c| format!("{} = ?", quote(c)))
                .collect();
            if assignments.is_empty() {
                return Ok(());
            }
            let mut params: Vec<SqlValue> = writable
                .iter()
                .zip(values)
                .filter(|(c, _)| c.as_str() != UUID)
                .map(|(_, v)| v)
                .collect();
            params.push(SqlValue::Text(uuid.to_string()));
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote(&table),
                assignments.join(", "),
                quote(UUID)
            );
            let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
            if changed == 0 {
                return Err(CrelishError::Store(format!(
                    "cannot update {}/{}: no such row",
                    schema.type_name, uuid
                )));
            }
        }
        Ok(())
    }

    /// Related uuids of a multi-valued relation, in saved order.
    pub fn related(&self, ctype: &str, uuid: &str, field: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT related_uuid FROM crelish_relations
             WHERE ctype = ?1 AND uuid = ?2 AND field = ?3 ORDER BY position",
        )?;
        let related = stmt
            .query_map(params![ctype, uuid, field], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(related)
    }
}

impl StorageBackend for RelationalStore {
    fn mode(&self) -> StorageMode {
        StorageMode::Relational
    }

    fn find_one(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<Option<Record>> {
        let filter = FilterSpec::new().strict(UUID, Value::String(uuid.to_string()));
        let mut rows = self.select_raw(schema, &filter, &SortSpec::new(), Some(1), 0)?;
        match rows.pop() {
            Some(raw) => Ok(Some(self.registry.process_record(schema, &raw)?)),
            None => Ok(None),
        }
    }

    fn find_all(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let rows = self.select_raw(schema, filter, sort, limit, 0)?;
        self.process_all(schema, rows)
    }

    fn find_all_raw(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Attributes>> {
        self.select_raw(schema, filter, sort, limit, 0)
    }

    fn get_page(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        page_size: usize,
        page: usize,
    ) -> Result<Page<Record>> {
        let page = page.max(1);
        let total_count = self.count(schema, filter)?;
        let (limit, offset) = if page_size == 0 {
            (None, 0)
        } else {
            (Some(page_size), (page - 1).saturating_mul(page_size))
        };
        let rows = self.select_raw(schema, filter, sort, limit, offset)?;
        Ok(Page {
            items: self.process_all(schema, rows)?,
            total_count,
            page_size,
            page,
        })
    }

    fn save(&self, schema: &ContentTypeSchema, mut data: Attributes, is_new: bool) -> Result<Record> {
        let uuid = stamp_system_fields(&mut data, is_new);
        if let Err(e) = with_retry(self.retries, "write row", || self.write_row(schema, &data, &uuid, is_new)) {
            error!(ctype = %schema.type_name, uuid = %uuid, error = %e, "failed to write row");
            return Err(e);
        }
        debug!(ctype = %schema.type_name, uuid = %uuid, is_new, "row written");
        self.registry.process_record(schema, &data)
    }

    fn delete(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let (table, _) = self.ensure_table(&conn, schema)?;
        let deleted = with_retry(self.retries, "delete row", || {
            Ok(conn.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", quote(&table), quote(UUID)),
                params![uuid],
            )?)
        })?;
        if deleted > 0 {
            conn.execute(
                "DELETE FROM crelish_relations WHERE ctype = ?1 AND uuid = ?2",
                params![schema.type_name, uuid],
            )?;
            debug!(ctype = %schema.type_name, uuid, "row deleted");
        }
        Ok(deleted > 0)
    }

    fn sync_relations(&self, ctype: &str, uuid: &str, field: &str, related: &[String]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM crelish_relations WHERE ctype = ?1 AND uuid = ?2 AND field = ?3",
            params![ctype, uuid, field],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO crelish_relations (ctype, uuid, field, related_uuid, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut seen = HashSet::new();
            for (position, related_uuid) in related.iter().filter(|r| seen.insert(r.as_str())).enumerate() {
                insert.execute(params![ctype, uuid, field, related_uuid, position as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
