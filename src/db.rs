use std::collections::BTreeSet;
use std::io::Write;

use log::debug;
use postgres::{Client, NoTls};

use crate::error::{ConfigError, DbError, RunError};
use crate::schema::TableDef;
use crate::sql;

/// The wire operations the sink needs. Two implementations: a live
/// PostgreSQL connection and an in-memory recorder for tests.
pub trait Database {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError>;
    fn batch_execute(&mut self, sql: &str) -> Result<(), DbError>;
    /// Run a COPY ... FROM STDIN with the given text-format payload.
    fn copy(&mut self, sql: &str, data: &[u8]) -> Result<u64, DbError>;
    /// Run a batched row deletion built by sql::delete_rows.
    fn delete_ids(
        &mut self,
        sql: &str,
        id_type: Option<&str>,
        ids: &[i64],
    ) -> Result<u64, DbError>;
    fn exists(&mut self, sql: &str, name: &str) -> Result<bool, DbError>;
}

pub struct PgDatabase {
    client: Client,
}

impl PgDatabase {
    pub fn connect(connectionstring: &str) -> Result<Self, DbError> {
        let client = Client::connect(connectionstring, NoTls).map_err(DbError::Connect)?;
        Ok(Self { client })
    }
}

impl Database for PgDatabase {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        debug!("{sql}");
        Ok(self.client.execute(sql, &[])?)
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), DbError> {
        debug!("{sql}");
        Ok(self.client.batch_execute(sql)?)
    }

    fn copy(&mut self, sql: &str, data: &[u8]) -> Result<u64, DbError> {
        debug!("{sql}");
        let mut writer = self
            .client
            .copy_in(sql)
            .map_err(|source| DbError::Copy { context: sql.to_string(), source })?;
        writer
            .write_all(data)
            .map_err(|source| DbError::CopyWrite { context: sql.to_string(), source })?;
        writer
            .finish()
            .map_err(|source| DbError::Copy { context: sql.to_string(), source })
    }

    fn delete_ids(
        &mut self,
        sql: &str,
        id_type: Option<&str>,
        ids: &[i64],
    ) -> Result<u64, DbError> {
        debug!("{sql} [{} ids]", ids.len());
        match id_type {
            Some(t) => Ok(self.client.execute(sql, &[&t, &ids])?),
            None => Ok(self.client.execute(sql, &[&ids])?),
        }
    }

    fn exists(&mut self, sql: &str, name: &str) -> Result<bool, DbError> {
        debug!("{sql} [{name}]");
        Ok(!self.client.query(sql, &[&name])?.is_empty())
    }
}

/// Recording database used by tests: statements in submission order,
/// COPY payloads split into rows.
#[derive(Debug, Default)]
pub struct MemoryDb {
    pub ops: Vec<RecordedOp>,
    /// None means every name exists.
    pub known_schemas: Option<Vec<String>>,
    pub known_tablespaces: Option<Vec<String>>,
    pub known_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    Exec(String),
    Copy { sql: String, rows: Vec<String> },
    Delete {
        sql: String,
        id_type: Option<String>,
        ids: Vec<i64>,
    },
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copied_rows(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                RecordedOp::Copy { rows, .. } => rows.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn copy_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, RecordedOp::Copy { .. }))
            .count()
    }
}

impl Database for MemoryDb {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.ops.push(RecordedOp::Exec(sql.to_string()));
        Ok(0)
    }

    fn batch_execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.ops.push(RecordedOp::Exec(sql.to_string()));
        Ok(())
    }

    fn copy(&mut self, sql: &str, data: &[u8]) -> Result<u64, DbError> {
        let text = String::from_utf8_lossy(data);
        let rows: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        let n = rows.len() as u64;
        self.ops.push(RecordedOp::Copy { sql: sql.to_string(), rows });
        Ok(n)
    }

    fn delete_ids(
        &mut self,
        sql: &str,
        id_type: Option<&str>,
        ids: &[i64],
    ) -> Result<u64, DbError> {
        self.ops.push(RecordedOp::Delete {
            sql: sql.to_string(),
            id_type: id_type.map(|t| t.to_string()),
            ids: ids.to_vec(),
        });
        Ok(ids.len() as u64)
    }

    fn exists(&mut self, sql: &str, name: &str) -> Result<bool, DbError> {
        let known = if sql.contains("pg_namespace") {
            &self.known_schemas
        } else if sql.contains("pg_tablespace") {
            &self.known_tablespaces
        } else {
            &self.known_extensions
        };
        Ok(match known {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        })
    }
}

/// Validate, before any data flows, that everything the table
/// definitions reference is present in the target database. Errors
/// name the identifier and the SQL that would create it.
pub fn check_capabilities(
    db: &mut dyn Database,
    tables: &[TableDef],
) -> Result<(), RunError> {
    let mut schemas = BTreeSet::new();
    let mut tablespaces = BTreeSet::new();
    let mut extensions = BTreeSet::new();
    for table in tables {
        if let Some(s) = &table.schema {
            schemas.insert(s.clone());
        }
        for ts in [&table.data_tablespace, &table.index_tablespace].into_iter().flatten() {
            tablespaces.insert(ts.clone());
        }
        for index in &table.indexes {
            if let Some(ts) = &index.tablespace {
                tablespaces.insert(ts.clone());
            }
        }
        for column in &table.columns {
            if column.ctype.is_geometry() {
                extensions.insert("postgis".to_string());
            }
            if column.ctype == crate::schema::ColumnType::Hstore {
                extensions.insert("hstore".to_string());
            }
        }
    }
    for s in schemas {
        if !db.exists(sql::schema_exists(), &s)? {
            return Err(ConfigError::MissingSchema(s).into());
        }
    }
    for ts in tablespaces {
        if !db.exists(sql::tablespace_exists(), &ts)? {
            return Err(ConfigError::MissingTablespace(ts).into());
        }
    }
    for ext in extensions {
        if !db.exists(sql::extension_exists(), &ext)? {
            return Err(ConfigError::MissingExtension(ext).into());
        }
    }
    Ok(())
}
