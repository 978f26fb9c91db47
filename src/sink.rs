use std::collections::BTreeMap;

use log::{info, warn};

use crate::db::Database;
use crate::error::DbError;
use crate::evaluator::{table_id_value, StagedRow, Value};
use crate::osm::{OsmId, Tags};
use crate::schema::{Cluster, TableDef};
use crate::sql;
use crate::wkb;

/// Staging buffers flush once they hold this many bytes.
pub const DEFAULT_FLUSH_WATERMARK: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// COPY into freshly created staging tables, rename at commit.
    Import,
    /// Delete-then-insert against the live tables.
    Update,
}

struct TableState {
    def: TableDef,
    /// Buffered COPY lines keyed by the id column value, so a later
    /// delete of the same primitive can drop rows that were never
    /// flushed. At commit the table holds exactly the last row-set
    /// emitted per id.
    rows: Vec<(i64, String)>,
    bytes: usize,
    /// Ids whose rows must be deleted before the next COPY, grouped
    /// by id_type value (None for single-type tables).
    pending_deletes: BTreeMap<Option<char>, Vec<i64>>,
    staged_rows: u64,
    copies: u64,
}

/// Per-table bulk-load staging and the commit protocols.
pub struct Sink {
    tables: Vec<TableState>,
    mode: SinkMode,
    updatable: bool,
    default_srid: u32,
    watermark: usize,
}

impl Sink {
    pub fn new(
        defs: &[TableDef],
        mode: SinkMode,
        updatable: bool,
        default_srid: u32,
        watermark: usize,
    ) -> Self {
        if updatable || mode == SinkMode::Update {
            for def in defs {
                if def.ids.is_none() {
                    warn!(
                        "Table '{}' doesn't have an id column. Updates will not work!",
                        def.name
                    );
                }
            }
        }
        Self {
            tables: defs
                .iter()
                .map(|def| TableState {
                    def: def.clone(),
                    rows: Vec::new(),
                    bytes: 0,
                    pending_deletes: BTreeMap::new(),
                    staged_rows: 0,
                    copies: 0,
                })
                .collect(),
            mode,
            updatable,
            default_srid,
            watermark,
        }
    }

    /// Drop leftovers and create the staging tables. Import only.
    pub fn create_tables(&mut self, db: &mut dyn Database) -> Result<(), DbError> {
        for state in &self.tables {
            let def = &state.def;
            info!("Creating table '{}'", def.name);
            db.execute(&sql::drop_table(def.schema.as_deref(), &def.staging_name()))?;
            db.execute(&sql::drop_table(def.schema.as_deref(), &def.name))?;
            db.execute(&sql::create_table(def, &def.staging_name(), self.default_srid))?;
        }
        Ok(())
    }

    /// Queue the deletion of all rows a primitive may have produced:
    /// rows already in the database get a batched DELETE before the
    /// next COPY, rows still in the buffer are dropped outright.
    /// No-op on tables that cannot be keyed by the primitive.
    pub fn mark_delete(&mut self, id: OsmId) {
        for state in &mut self.tables {
            let Some(ids) = &state.def.ids else { continue };
            if !ids.kind.accepts(id.kind) {
                continue;
            }
            let id_value = table_id_value(ids, id);
            let key = ids.type_column.as_ref().map(|_| id.kind.as_char());
            state.pending_deletes.entry(key).or_default().push(id_value);
            let mut removed_bytes = 0;
            let mut removed_rows = 0;
            state.rows.retain(|(rid, line)| {
                if *rid == id_value {
                    removed_bytes += line.len();
                    removed_rows += 1;
                    false
                } else {
                    true
                }
            });
            state.bytes -= removed_bytes;
            state.staged_rows -= removed_rows;
        }
    }

    pub fn stage(&mut self, db: &mut dyn Database, row: StagedRow) -> Result<(), DbError> {
        let state = &mut self.tables[row.table];
        let id_value = match &state.def.ids {
            Some(ids) => table_id_value(ids, row.id),
            None => row.id.id,
        };
        let encoded = encode_row(&state.def, &row.values);
        state.bytes += encoded.len();
        state.rows.push((id_value, encoded));
        state.staged_rows += 1;
        if state.bytes >= self.watermark {
            self.flush_table(db, row.table)?;
        }
        Ok(())
    }

    /// Drain pending deletes, then COPY the buffered rows. Deletes go
    /// first so re-inserted rows survive.
    pub fn flush_table(&mut self, db: &mut dyn Database, idx: usize) -> Result<(), DbError> {
        let state = &mut self.tables[idx];
        if let Some(policy) = state.def.ids.clone() {
            let deletes = std::mem::take(&mut state.pending_deletes);
            for (type_char, ids) in deletes {
                let stmt = sql::delete_rows(
                    &state.def,
                    &policy.column,
                    policy.type_column.as_deref(),
                );
                let type_string = type_char.map(|c| c.to_string());
                db.delete_ids(&stmt, type_string.as_deref(), &ids)?;
            }
        }
        let state = &mut self.tables[idx];
        if state.rows.is_empty() {
            return Ok(());
        }
        let target = match self.mode {
            SinkMode::Import => state.def.staging_name(),
            SinkMode::Update => state.def.name.clone(),
        };
        let copy_sql = sql::copy_into(&state.def, &target);
        let rows = std::mem::take(&mut state.rows);
        state.bytes = 0;
        let data: String = rows.into_iter().map(|(_, line)| line).collect();
        db.copy(&copy_sql, data.as_bytes())?;
        state.copies += 1;
        Ok(())
    }

    pub fn flush_all(&mut self, db: &mut dyn Database) -> Result<(), DbError> {
        for idx in 0..self.tables.len() {
            self.flush_table(db, idx)?;
        }
        Ok(())
    }

    /// Import commit: per table, build indexes, cluster, analyze, then
    /// atomically release the staging name to the final name.
    pub fn commit_import(&mut self, db: &mut dyn Database) -> Result<(), DbError> {
        self.flush_all(db)?;
        for state in &self.tables {
            let def = &state.def;
            let staging = def.staging_name();
            info!("Imported {} rows into '{}'", state.staged_rows, def.name);
            for index in def.effective_indexes(self.updatable) {
                info!("Creating index on '{}' ({})", def.name, index.columns.join(", "));
                db.execute(&sql::create_index(def, &staging, &index))?;
            }
            if let Some(columns) = def.id_index_columns(self.updatable) {
                info!("Creating id index on '{}'", def.name);
                db.execute(&sql::create_id_index(def, &staging, &columns))?;
            }
            if def.cluster == Cluster::Auto {
                // Validation guarantees a geometry column here.
                if let Some(geom) = def.geom_column() {
                    let index = sql::index_name(def, &[geom.name.clone()]);
                    info!("Clustering '{}'", def.name);
                    db.execute(&sql::cluster(def, &staging, &index))?;
                }
            }
            info!("Analyzing '{}'", def.name);
            db.execute(&sql::analyze(def.schema.as_deref(), &staging))?;
            db.execute(&sql::rename_table(def.schema.as_deref(), &staging, &def.name))?;
        }
        Ok(())
    }

    /// Update commit: everything still staged goes out; the tables are
    /// live, so there is nothing to rename.
    pub fn commit_update(&mut self, db: &mut dyn Database) -> Result<(), DbError> {
        self.flush_all(db)
    }

    pub fn staged_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.staged_rows).sum()
    }

    pub fn copies(&self) -> u64 {
        self.tables.iter().map(|t| t.copies).sum()
    }
}

fn encode_row(def: &TableDef, values: &[Value]) -> String {
    let mut line = String::new();
    for (i, (column, value)) in def.load_columns().zip(values).enumerate() {
        if i > 0 {
            line.push('\t');
        }
        match value {
            Value::Null => line.push_str(sql::COPY_NULL),
            Value::Bool(b) => line.push(if *b { 't' } else { 'f' }),
            Value::Int(n) => line.push_str(&n.to_string()),
            Value::Real(r) => line.push_str(&r.to_string()),
            Value::Text(t) => sql::copy_escape(&mut line, t),
            Value::Tags(tags) => match column.ctype {
                crate::schema::ColumnType::Hstore => {
                    sql::copy_escape(&mut line, &hstore_literal(tags))
                }
                _ => sql::copy_escape(
                    &mut line,
                    &serde_json::to_string(tags).unwrap_or_default(),
                ),
            },
            Value::Geom(g) => line.push_str(&wkb::encode_hex(g)),
        }
    }
    line.push('\n');
    line
}

fn hstore_literal(tags: &Tags) -> String {
    let mut out = String::new();
    for (i, (k, v)) in tags.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        hstore_quote(&mut out, k);
        out.push_str("=>");
        hstore_quote(&mut out, v);
    }
    out
}

fn hstore_quote(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDb, RecordedOp};
    use crate::schema::{Column, ColumnType, IdKind, IdPolicy};

    fn poi_table() -> TableDef {
        TableDef {
            name: "pois".into(),
            schema: None,
            cluster: Cluster::No,
            data_tablespace: None,
            index_tablespace: None,
            ids: Some(IdPolicy {
                kind: IdKind::Node,
                column: "osm_id".into(),
                type_column: None,
                always_index: false,
            }),
            columns: vec![
                Column::new("osm_id", ColumnType::IdNum),
                Column::new("name", ColumnType::Text),
            ],
            indexes: Vec::new(),
        }
    }

    fn row(id: i64, name: &str) -> StagedRow {
        StagedRow {
            table: 0,
            id: OsmId::node(id),
            values: vec![Value::Int(id), Value::Text(name.into())],
        }
    }

    #[test]
    fn watermark_triggers_intermediate_flush() {
        let defs = vec![poi_table()];
        let mut sink = Sink::new(&defs, SinkMode::Import, false, 3857, 64);
        let mut db = MemoryDb::new();
        for i in 0..100 {
            sink.stage(&mut db, row(i, "some point of interest")).unwrap();
        }
        sink.flush_all(&mut db).unwrap();
        assert!(db.copy_count() > 1, "expected at least one watermark flush");
        assert_eq!(sink.copies(), db.copy_count() as u64);
        assert_eq!(db.copied_rows(), 100);
        assert_eq!(sink.staged_rows(), 100);
    }

    #[test]
    fn update_deletes_run_before_copy() {
        let defs = vec![poi_table()];
        let mut sink = Sink::new(&defs, SinkMode::Update, true, 3857, 1 << 20);
        let mut db = MemoryDb::new();
        sink.mark_delete(OsmId::node(5));
        sink.stage(&mut db, row(5, "renamed")).unwrap();
        sink.flush_all(&mut db).unwrap();
        let ops: Vec<&RecordedOp> = db.ops.iter().collect();
        assert_eq!(ops.len(), 2);
        match (&ops[0], &ops[1]) {
            (RecordedOp::Delete { ids, .. }, RecordedOp::Copy { sql, rows }) => {
                assert_eq!(ids, &vec![5]);
                assert!(sql.contains("\"pois\""));
                assert_eq!(rows, &vec!["5\trenamed".to_string()]);
            }
            other => panic!("unexpected op order: {other:?}"),
        }
    }

    #[test]
    fn import_commit_protocol_order() {
        let mut geom_table = poi_table();
        geom_table.columns.push(Column::new("geom", ColumnType::Point));
        geom_table.cluster = Cluster::Auto;
        let defs = vec![geom_table];
        let mut sink = Sink::new(&defs, SinkMode::Import, false, 3857, 1 << 20);
        let mut db = MemoryDb::new();
        sink.create_tables(&mut db).unwrap();
        sink.stage(&mut db, StagedRow {
            table: 0,
            id: OsmId::node(1),
            values: vec![Value::Int(1), Value::Null, Value::Null],
        })
        .unwrap();
        sink.commit_import(&mut db).unwrap();
        let stmts: Vec<String> = db
            .ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Exec(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        let pos = |needle: &str| {
            stmts
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("missing statement containing {needle}"))
        };
        let create = pos("CREATE TABLE \"pois_staging\"");
        let index = pos("CREATE INDEX \"pois_geom_idx\"");
        let cluster = pos("CLUSTER \"pois_staging\"");
        let analyze = pos("ANALYZE \"pois_staging\"");
        let rename = pos("RENAME TO \"pois\"");
        assert!(create < index && index < cluster && cluster < analyze && analyze < rename);
        // gist default index carries fillfactor 100 on non-updatable runs
        assert!(stmts[index].contains("gist"));
        assert!(stmts[index].contains("fillfactor=100"));
    }

    #[test]
    fn copy_targets_staging_on_import_and_live_on_update() {
        let defs = vec![poi_table()];
        let mut db = MemoryDb::new();
        let mut import = Sink::new(&defs, SinkMode::Import, false, 3857, 1 << 20);
        import.stage(&mut db, row(1, "a")).unwrap();
        import.flush_all(&mut db).unwrap();
        let mut update = Sink::new(&defs, SinkMode::Update, true, 3857, 1 << 20);
        update.stage(&mut db, row(2, "b")).unwrap();
        update.flush_all(&mut db).unwrap();
        let copies: Vec<&str> = db
            .ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Copy { sql, .. } => Some(sql.as_str()),
                _ => None,
            })
            .collect();
        assert!(copies[0].contains("\"pois_staging\""));
        assert!(copies[1].contains("COPY \"pois\""));
    }

    #[test]
    fn hstore_rendering() {
        let mut tags = Tags::new();
        tags.insert("name".into(), "O'Brien \"pub\"".into());
        tags.insert("amenity".into(), "pub".into());
        let lit = hstore_literal(&tags);
        assert_eq!(lit, "\"amenity\"=>\"pub\",\"name\"=>\"O'Brien \\\"pub\\\"\"");
    }
}
