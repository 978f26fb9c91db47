use crate::schema::{IndexDef, TableDef};

/// Identifiers have been through check_identifier, so plain quoting is
/// enough.
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

pub fn qualified_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) => format!("\"{s}\".\"{name}\""),
        None => format!("\"{name}\""),
    }
}

pub fn tablespace_clause(name: Option<&str>) -> String {
    match name {
        Some(n) => format!(" TABLESPACE \"{n}\""),
        None => String::new(),
    }
}

pub fn drop_table(schema: Option<&str>, name: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", qualified_name(schema, name))
}

pub fn create_table(table: &TableDef, name: &str, default_srid: u32) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            let mut col = format!("{} {}", quote_ident(&c.name), c.effective_sql_type(default_srid));
            if c.not_null {
                col.push_str(" NOT NULL");
            }
            col
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {} ({}){}",
        qualified_name(table.schema.as_deref(), name),
        columns,
        tablespace_clause(table.data_tablespace.as_deref()),
    )
}

pub fn copy_into(table: &TableDef, name: &str) -> String {
    let columns = table
        .load_columns()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "COPY {} ({}) FROM STDIN",
        qualified_name(table.schema.as_deref(), name),
        columns,
    )
}

pub fn index_name(table: &TableDef, columns: &[String]) -> String {
    format!("{}_{}_idx", table.name, columns.join("_"))
}

pub fn create_index(table: &TableDef, on: &str, index: &IndexDef) -> String {
    let mut sql = format!(
        "CREATE INDEX \"{}\" ON {} USING {} ({})",
        index_name(table, &index.columns),
        qualified_name(table.schema.as_deref(), on),
        index.method,
        index.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
    );
    if let Some(ff) = index.fillfactor {
        sql.push_str(&format!(" WITH (fillfactor={ff})"));
    }
    sql.push_str(&tablespace_clause(index.tablespace.as_deref()));
    if let Some(w) = &index.where_clause {
        sql.push_str(&format!(" WHERE {w}"));
    }
    sql
}

pub fn create_id_index(table: &TableDef, on: &str, columns: &[String]) -> String {
    create_index(
        table,
        on,
        &IndexDef {
            method: "btree".into(),
            columns: columns.to_vec(),
            tablespace: table.index_tablespace.clone(),
            fillfactor: None,
            where_clause: None,
        },
    )
}

pub fn cluster(table: &TableDef, on: &str, index: &str) -> String {
    format!(
        "CLUSTER {} USING \"{index}\"",
        qualified_name(table.schema.as_deref(), on),
    )
}

pub fn analyze(schema: Option<&str>, name: &str) -> String {
    format!("ANALYZE {}", qualified_name(schema, name))
}

pub fn rename_table(schema: Option<&str>, from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO \"{to}\"",
        qualified_name(schema, from),
    )
}

/// Batched row deletion before re-insertion. With a type column the
/// parameters are ($1 = id_type, $2 = id array), otherwise just the
/// array.
pub fn delete_rows(table: &TableDef, id_column: &str, type_column: Option<&str>) -> String {
    let target = qualified_name(table.schema.as_deref(), &table.name);
    match type_column {
        Some(tc) => format!(
            "DELETE FROM {target} WHERE {} = $1 AND {} = ANY($2)",
            quote_ident(tc),
            quote_ident(id_column),
        ),
        None => format!(
            "DELETE FROM {target} WHERE {} = ANY($1)",
            quote_ident(id_column),
        ),
    }
}

pub fn schema_exists() -> &'static str {
    "SELECT 1 FROM pg_namespace WHERE nspname = $1"
}

pub fn tablespace_exists() -> &'static str {
    "SELECT 1 FROM pg_tablespace WHERE spcname = $1"
}

pub fn extension_exists() -> &'static str {
    "SELECT 1 FROM pg_extension WHERE extname = $1"
}

/// Escape one field of a COPY text-format line.
pub fn copy_escape(out: &mut String, field: &str) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
}

pub const COPY_NULL: &str = "\\N";
