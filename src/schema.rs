use crate::error::ConfigError;
use crate::osm::ObjectType;

/// Closed set of logical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Boolean,
    Int2,
    Int4,
    Int8,
    Real,
    Hstore,
    Jsonb,
    Direction,
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Area,
    IdNum,
    IdType,
}

impl ColumnType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => ColumnType::Text,
            "bool" | "boolean" => ColumnType::Boolean,
            "int2" | "smallint" => ColumnType::Int2,
            "int4" | "int" | "integer" => ColumnType::Int4,
            "int8" | "bigint" => ColumnType::Int8,
            "real" | "double" => ColumnType::Real,
            "hstore" => ColumnType::Hstore,
            "json" | "jsonb" => ColumnType::Jsonb,
            "direction" => ColumnType::Direction,
            "geometry" => ColumnType::Geometry,
            "point" => ColumnType::Point,
            "linestring" => ColumnType::LineString,
            "polygon" => ColumnType::Polygon,
            "multipoint" => ColumnType::MultiPoint,
            "multilinestring" => ColumnType::MultiLineString,
            "multipolygon" => ColumnType::MultiPolygon,
            "geometrycollection" => ColumnType::GeometryCollection,
            "area" => ColumnType::Area,
            "id_num" => ColumnType::IdNum,
            "id_type" => ColumnType::IdType,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Boolean => "bool",
            ColumnType::Int2 => "int2",
            ColumnType::Int4 => "int4",
            ColumnType::Int8 => "int8",
            ColumnType::Real => "real",
            ColumnType::Hstore => "hstore",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Direction => "direction",
            ColumnType::Geometry => "geometry",
            ColumnType::Point => "point",
            ColumnType::LineString => "linestring",
            ColumnType::Polygon => "polygon",
            ColumnType::MultiPoint => "multipoint",
            ColumnType::MultiLineString => "multilinestring",
            ColumnType::MultiPolygon => "multipolygon",
            ColumnType::GeometryCollection => "geometrycollection",
            ColumnType::Area => "area",
            ColumnType::IdNum => "id_num",
            ColumnType::IdType => "id_type",
        }
    }

    pub fn is_geometry(self) -> bool {
        matches!(
            self,
            ColumnType::Geometry
                | ColumnType::Point
                | ColumnType::LineString
                | ColumnType::Polygon
                | ColumnType::MultiPoint
                | ColumnType::MultiLineString
                | ColumnType::MultiPolygon
                | ColumnType::GeometryCollection
        )
    }

    /// SQL type the column is created with, unless overridden.
    pub fn sql_type(self, srid: u32) -> String {
        match self {
            ColumnType::Text => "text".into(),
            ColumnType::Boolean => "boolean".into(),
            ColumnType::Int2 => "int2".into(),
            ColumnType::Int4 => "int4".into(),
            ColumnType::Int8 => "int8".into(),
            ColumnType::Real => "real".into(),
            ColumnType::Hstore => "hstore".into(),
            ColumnType::Jsonb => "jsonb".into(),
            ColumnType::Direction => "int2".into(),
            ColumnType::Geometry => format!("geometry(geometry,{srid})"),
            ColumnType::Point => format!("geometry(point,{srid})"),
            ColumnType::LineString => format!("geometry(linestring,{srid})"),
            ColumnType::Polygon => format!("geometry(polygon,{srid})"),
            ColumnType::MultiPoint => format!("geometry(multipoint,{srid})"),
            ColumnType::MultiLineString => format!("geometry(multilinestring,{srid})"),
            ColumnType::MultiPolygon => format!("geometry(multipolygon,{srid})"),
            ColumnType::GeometryCollection => format!("geometry(geometrycollection,{srid})"),
            ColumnType::Area => "real".into(),
            ColumnType::IdNum => "int8".into(),
            ColumnType::IdType => "char(1)".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ctype: ColumnType,
    pub sql_type: Option<String>,
    pub not_null: bool,
    pub create_only: bool,
    /// SRID override, only on geometry and area columns.
    pub projection: Option<u32>,
}

impl Column {
    pub fn new(name: &str, ctype: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ctype,
            sql_type: None,
            not_null: false,
            create_only: false,
            projection: None,
        }
    }

    pub fn effective_srid(&self, default_srid: u32) -> u32 {
        self.projection.unwrap_or(default_srid)
    }

    pub fn effective_sql_type(&self, default_srid: u32) -> String {
        match &self.sql_type {
            Some(t) => t.clone(),
            None => self.ctype.sql_type(self.effective_srid(default_srid)),
        }
    }
}

/// Which primitives a table is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Node,
    Way,
    Relation,
    Area,
    Any,
}

impl IdKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "node" => IdKind::Node,
            "way" => IdKind::Way,
            "relation" => IdKind::Relation,
            "area" => IdKind::Area,
            "any" => IdKind::Any,
            _ => return None,
        })
    }

    /// Whether an object of the given type may carry its id into a
    /// table with this policy.
    pub fn accepts(self, t: ObjectType) -> bool {
        match self {
            IdKind::Node => t == ObjectType::Node,
            IdKind::Way => t == ObjectType::Way,
            IdKind::Relation => t == ObjectType::Relation,
            IdKind::Area => t == ObjectType::Way || t == ObjectType::Relation,
            IdKind::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdPolicy {
    pub kind: IdKind,
    /// Name of the id_num column.
    pub column: String,
    /// Name of the id_type column; only with kind Any.
    pub type_column: Option<String>,
    /// create_index = "always" forces the id index even on
    /// non-updatable imports.
    pub always_index: bool,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub method: String,
    pub columns: Vec<String>,
    pub tablespace: Option<String>,
    pub fillfactor: Option<u32>,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cluster {
    #[default]
    No,
    Auto,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub schema: Option<String>,
    pub cluster: Cluster,
    pub data_tablespace: Option<String>,
    pub index_tablespace: Option<String>,
    pub ids: Option<IdPolicy>,
    /// Id columns first, then user columns, in declaration order.
    pub columns: Vec<Column>,
    /// Declared secondary indexes. Empty means the default gist index
    /// on the geometry column.
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    /// First geometry column, the one default indexing and clustering
    /// target.
    pub fn geom_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.ctype.is_geometry())
    }

    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    /// Columns written by COPY; create_only columns exist in the table
    /// but are never loaded.
    pub fn load_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.create_only)
    }

    /// Name the table is loaded under before the commit-time rename.
    pub fn staging_name(&self) -> String {
        format!("{}_staging", self.name)
    }

    /// Declared indexes, or the default gist index on the geometry
    /// column. Fillfactor 100 when the table will not be updated.
    pub fn effective_indexes(&self, updatable: bool) -> Vec<IndexDef> {
        if !self.indexes.is_empty() {
            return self.indexes.clone();
        }
        match self.geom_column() {
            Some(geom) => vec![IndexDef {
                method: "gist".into(),
                columns: vec![geom.name.clone()],
                tablespace: self.index_tablespace.clone(),
                fillfactor: if updatable { None } else { Some(100) },
                where_clause: None,
            }],
            None => Vec::new(),
        }
    }

    /// Id index columns, when the policy and run mode ask for one.
    pub fn id_index_columns(&self, updatable: bool) -> Option<Vec<String>> {
        let ids = self.ids.as_ref()?;
        if !updatable && !ids.always_index {
            return None;
        }
        let mut cols = Vec::new();
        if let Some(tc) = &ids.type_column {
            cols.push(tc.clone());
        }
        cols.push(ids.column.clone());
        Some(cols)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_identifier(&self.name, "table names")?;
        if let Some(schema) = &self.schema {
            check_identifier(schema, "schema field")?;
        }
        for ts in [&self.data_tablespace, &self.index_tablespace].into_iter().flatten() {
            check_identifier(ts, "tablespace field")?;
        }
        let mut seen: Vec<&str> = Vec::new();
        for column in &self.columns {
            check_identifier(&column.name, "column names")?;
            if seen.contains(&column.name.as_str()) {
                return Err(ConfigError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            seen.push(&column.name);
            if column.projection.is_some()
                && !column.ctype.is_geometry()
                && column.ctype != ColumnType::Area
            {
                return Err(ConfigError::ProjectionOnNonSpatial(column.name.clone()));
            }
            if let Some(srid) = column.projection {
                if srid != 4326 && srid != 3857 {
                    return Err(ConfigError::UnsupportedProjection {
                        column: column.name.clone(),
                        srid,
                    });
                }
            }
        }
        let user_columns = self
            .columns
            .iter()
            .filter(|c| !matches!(c.ctype, ColumnType::IdNum | ColumnType::IdType))
            .count();
        if user_columns == 0 && self.ids.is_none() {
            return Err(ConfigError::NoColumns(self.name.clone()));
        }
        for index in &self.indexes {
            if index.columns.is_empty() {
                return Err(ConfigError::EmptyIndex { table: self.name.clone() });
            }
            for col in &index.columns {
                if self.column(col).is_none() {
                    return Err(ConfigError::UnknownIndexColumn {
                        table: self.name.clone(),
                        column: col.clone(),
                    });
                }
            }
        }
        if self.cluster == Cluster::Auto && self.geom_column().is_none() {
            return Err(ConfigError::ClusterWithoutGeometry(self.name.clone()));
        }
        Ok(())
    }
}

pub fn find_table<'a>(tables: &'a [TableDef], name: &str) -> Option<(usize, &'a TableDef)> {
    tables.iter().enumerate().find(|(_, t)| t.name == name)
}

/// Conservative identifier grammar: the character reject-list used for
/// everything we splice into SQL.
pub fn check_identifier(name: &str, context: &'static str) -> Result<(), ConfigError> {
    const FORBIDDEN: &str = "\"',.;$%&/()<>{}=?^*#";
    if name.is_empty()
        || name.chars().any(|c| FORBIDDEN.contains(c) || c.is_control() || c.is_whitespace())
    {
        return Err(ConfigError::BadIdentifier { name: name.to_string(), context });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: Vec<Column>) -> TableDef {
        TableDef {
            name: "pois".into(),
            schema: None,
            cluster: Cluster::No,
            data_tablespace: None,
            index_tablespace: None,
            ids: None,
            columns,
            indexes: Vec::new(),
        }
    }

    #[test]
    fn identifier_grammar() {
        assert!(check_identifier("planet_osm_point", "table names").is_ok());
        assert!(check_identifier("has space", "table names").is_err());
        assert!(check_identifier("semi;colon", "table names").is_err());
        assert!(check_identifier("", "table names").is_err());
        assert!(check_identifier("quo\"te", "table names").is_err());
    }

    #[test]
    fn default_gist_index_on_geom() {
        let t = table(vec![
            Column::new("name", ColumnType::Text),
            Column::new("geom", ColumnType::Point),
        ]);
        let idx = t.effective_indexes(false);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx[0].method, "gist");
        assert_eq!(idx[0].columns, vec!["geom".to_string()]);
        assert_eq!(idx[0].fillfactor, Some(100));
        assert_eq!(t.effective_indexes(true)[0].fillfactor, None);
    }

    #[test]
    fn validate_rejects_duplicate_column() {
        let t = table(vec![
            Column::new("name", ColumnType::Text),
            Column::new("name", ColumnType::Text),
        ]);
        assert!(matches!(t.validate(), Err(ConfigError::DuplicateColumn { .. })));
    }

    #[test]
    fn validate_rejects_projection_on_text() {
        let mut c = Column::new("name", ColumnType::Text);
        c.projection = Some(3857);
        let t = table(vec![c]);
        assert!(matches!(
            t.validate(),
            Err(ConfigError::ProjectionOnNonSpatial(_))
        ));
    }

    #[test]
    fn validate_rejects_unknown_index_column() {
        let mut t = table(vec![Column::new("geom", ColumnType::Point)]);
        t.indexes.push(IndexDef {
            method: "btree".into(),
            columns: vec!["nope".into()],
            tablespace: None,
            fillfactor: None,
            where_clause: None,
        });
        assert!(matches!(
            t.validate(),
            Err(ConfigError::UnknownIndexColumn { .. })
        ));
    }

    #[test]
    fn validate_rejects_cluster_without_geometry() {
        let mut t = table(vec![Column::new("name", ColumnType::Text)]);
        t.cluster = Cluster::Auto;
        assert!(matches!(
            t.validate(),
            Err(ConfigError::ClusterWithoutGeometry(_))
        ));
    }

    #[test]
    fn id_index_policy() {
        let mut t = table(vec![Column::new("geom", ColumnType::Point)]);
        t.ids = Some(IdPolicy {
            kind: IdKind::Node,
            column: "osm_id".into(),
            type_column: None,
            always_index: false,
        });
        t.columns.insert(0, Column::new("osm_id", ColumnType::IdNum));
        assert!(t.id_index_columns(false).is_none());
        assert_eq!(t.id_index_columns(true), Some(vec!["osm_id".to_string()]));
        t.ids.as_mut().unwrap().always_index = true;
        assert_eq!(t.id_index_columns(false), Some(vec!["osm_id".to_string()]));
    }

    #[test]
    fn sql_types_carry_srid() {
        assert_eq!(ColumnType::Point.sql_type(3857), "geometry(point,3857)");
        assert_eq!(ColumnType::Direction.sql_type(3857), "int2");
        let mut c = Column::new("geom", ColumnType::MultiPolygon);
        c.projection = Some(4326);
        assert_eq!(c.effective_sql_type(3857), "geometry(multipolygon,4326)");
    }
}
