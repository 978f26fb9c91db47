use thiserror::Error;

use crate::osm::ObjectType;

/// Problems with the mapping configuration or the target database layout.
/// All of these abort before any data flows.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read mapping file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse mapping file '{path}'")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("special characters are not allowed in {context}: '{name}'")]
    BadIdentifier { name: String, context: &'static str },
    #[error("table with name '{0}' already exists")]
    DuplicateTable(String),
    #[error("table '{table}' already has a column named '{column}'")]
    DuplicateColumn { table: String, column: String },
    #[error("unknown type '{ctype}' for column '{column}'")]
    UnknownColumnType { column: String, ctype: String },
    #[error("no columns defined for table '{0}'")]
    NoColumns(String),
    #[error("projection can only be set on geometry and area columns (column '{0}')")]
    ProjectionOnNonSpatial(String),
    #[error("unsupported projection {srid} on column '{column}' (supported: 4326, 3857)")]
    UnsupportedProjection { column: String, srid: u32 },
    #[error("index on table '{table}' references unknown column '{column}'")]
    UnknownIndexColumn { table: String, column: String },
    #[error("index on table '{table}' has no columns")]
    EmptyIndex { table: String },
    #[error("table '{0}' has cluster = \"auto\" but no geometry column")]
    ClusterWithoutGeometry(String),
    #[error("unknown value '{0}' for 'cluster' table option (use 'auto' or 'no')")]
    BadClusterOption(String),
    #[error("unknown ids type: {0}")]
    BadIdsType(String),
    #[error("unknown value '{0}' for 'create_index' field of ids")]
    BadCreateIndexOption(String),
    #[error("ids type_column requires ids type 'any'")]
    TypeColumnWithoutAny,
    #[error("unknown object kind '{0}' in 'objects' (use node, way, relation or area)")]
    BadObjectKind(String),
    #[error("unknown geometry source '{0}' for column")]
    BadGeometrySource(String),
    #[error("column '{column}' of type {ctype} cannot take source '{src}'")]
    SourceTypeMismatch {
        column: String,
        ctype: &'static str,
        src: &'static str,
    },
    #[error("invalid bbox '{0}' (expected xmin,ymin,xmax,ymax)")]
    BadBbox(String),
    #[error("invalid polygon filter: {0}")]
    BadPolygonFilter(String),
    #[error("schema '{0}' not available. Use 'CREATE SCHEMA \"{0}\";' to create it")]
    MissingSchema(String),
    #[error("tablespace '{0}' not available. Use 'CREATE TABLESPACE \"{0}\" ...;' to create it")]
    MissingTablespace(String),
    #[error("extension '{0}' not available. Use 'CREATE EXTENSION \"{0}\";' to create it")]
    MissingExtension(String),
}

/// Errors raised while user mapping logic runs. These abort the run.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("insert into unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown column '{column}' in insert into table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("column '{column}' is declared not_null but the row has no value for it")]
    NullInNotNull { column: String },
    #[error("value '{value}' is not valid for column '{column}' of type {ctype}")]
    Uncoercible {
        column: String,
        ctype: &'static str,
        value: String,
    },
    #[error("value {value} does not fit column '{column}' of type {ctype}")]
    OutOfRange {
        column: String,
        ctype: &'static str,
        value: i64,
    },
    #[error("geometry has SRID {got} but column '{column}' expects {want}")]
    SridMismatch { column: String, want: u32, got: u32 },
    #[error("id column value {got} does not match the current object id {want}")]
    IdMismatch { want: i64, got: i64 },
    #[error("id type column value '{got}' does not match the current object type '{want}'")]
    IdTypeMismatch { want: char, got: String },
    #[error("table '{table}' takes {want:?} ids but the current object is a {got:?}")]
    IdKindMismatch {
        table: String,
        want: crate::schema::IdKind,
        got: ObjectType,
    },
    #[error("insert is only allowed while an object is being processed")]
    InsertOutsideProcessing,
}

/// A geometry that could not be built. Local failures: the row is
/// skipped, a counter is incremented and processing continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("node {0} has no stored location")]
    MissingNode(i64),
    #[error("way {0} is not stored")]
    MissingWay(i64),
    #[error("way {0} has fewer than two distinct points")]
    DegenerateLine(i64),
    #[error("way {0} is not closed")]
    NotClosed(i64),
    #[error("ring through way {0} does not close")]
    OpenRing(i64),
    #[error("relation {0} has no usable rings")]
    NoRings(i64),
    #[error("object has no location")]
    NoLocation,
    #[error("requested geometry type does not fit a {0:?}")]
    WrongKind(ObjectType),
}

/// Middle I/O failures. Fatal: the run cannot proceed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store I/O error at '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object store header is damaged at '{0}'")]
    BadHeader(String),
    #[error("object store format version {0} is not supported")]
    UnknownVersion(u32),
    #[error("failed to encode object record")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode object record at offset {offset}")]
    Decode {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Database failures. Fatal; staging tables are left for inspection.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("connecting to database failed")]
    Connect(#[source] postgres::Error),
    #[error("database error: {0}")]
    Sql(#[from] postgres::Error),
    #[error("error on COPY into '{context}'")]
    Copy {
        context: String,
        #[source]
        source: postgres::Error,
    },
    #[error("writing COPY data to '{context}' failed")]
    CopyWrite {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal status of a run, per the propagation policy: geometry
/// failures stay local, everything else surfaces here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: osmpbf::Error,
    },
    #[error("{got:?} event arrived during the {phase:?} phase; the import reader must deliver nodes, then ways, then relations")]
    OutOfOrder {
        got: ObjectType,
        phase: ObjectType,
    },
    #[error("{0:?} {1} event is not allowed in an import run")]
    BadImportEvent(ObjectType, &'static str),
    #[error("run cancelled")]
    Cancelled,
}
