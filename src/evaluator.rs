use crate::error::{EvalError, GeometryError};
use crate::geometry::{self, Geom, GeomOptions};
use crate::middle::ExpandedMember;
use crate::osm::{Location, Node, ObjectType, OsmId, Relation, Tags, Way};
use crate::schema::{Column, ColumnType, IdKind, IdPolicy, TableDef};

/// A row value on its way into a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Tags(Tags),
    Geom(Geom),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(t) => t.clone(),
            Value::Tags(_) => "<tags>".into(),
            Value::Geom(_) => "<geometry>".into(),
        }
    }
}

fn uncoercible(column: &Column, value: &Value) -> EvalError {
    EvalError::Uncoercible {
        column: column.name.clone(),
        ctype: column.ctype.name(),
        value: value.describe(),
    }
}

fn int_range(ctype: ColumnType) -> (i64, i64) {
    match ctype {
        ColumnType::Int2 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        ColumnType::Int4 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    }
}

/// Coerce a value to its column's logical type. Idempotent: feeding
/// the result back in returns it unchanged.
pub fn coerce(column: &Column, value: Value, default_srid: u32) -> Result<Value, EvalError> {
    if value == Value::Null {
        return Ok(Value::Null);
    }
    match column.ctype {
        ColumnType::Text => match value {
            Value::Text(_) => Ok(value),
            Value::Bool(b) => Ok(Value::Text(b.to_string())),
            Value::Int(i) => Ok(Value::Text(i.to_string())),
            Value::Real(r) => Ok(Value::Text(r.to_string())),
            other => Err(uncoercible(column, &other)),
        },
        ColumnType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            Value::Int(1) => Ok(Value::Bool(true)),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Text(t) => match t.as_str() {
                "yes" | "true" | "1" => Ok(Value::Bool(true)),
                "no" | "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(uncoercible(column, &value)),
            },
            _ => Err(uncoercible(column, &value)),
        },
        ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::IdNum => {
            let n = match &value {
                Value::Int(i) => *i,
                // Fractional reals truncate toward zero.
                Value::Real(r) => *r as i64,
                Value::Text(t) => t
                    .parse::<i64>()
                    .map_err(|_| uncoercible(column, &value))?,
                _ => return Err(uncoercible(column, &value)),
            };
            let (lo, hi) = int_range(column.ctype);
            if n < lo || n > hi {
                return Err(EvalError::OutOfRange {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    value: n,
                });
            }
            Ok(Value::Int(n))
        }
        ColumnType::Real | ColumnType::Area => match &value {
            Value::Real(_) => Ok(value),
            Value::Int(i) => Ok(Value::Real(*i as f64)),
            Value::Text(t) => t
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| uncoercible(column, &value)),
            _ => Err(uncoercible(column, &value)),
        },
        ColumnType::Direction => match &value {
            Value::Int(-1) | Value::Int(0) | Value::Int(1) => Ok(value),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Text(t) => match t.as_str() {
                "yes" | "true" | "1" => Ok(Value::Int(1)),
                "no" | "false" | "0" => Ok(Value::Int(0)),
                "-1" | "reverse" | "backward" => Ok(Value::Int(-1)),
                _ => Err(uncoercible(column, &value)),
            },
            _ => Err(uncoercible(column, &value)),
        },
        ColumnType::Hstore => match value {
            Value::Tags(_) => Ok(value),
            other => Err(uncoercible(column, &other)),
        },
        ColumnType::Jsonb => match value {
            // Text passes through as a raw JSON document.
            Value::Tags(_) | Value::Text(_) => Ok(value),
            other => Err(uncoercible(column, &other)),
        },
        ColumnType::IdType => match &value {
            Value::Text(t) if t.len() == 1 => Ok(value),
            _ => Err(uncoercible(column, &value)),
        },
        _ => {
            // Geometry column types.
            let Value::Geom(geom) = value else {
                return Err(uncoercible(column, &value));
            };
            let want = column.effective_srid(default_srid);
            if geom.srid != want {
                return Err(EvalError::SridMismatch {
                    column: column.name.clone(),
                    want,
                    got: geom.srid,
                });
            }
            let srid = geom.srid;
            match promote_shape(column.ctype, geom.shape) {
                Some(shape) => Ok(Value::Geom(Geom { srid, shape })),
                None => Err(EvalError::Uncoercible {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    value: "<geometry>".into(),
                }),
            }
        }
    }
}

/// Match a built shape against the declared geometry column type,
/// promoting single geometries into their multi counterparts.
fn promote_shape(
    ctype: ColumnType,
    shape: geo_types::Geometry<f64>,
) -> Option<geo_types::Geometry<f64>> {
    use geo_types::Geometry as G;
    match (ctype, shape) {
        (ColumnType::Geometry, s) => Some(s),
        (ColumnType::Point, s @ G::Point(_)) => Some(s),
        (ColumnType::LineString, s @ G::LineString(_)) => Some(s),
        (ColumnType::Polygon, s @ G::Polygon(_)) => Some(s),
        (ColumnType::MultiPoint, s @ G::MultiPoint(_)) => Some(s),
        (ColumnType::MultiPoint, G::Point(p)) => Some(G::MultiPoint(geo_types::MultiPoint(vec![p]))),
        (ColumnType::MultiLineString, s @ G::MultiLineString(_)) => Some(s),
        (ColumnType::MultiLineString, G::LineString(l)) => {
            Some(G::MultiLineString(geo_types::MultiLineString(vec![l])))
        }
        (ColumnType::MultiPolygon, s @ G::MultiPolygon(_)) => Some(s),
        (ColumnType::MultiPolygon, G::Polygon(p)) => {
            Some(G::MultiPolygon(geo_types::MultiPolygon(vec![p])))
        }
        (ColumnType::GeometryCollection, s @ G::GeometryCollection(_)) => Some(s),
        _ => None,
    }
}

/// The current primitive together with its expanded members, as seen
/// by user mapping logic.
pub enum ObjectRef<'a> {
    Node(&'a Node),
    Way(&'a Way, &'a [Option<Location>]),
    Relation(&'a Relation, &'a [ExpandedMember]),
}

pub struct ObjectContext<'a> {
    object: ObjectRef<'a>,
    pub default_options: GeomOptions,
}

impl<'a> ObjectContext<'a> {
    pub fn new(object: ObjectRef<'a>, default_options: GeomOptions) -> Self {
        Self { object, default_options }
    }

    pub fn id(&self) -> i64 {
        match &self.object {
            ObjectRef::Node(n) => n.id,
            ObjectRef::Way(w, _) => w.id,
            ObjectRef::Relation(r, _) => r.id,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match &self.object {
            ObjectRef::Node(_) => ObjectType::Node,
            ObjectRef::Way(..) => ObjectType::Way,
            ObjectRef::Relation(..) => ObjectType::Relation,
        }
    }

    pub fn osm_id(&self) -> OsmId {
        OsmId { kind: self.object_type(), id: self.id() }
    }

    pub fn version(&self) -> Option<i32> {
        match &self.object {
            ObjectRef::Node(n) => n.version,
            ObjectRef::Way(w, _) => w.version,
            ObjectRef::Relation(r, _) => r.version,
        }
    }

    pub fn tags(&self) -> &Tags {
        match &self.object {
            ObjectRef::Node(n) => &n.tags,
            ObjectRef::Way(w, _) => &w.tags,
            ObjectRef::Relation(r, _) => &r.tags,
        }
    }

    pub fn is_closed_way(&self) -> bool {
        matches!(&self.object, ObjectRef::Way(w, _) if w.is_closed())
    }

    fn opts(&self, opts: Option<GeomOptions>) -> GeomOptions {
        opts.unwrap_or(self.default_options)
    }

    /// Point for a node, representative point for a way.
    pub fn as_point(&self, opts: Option<GeomOptions>) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Node(n) => geometry::node_point(n, &opts),
            ObjectRef::Way(w, coords) => geometry::way_centroid(w, coords, &opts),
            ObjectRef::Relation(..) => Err(GeometryError::WrongKind(ObjectType::Relation)),
        }
    }

    pub fn as_linestring(&self, opts: Option<GeomOptions>) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Way(w, coords) => geometry::way_linestring(w, coords, &opts),
            ObjectRef::Node(_) => Err(GeometryError::WrongKind(ObjectType::Node)),
            ObjectRef::Relation(..) => Err(GeometryError::WrongKind(ObjectType::Relation)),
        }
    }

    /// Polygon for a closed way, or for a relation that assembles into
    /// exactly one ring set.
    pub fn as_polygon(&self, opts: Option<GeomOptions>) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Way(w, coords) => geometry::way_polygon(w, coords, &opts),
            ObjectRef::Relation(r, members) => {
                let multi = geometry::relation_multipolygon(r, members, &opts)?;
                match multi.shape {
                    geo_types::Geometry::MultiPolygon(mp) if mp.0.len() == 1 => Ok(Geom {
                        srid: multi.srid,
                        shape: geo_types::Geometry::Polygon(mp.0.into_iter().next().unwrap()),
                    }),
                    _ => Err(GeometryError::WrongKind(ObjectType::Relation)),
                }
            }
            ObjectRef::Node(_) => Err(GeometryError::WrongKind(ObjectType::Node)),
        }
    }

    pub fn as_multipolygon(&self, opts: Option<GeomOptions>) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Way(w, coords) => {
                let single = geometry::way_polygon(w, coords, &opts)?;
                match single.shape {
                    geo_types::Geometry::Polygon(p) => Ok(Geom {
                        srid: single.srid,
                        shape: geo_types::Geometry::MultiPolygon(geo_types::MultiPolygon(vec![p])),
                    }),
                    other => Ok(Geom { srid: single.srid, shape: other }),
                }
            }
            ObjectRef::Relation(r, members) => geometry::relation_multipolygon(r, members, &opts),
            ObjectRef::Node(_) => Err(GeometryError::WrongKind(ObjectType::Node)),
        }
    }

    pub fn as_multilinestring(&self, opts: Option<GeomOptions>) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Way(w, coords) => {
                let line = geometry::way_linestring(w, coords, &opts)?;
                match line.shape {
                    geo_types::Geometry::LineString(l) => Ok(Geom {
                        srid: line.srid,
                        shape: geo_types::Geometry::MultiLineString(geo_types::MultiLineString(
                            vec![l],
                        )),
                    }),
                    other => Ok(Geom { srid: line.srid, shape: other }),
                }
            }
            ObjectRef::Relation(r, members) => {
                geometry::relation_multilinestring(r, members, &opts)
            }
            ObjectRef::Node(_) => Err(GeometryError::WrongKind(ObjectType::Node)),
        }
    }

    pub fn as_geometrycollection(
        &self,
        opts: Option<GeomOptions>,
    ) -> Result<Geom, GeometryError> {
        let opts = self.opts(opts);
        match &self.object {
            ObjectRef::Relation(r, members) => geometry::relation_collection(r, members, &opts),
            ObjectRef::Node(_) => Err(GeometryError::WrongKind(ObjectType::Node)),
            ObjectRef::Way(..) => Err(GeometryError::WrongKind(ObjectType::Way)),
        }
    }
}

/// A validated row bound for a table's staging buffer. Values are
/// aligned with the table's loadable columns.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub table: usize,
    pub id: OsmId,
    pub values: Vec<Value>,
}

/// Id column value for an object in a table with the given policy.
/// Area tables store relation ids negated so they cannot collide with
/// way ids.
pub fn table_id_value(ids: &IdPolicy, id: OsmId) -> i64 {
    if ids.kind == IdKind::Area && id.kind == ObjectType::Relation {
        -id.id
    } else {
        id.id
    }
}

/// Host side of the insert hook: validates rows against the schema and
/// collects them for the sink.
pub struct Emitter<'a> {
    tables: &'a [TableDef],
    default_srid: u32,
    current: Option<OsmId>,
    rows: Vec<StagedRow>,
    pub geometry_failures: u64,
}

impl<'a> Emitter<'a> {
    pub fn new(tables: &'a [TableDef], default_srid: u32) -> Self {
        Self {
            tables,
            default_srid,
            current: None,
            rows: Vec::new(),
            geometry_failures: 0,
        }
    }

    pub(crate) fn begin(&mut self, id: OsmId) {
        self.current = Some(id);
    }

    pub(crate) fn end(&mut self) -> Vec<StagedRow> {
        self.current = None;
        std::mem::take(&mut self.rows)
    }

    /// Record a local geometry-construction failure; the row is
    /// skipped and processing continues.
    pub fn geometry_failure(&mut self) {
        self.geometry_failures += 1;
    }

    pub fn insert(&mut self, table: &str, row: Vec<(String, Value)>) -> Result<(), EvalError> {
        let current = self.current.ok_or(EvalError::InsertOutsideProcessing)?;
        let (table_idx, def) = crate::schema::find_table(self.tables, table)
            .ok_or_else(|| EvalError::UnknownTable(table.to_string()))?;
        if let Some(ids) = &def.ids {
            if !ids.kind.accepts(current.kind) {
                return Err(EvalError::IdKindMismatch {
                    table: def.name.clone(),
                    want: ids.kind,
                    got: current.kind,
                });
            }
        }
        let mut given: Vec<(String, Option<Value>)> =
            row.into_iter().map(|(k, v)| (k, Some(v))).collect();
        for (name, _) in &given {
            if def.column(name).is_none() {
                return Err(EvalError::UnknownColumn {
                    table: def.name.clone(),
                    column: name.clone(),
                });
            }
        }
        let mut values = Vec::new();
        for column in def.load_columns() {
            let supplied = given
                .iter_mut()
                .find(|(k, v)| k == &column.name && v.is_some())
                .and_then(|(_, v)| v.take());
            let value = match (column.ctype, supplied) {
                (ColumnType::IdNum, supplied) => {
                    let want = def
                        .ids
                        .as_ref()
                        .map(|ids| table_id_value(ids, current))
                        .unwrap_or(current.id);
                    if let Some(v) = supplied {
                        match coerce(column, v, self.default_srid)? {
                            Value::Int(got) if got == want => {}
                            Value::Int(got) => {
                                return Err(EvalError::IdMismatch { want, got });
                            }
                            _ => {}
                        }
                    }
                    Value::Int(want)
                }
                (ColumnType::IdType, supplied) => {
                    let want = current.kind.as_char();
                    if let Some(v) = supplied {
                        match coerce(column, v, self.default_srid)? {
                            Value::Text(got) if got == want.to_string() => {}
                            Value::Text(got) => {
                                return Err(EvalError::IdTypeMismatch { want, got });
                            }
                            _ => {}
                        }
                    }
                    Value::Text(want.to_string())
                }
                (_, Some(v)) => coerce(column, v, self.default_srid)?,
                (_, None) => Value::Null,
            };
            if value == Value::Null && column.not_null {
                return Err(EvalError::NullInNotNull { column: column.name.clone() });
            }
            values.push(value);
        }
        self.rows.push(StagedRow { table: table_idx, id: current, values });
        Ok(())
    }
}

/// User mapping logic. The embedded scripting runtime is out of scope;
/// this trait is the seam it plugs into.
pub trait Evaluator {
    fn process_node(&mut self, ctx: &ObjectContext, out: &mut Emitter) -> Result<(), EvalError>;
    fn process_way(&mut self, ctx: &ObjectContext, out: &mut Emitter) -> Result<(), EvalError>;
    fn process_relation(
        &mut self,
        ctx: &ObjectContext,
        out: &mut Emitter,
    ) -> Result<(), EvalError>;
}
