use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, EvalError};
use crate::evaluator::{Emitter, Evaluator, ObjectContext, Value};
use crate::geometry::{GeomOptions, Projection};
use crate::osm::{RelationType, Tags};
use crate::schema::{
    Cluster, Column, ColumnType, IdKind, IdPolicy, IndexDef, TableDef,
};

fn default_srid() -> u32 {
    3857
}

fn default_depth() -> u32 {
    2
}

fn default_column_type() -> String {
    "text".into()
}

fn default_create_index() -> String {
    "auto".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    #[serde(default)]
    pub options: OptionsConfig,
    pub tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsConfig {
    #[serde(default = "default_srid")]
    pub srid: u32,
    /// How far relation-of-relation dependencies are chased during
    /// update propagation.
    #[serde(default = "default_depth")]
    pub propagation_depth: u32,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self { srid: default_srid(), propagation_depth: default_depth() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub schema: Option<String>,
    pub cluster: Option<String>,
    pub data_tablespace: Option<String>,
    pub index_tablespace: Option<String>,
    pub ids: Option<IdsConfig>,
    /// Which primitives feed this table: node, way, relation, area.
    /// Defaults from the ids type.
    #[serde(default)]
    pub objects: Vec<String>,
    /// Tag filter: every key must be present; "*" matches any value.
    /// Omitted, the table captures every object of its kinds.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdsConfig {
    pub r#type: String,
    pub id_column: String,
    pub type_column: Option<String>,
    #[serde(default = "default_create_index")]
    pub create_index: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    pub column: String,
    #[serde(default = "default_column_type")]
    pub r#type: String,
    pub sql_type: Option<String>,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub create_only: bool,
    pub projection: Option<u32>,
    pub source: Option<SourceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    /// "tags" or "area".
    Named(String),
    Tag { tag: String },
    Geometry(GeometrySource),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometrySource {
    pub geometry: String,
    #[serde(default)]
    pub split_antimeridian: bool,
    pub min_segment: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    #[serde(default = "default_index_method")]
    pub method: String,
    pub columns: Vec<String>,
    pub tablespace: Option<String>,
    pub fillfactor: Option<u32>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
}

fn default_index_method() -> String {
    "btree".into()
}

pub fn load(path: &Path) -> Result<MappingConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Everything the pipeline needs from the user's mapping description:
/// the table schema plus the rules the built-in evaluator runs.
#[derive(Debug)]
pub struct Mapping {
    pub tables: Vec<TableDef>,
    pub options: OptionsConfig,
    pub rules: Vec<TableRule>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KindSet {
    pub node: bool,
    pub way: bool,
    pub relation: bool,
    pub area: bool,
}

#[derive(Debug, Clone)]
pub struct TableRule {
    pub table: String,
    pub kinds: KindSet,
    pub filter: Vec<(String, String)>,
    pub columns: Vec<(String, ColumnRule)>,
}

#[derive(Debug, Clone)]
pub enum ColumnRule {
    Tag(String),
    AllTags,
    Area,
    Geometry { kind: GeomKind, opts: GeomOptions },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomKind {
    Point,
    LineString,
    Polygon,
    MultiPolygon,
    MultiLineString,
    Collection,
}

impl GeomKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "point" => GeomKind::Point,
            "linestring" => GeomKind::LineString,
            "polygon" => GeomKind::Polygon,
            "multipolygon" => GeomKind::MultiPolygon,
            "multilinestring" => GeomKind::MultiLineString,
            "geometrycollection" => GeomKind::Collection,
            _ => return None,
        })
    }
}

pub fn compile(config: MappingConfig) -> Result<Mapping, ConfigError> {
    let mut tables = Vec::new();
    let mut rules = Vec::new();
    for (name, tc) in config.tables {
        let (def, rule) = compile_table(&name, tc, &config.options)?;
        if crate::schema::find_table(&tables, &def.name).is_some() {
            return Err(ConfigError::DuplicateTable(def.name));
        }
        def.validate()?;
        tables.push(def);
        rules.push(rule);
    }
    Ok(Mapping { tables, options: config.options, rules })
}

fn compile_table(
    name: &str,
    tc: TableConfig,
    options: &OptionsConfig,
) -> Result<(TableDef, TableRule), ConfigError> {
    let cluster = match tc.cluster.as_deref() {
        None | Some("no") => Cluster::No,
        Some("auto") => Cluster::Auto,
        Some(other) => return Err(ConfigError::BadClusterOption(other.to_string())),
    };

    let mut columns = Vec::new();
    let ids = match tc.ids {
        Some(ic) => {
            let kind = IdKind::parse(&ic.r#type)
                .ok_or_else(|| ConfigError::BadIdsType(ic.r#type.clone()))?;
            if ic.type_column.is_some() && kind != IdKind::Any {
                return Err(ConfigError::TypeColumnWithoutAny);
            }
            let always_index = match ic.create_index.as_str() {
                "auto" => false,
                "always" => true,
                other => return Err(ConfigError::BadCreateIndexOption(other.to_string())),
            };
            if let Some(tc_name) = &ic.type_column {
                let mut c = Column::new(tc_name, ColumnType::IdType);
                c.not_null = true;
                columns.push(c);
            }
            let mut c = Column::new(&ic.id_column, ColumnType::IdNum);
            c.not_null = true;
            columns.push(c);
            Some(IdPolicy {
                kind,
                column: ic.id_column,
                type_column: ic.type_column,
                always_index,
            })
        }
        None => None,
    };

    let mut column_rules = Vec::new();
    for cc in tc.columns {
        let ctype = ColumnType::parse(&cc.r#type).ok_or_else(|| {
            ConfigError::UnknownColumnType { column: cc.column.clone(), ctype: cc.r#type.clone() }
        })?;
        let mut column = Column::new(&cc.column, ctype);
        column.sql_type = cc.sql_type;
        column.not_null = cc.not_null;
        column.create_only = cc.create_only;
        column.projection = cc.projection;
        if let Some(source) = cc.source {
            column_rules.push((cc.column.clone(), compile_source(&column, source, options)?));
        }
        columns.push(column);
    }

    let kinds = compile_kinds(&tc.objects, ids.as_ref())?;
    let def = TableDef {
        name: name.to_string(),
        schema: tc.schema,
        cluster,
        data_tablespace: tc.data_tablespace,
        index_tablespace: tc.index_tablespace,
        ids,
        columns,
        indexes: tc
            .indexes
            .into_iter()
            .map(|ic| IndexDef {
                method: ic.method,
                columns: ic.columns,
                tablespace: ic.tablespace,
                fillfactor: ic.fillfactor,
                where_clause: ic.where_clause,
            })
            .collect(),
    };
    let rule = TableRule {
        table: name.to_string(),
        kinds,
        filter: tc.filter.into_iter().collect(),
        columns: column_rules,
    };
    Ok((def, rule))
}

fn compile_source(
    column: &Column,
    source: SourceConfig,
    options: &OptionsConfig,
) -> Result<ColumnRule, ConfigError> {
    match source {
        SourceConfig::Named(n) if n == "tags" => {
            if !matches!(column.ctype, ColumnType::Hstore | ColumnType::Jsonb) {
                return Err(ConfigError::SourceTypeMismatch {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    src: "tags",
                });
            }
            Ok(ColumnRule::AllTags)
        }
        SourceConfig::Named(n) if n == "area" => {
            if !matches!(column.ctype, ColumnType::Area | ColumnType::Real) {
                return Err(ConfigError::SourceTypeMismatch {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    src: "area",
                });
            }
            Ok(ColumnRule::Area)
        }
        SourceConfig::Named(n) => Err(ConfigError::BadGeometrySource(n)),
        SourceConfig::Tag { tag } => {
            if column.ctype.is_geometry() {
                return Err(ConfigError::SourceTypeMismatch {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    src: "tag",
                });
            }
            Ok(ColumnRule::Tag(tag))
        }
        SourceConfig::Geometry(g) => {
            if !column.ctype.is_geometry() {
                return Err(ConfigError::SourceTypeMismatch {
                    column: column.name.clone(),
                    ctype: column.ctype.name(),
                    src: "geometry",
                });
            }
            let kind = GeomKind::parse(&g.geometry)
                .ok_or_else(|| ConfigError::BadGeometrySource(g.geometry.clone()))?;
            let srid = column.effective_srid(options.srid);
            let projection = Projection::from_srid(srid).ok_or(
                ConfigError::UnsupportedProjection { column: column.name.clone(), srid },
            )?;
            Ok(ColumnRule::Geometry {
                kind,
                opts: GeomOptions {
                    projection,
                    split_antimeridian: g.split_antimeridian,
                    min_segment: g.min_segment.unwrap_or(0.0),
                    ..GeomOptions::default()
                },
            })
        }
    }
}

fn compile_kinds(objects: &[String], ids: Option<&IdPolicy>) -> Result<KindSet, ConfigError> {
    let mut kinds = KindSet::default();
    if objects.is_empty() {
        match ids.map(|i| i.kind) {
            Some(IdKind::Node) => kinds.node = true,
            Some(IdKind::Way) => kinds.way = true,
            Some(IdKind::Relation) => kinds.relation = true,
            Some(IdKind::Area) => kinds.area = true,
            Some(IdKind::Any) | None => {
                kinds.node = true;
                kinds.way = true;
                kinds.relation = true;
            }
        }
        return Ok(kinds);
    }
    for o in objects {
        match o.as_str() {
            "node" => kinds.node = true,
            "way" => kinds.way = true,
            "relation" => kinds.relation = true,
            "area" => kinds.area = true,
            other => return Err(ConfigError::BadObjectKind(other.to_string())),
        }
    }
    Ok(kinds)
}

/// The built-in, configuration-driven evaluator: one rule per table,
/// tag filters, declarative column sources.
pub struct ConfigEvaluator {
    rules: Vec<TableRule>,
    default_options: GeomOptions,
}

impl ConfigEvaluator {
    pub fn new(mapping: &Mapping) -> Self {
        let projection =
            Projection::from_srid(mapping.options.srid).unwrap_or(Projection::WebMercator);
        Self {
            rules: mapping.rules.clone(),
            default_options: GeomOptions { projection, ..GeomOptions::default() },
        }
    }

    pub fn default_options(&self) -> GeomOptions {
        self.default_options
    }

    /// An empty filter matches everything, tagless objects included.
    fn matches(rule: &TableRule, tags: &Tags) -> bool {
        rule.filter.iter().all(|(key, pattern)| match tags.get(key) {
            Some(v) => pattern == "*" || v == pattern,
            None => false,
        })
    }

    fn emit(
        &self,
        rule: &TableRule,
        ctx: &ObjectContext,
        out: &mut Emitter,
    ) -> Result<(), EvalError> {
        let mut row: Vec<(String, Value)> = Vec::with_capacity(rule.columns.len());
        for (name, crule) in &rule.columns {
            match crule {
                ColumnRule::Tag(key) => {
                    if let Some(v) = ctx.tags().get(key) {
                        row.push((name.clone(), Value::Text(v.clone())));
                    }
                }
                ColumnRule::AllTags => {
                    row.push((name.clone(), Value::Tags(ctx.tags().clone())));
                }
                ColumnRule::Area => {
                    match ctx.as_multipolygon(Some(self.default_options)) {
                        Ok(geom) => {
                            row.push((name.clone(), Value::Real(crate::geometry::area(&geom))));
                        }
                        Err(_) => {
                            out.geometry_failure();
                            return Ok(());
                        }
                    }
                }
                ColumnRule::Geometry { kind, opts } => {
                    let built = match kind {
                        GeomKind::Point => ctx.as_point(Some(*opts)),
                        GeomKind::LineString => ctx.as_linestring(Some(*opts)),
                        GeomKind::Polygon => ctx.as_polygon(Some(*opts)),
                        GeomKind::MultiPolygon => ctx.as_multipolygon(Some(*opts)),
                        GeomKind::MultiLineString => ctx.as_multilinestring(Some(*opts)),
                        GeomKind::Collection => ctx.as_geometrycollection(Some(*opts)),
                    };
                    match built {
                        Ok(geom) => row.push((name.clone(), Value::Geom(geom))),
                        Err(_) => {
                            // The whole row is skipped on a failed
                            // geometry; the counter records it.
                            out.geometry_failure();
                            return Ok(());
                        }
                    }
                }
            }
        }
        out.insert(&rule.table, row)
    }
}

impl Evaluator for ConfigEvaluator {
    fn process_node(&mut self, ctx: &ObjectContext, out: &mut Emitter) -> Result<(), EvalError> {
        for rule in &self.rules {
            if rule.kinds.node && Self::matches(rule, ctx.tags()) {
                self.emit(rule, ctx, out)?;
            }
        }
        Ok(())
    }

    fn process_way(&mut self, ctx: &ObjectContext, out: &mut Emitter) -> Result<(), EvalError> {
        for rule in &self.rules {
            let applies = (rule.kinds.way || (rule.kinds.area && ctx.is_closed_way()))
                && Self::matches(rule, ctx.tags());
            if applies {
                self.emit(rule, ctx, out)?;
            }
        }
        Ok(())
    }

    fn process_relation(
        &mut self,
        ctx: &ObjectContext,
        out: &mut Emitter,
    ) -> Result<(), EvalError> {
        let rtype = RelationType::from_type_tag(ctx.tags());
        for rule in &self.rules {
            let applies = (rule.kinds.relation || (rule.kinds.area && rtype.is_area()))
                && Self::matches(rule, ctx.tags());
            if applies {
                self.emit(rule, ctx, out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Mapping, ConfigError> {
        let config: MappingConfig = serde_yaml::from_str(yaml).expect("yaml parses");
        compile(config)
    }

    const POIS: &str = r#"
tables:
  pois:
    ids: { type: node, id_column: osm_id }
    filter: { amenity: "*" }
    columns:
      - { column: name, type: text, source: { tag: name } }
      - { column: tags, type: jsonb, source: tags }
      - { column: geom, type: point, not_null: true, source: { geometry: point } }
"#;

    #[test]
    fn compiles_a_point_table() {
        let mapping = parse(POIS).unwrap();
        assert_eq!(mapping.tables.len(), 1);
        let t = &mapping.tables[0];
        assert_eq!(t.name, "pois");
        // id column first, then the declared columns
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["osm_id", "name", "tags", "geom"]);
        assert!(mapping.rules[0].kinds.node);
        assert!(!mapping.rules[0].kinds.way);
    }

    #[test]
    fn rejects_unknown_column_type() {
        let err = parse(
            r#"
tables:
  t:
    columns:
      - { column: c, type: varchar2 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownColumnType { .. }));
    }

    #[test]
    fn rejects_bad_cluster_value() {
        let err = parse(
            r#"
tables:
  t:
    cluster: maybe
    columns:
      - { column: geom, type: point }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadClusterOption(_)));
    }

    #[test]
    fn rejects_cluster_auto_without_geometry() {
        let err = parse(
            r#"
tables:
  t:
    cluster: auto
    columns:
      - { column: name, type: text }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ClusterWithoutGeometry(_)));
    }

    #[test]
    fn rejects_tag_source_on_geometry_column() {
        let err = parse(
            r#"
tables:
  t:
    columns:
      - { column: geom, type: point, source: { tag: name } }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SourceTypeMismatch { .. }));
    }

    #[test]
    fn rejects_type_column_on_node_ids() {
        let err = parse(
            r#"
tables:
  t:
    ids: { type: node, id_column: osm_id, type_column: osm_type }
    columns:
      - { column: geom, type: point }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TypeColumnWithoutAny));
    }

    #[test]
    fn any_ids_get_type_column() {
        let mapping = parse(
            r#"
tables:
  everything:
    ids: { type: any, id_column: osm_id, type_column: osm_type }
    columns:
      - { column: geom, type: point }
"#,
        )
        .unwrap();
        let t = &mapping.tables[0];
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["osm_type", "osm_id", "geom"]);
        assert_eq!(t.columns[0].ctype, ColumnType::IdType);
        let kinds = mapping.rules[0].kinds;
        assert!(kinds.node && kinds.way && kinds.relation);
    }

    #[test]
    fn area_ids_default_objects() {
        let mapping = parse(
            r#"
tables:
  areas:
    ids: { type: area, id_column: osm_id }
    columns:
      - { column: geom, type: multipolygon }
"#,
        )
        .unwrap();
        let kinds = mapping.rules[0].kinds;
        assert!(kinds.area && !kinds.way && !kinds.relation && !kinds.node);
    }

    #[test]
    fn projection_override_picks_wgs84() {
        let mapping = parse(
            r#"
tables:
  t:
    columns:
      - { column: geom, type: point, projection: 4326, source: { geometry: point } }
"#,
        )
        .unwrap();
        match &mapping.rules[0].columns[0].1 {
            ColumnRule::Geometry { opts, .. } => {
                assert_eq!(opts.projection, Projection::Wgs84);
            }
            other => panic!("expected geometry rule, got {other:?}"),
        }
    }

    #[test]
    fn filter_semantics() {
        let mut tags = Tags::new();
        tags.insert("amenity".into(), "pub".into());
        let rule = TableRule {
            table: "t".into(),
            kinds: KindSet::default(),
            filter: vec![("amenity".into(), "*".into())],
            columns: Vec::new(),
        };
        assert!(ConfigEvaluator::matches(&rule, &tags));
        let exact = TableRule {
            filter: vec![("amenity".into(), "restaurant".into())],
            ..rule.clone()
        };
        assert!(!ConfigEvaluator::matches(&exact, &tags));
        assert!(!ConfigEvaluator::matches(&rule, &Tags::new()));
        // No filter: everything matches, tagless objects included.
        let catch_all = TableRule { filter: Vec::new(), ..rule };
        assert!(ConfigEvaluator::matches(&catch_all, &tags));
        assert!(ConfigEvaluator::matches(&catch_all, &Tags::new()));
    }
}
