//! End-to-end runs over the in-memory database: import, update
//! propagation, delete cascades, and the bulk-load protocol.

use std::collections::HashMap;

use flexosm::bounds::BoundsFilter;
use flexosm::config::{self, ConfigEvaluator, Mapping};
use flexosm::db::{MemoryDb, RecordedOp};
use flexosm::dispatcher::{ImportRun, UpdateRun};
use flexosm::geometry::Geom;
use flexosm::middle::Middle;
use flexosm::osm::{ChangeEvent, Location, Member, Node, ObjectType, Relation, Tags, Way};
use flexosm::sink::{Sink, SinkMode};
use flexosm::wkb;

const MAPPING: &str = r#"
options: { srid: 4326 }
tables:
  pois:
    ids: { type: node, id_column: osm_id }
    filter: { amenity: "*" }
    columns:
      - { column: tags, type: jsonb, source: tags }
      - { column: geom, type: point, not_null: true, source: { geometry: point } }
  roads:
    ids: { type: way, id_column: osm_id }
    filter: { highway: "*" }
    columns:
      - { column: geom, type: linestring, not_null: true, source: { geometry: linestring } }
  areas:
    ids: { type: area, id_column: osm_id }
    filter: { landuse: "*" }
    columns:
      - { column: geom, type: multipolygon, not_null: true, source: { geometry: multipolygon } }
"#;

fn mapping() -> Mapping {
    let parsed = serde_yaml::from_str(MAPPING).expect("mapping parses");
    config::compile(parsed).expect("mapping compiles")
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn node(id: i64, lon: f64, lat: f64, t: &[(&str, &str)]) -> Node {
    Node { id, version: None, tags: tags(t), location: Location::from_degrees(lon, lat) }
}

fn way(id: i64, refs: &[i64], t: &[(&str, &str)]) -> Way {
    Way { id, version: None, tags: tags(t), refs: refs.to_vec() }
}

fn way_member(id: i64, role: &str) -> Member {
    Member { kind: ObjectType::Way, id, role: role.to_string() }
}

/// Replay the recorded operations into per-table row sets, honoring
/// COPY, batched deletes and the staging rename. Rows are raw COPY
/// lines; the id is the first field in every table here.
fn materialize(db: &MemoryDb) -> HashMap<String, Vec<String>> {
    fn quoted(s: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = s;
        while let Some(start) = rest.find('"') {
            let tail = &rest[start + 1..];
            let Some(end) = tail.find('"') else { break };
            out.push(tail[..end].to_string());
            rest = &tail[end + 1..];
        }
        out
    }
    let mut tables: HashMap<String, Vec<String>> = HashMap::new();
    for op in &db.ops {
        match op {
            RecordedOp::Copy { sql, rows } => {
                let name = quoted(sql).into_iter().next().expect("copy target");
                tables.entry(name).or_default().extend(rows.iter().cloned());
            }
            RecordedOp::Delete { sql, id_type, ids } => {
                assert!(id_type.is_none(), "tests use single-type tables");
                let name = quoted(sql).into_iter().next().expect("delete target");
                if let Some(rows) = tables.get_mut(&name) {
                    rows.retain(|row| {
                        let id = row.split('\t').next().unwrap_or("");
                        !ids.iter().any(|i| i.to_string() == id)
                    });
                }
            }
            RecordedOp::Exec(sql) => {
                if sql.contains("RENAME TO") {
                    let names = quoted(sql);
                    let (from, to) = (names[0].clone(), names[1].clone());
                    let rows = tables.remove(&from).unwrap_or_default();
                    tables.insert(to, rows);
                } else if sql.starts_with("DROP TABLE") {
                    for name in quoted(sql) {
                        tables.remove(&name);
                    }
                }
            }
        }
    }
    tables
}

fn import(
    mapping: &Mapping,
    middle: &mut Middle,
    evaluator: &mut ConfigEvaluator,
    db: &mut MemoryDb,
    events: Vec<ChangeEvent>,
    watermark: usize,
) -> flexosm::dispatcher::RunStats {
    let options = evaluator.default_options();
    let mut sink = Sink::new(
        &mapping.tables,
        SinkMode::Import,
        true,
        mapping.options.srid,
        watermark,
    );
    sink.create_tables(db).unwrap();
    let mut run = ImportRun::new(
        middle,
        evaluator,
        &mut sink,
        db,
        &mapping.tables,
        options,
        BoundsFilter::None,
        None,
    );
    for event in events {
        run.handle(event).unwrap();
    }
    run.finish().unwrap()
}

fn update(
    mapping: &Mapping,
    middle: &mut Middle,
    evaluator: &mut ConfigEvaluator,
    db: &mut MemoryDb,
    events: Vec<ChangeEvent>,
) -> flexosm::dispatcher::RunStats {
    let options = evaluator.default_options();
    let mut sink = Sink::new(
        &mapping.tables,
        SinkMode::Update,
        true,
        mapping.options.srid,
        1 << 20,
    );
    let mut run = UpdateRun::new(
        middle,
        evaluator,
        &mut sink,
        db,
        &mapping.tables,
        options,
        mapping.options.propagation_depth,
        None,
    );
    for event in events {
        run.handle(event).unwrap();
    }
    run.finish().unwrap()
}

fn point_hex(lon: f64, lat: f64) -> String {
    wkb::encode_hex(&Geom {
        srid: 4326,
        shape: geo_types::Geometry::Point(geo_types::Point::new(lon, lat)),
    })
}

fn line_hex(pts: &[(f64, f64)]) -> String {
    wkb::encode_hex(&Geom {
        srid: 4326,
        shape: geo_types::Geometry::LineString(geo_types::LineString::from(pts.to_vec())),
    })
}

#[test]
fn single_node_single_table() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    let stats = import(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![ChangeEvent::NodeAdd(node(1, 10.0, 50.0, &[("amenity", "pub")]))],
        1 << 20,
    );
    assert_eq!(stats.rows, 1);
    assert_eq!(stats.geometry_failures, 0);

    let tables = materialize(&db);
    assert_eq!(
        tables["pois"],
        vec![format!("1\t{{\"amenity\":\"pub\"}}\t{}", point_hex(10.0, 50.0))]
    );
}

#[test]
fn way_with_missing_node_fails_geometry() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    let stats = import(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![
            ChangeEvent::NodeAdd(node(1, 10.0, 50.0, &[])),
            ChangeEvent::WayAdd(way(100, &[1, 2], &[("highway", "primary")])),
        ],
        1 << 20,
    );
    assert_eq!(stats.geometry_failures, 1);
    assert_eq!(stats.rows, 0);
    let tables = materialize(&db);
    assert!(tables.get("roads").map_or(true, |rows| rows.is_empty()));
}

#[test]
fn node_update_rerenders_dependent_way_and_delete_cascades() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    import(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![
            ChangeEvent::NodeAdd(node(1, 10.0, 50.0, &[("amenity", "pub")])),
            ChangeEvent::NodeAdd(node(2, 12.0, 50.0, &[])),
            ChangeEvent::WayAdd(way(100, &[1, 2], &[("highway", "primary")])),
        ],
        1 << 20,
    );
    let tables = materialize(&db);
    assert_eq!(tables["roads"], vec![format!("100\t{}", line_hex(&[(10.0, 50.0), (12.0, 50.0)]))]);

    // Moving node 1 reprocesses way 100 exactly once; its geometry
    // follows the node.
    let stats = update(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![ChangeEvent::NodeModify(node(1, 11.0, 50.0, &[("amenity", "pub")]))],
    );
    assert_eq!(stats.reprocessed, 1);
    let tables = materialize(&db);
    assert_eq!(tables["roads"], vec![format!("100\t{}", line_hex(&[(11.0, 50.0), (12.0, 50.0)]))]);
    assert_eq!(
        tables["pois"],
        vec![format!("1\t{{\"amenity\":\"pub\"}}\t{}", point_hex(11.0, 50.0))]
    );

    // Deleting the node removes its row and cascades into the way,
    // which now fails geometry construction and emits nothing.
    let stats = update(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![ChangeEvent::NodeDelete(1)],
    );
    assert_eq!(stats.reprocessed, 1);
    assert_eq!(stats.geometry_failures, 1);
    let tables = materialize(&db);
    assert!(tables["pois"].is_empty());
    assert!(tables["roads"].is_empty());
}

#[test]
fn multipolygon_assembly_end_to_end() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    let rel = Relation {
        id: 7,
        version: None,
        tags: tags(&[("type", "multipolygon"), ("landuse", "forest")]),
        members: vec![way_member(1, "outer"), way_member(2, "outer"), way_member(3, "inner")],
    };
    let mut events = vec![
        ChangeEvent::NodeAdd(node(1, 0.0, 0.0, &[])),
        ChangeEvent::NodeAdd(node(2, 10.0, 0.0, &[])),
        ChangeEvent::NodeAdd(node(3, 10.0, 10.0, &[])),
        ChangeEvent::NodeAdd(node(4, 0.0, 10.0, &[])),
        ChangeEvent::NodeAdd(node(5, 4.0, 4.0, &[])),
        ChangeEvent::NodeAdd(node(6, 6.0, 4.0, &[])),
        ChangeEvent::NodeAdd(node(7, 6.0, 6.0, &[])),
        ChangeEvent::NodeAdd(node(8, 4.0, 6.0, &[])),
    ];
    events.push(ChangeEvent::WayAdd(way(1, &[1, 2, 3], &[])));
    events.push(ChangeEvent::WayAdd(way(2, &[3, 4, 1], &[])));
    events.push(ChangeEvent::WayAdd(way(3, &[5, 6, 7, 8, 5], &[])));
    events.push(ChangeEvent::RelationAdd(rel));

    let stats = import(&mapping, &mut middle, &mut evaluator, &mut db, events, 1 << 20);
    assert_eq!(stats.geometry_failures, 0);

    // One outer ring (counter-clockwise), one inner ring (clockwise),
    // keyed by the negated relation id.
    let expected = wkb::encode_hex(&Geom {
        srid: 4326,
        shape: geo_types::Geometry::MultiPolygon(geo_types::MultiPolygon(vec![
            geo_types::Polygon::new(
                geo_types::LineString::from(vec![
                    (0.0, 0.0),
                    (10.0, 0.0),
                    (10.0, 10.0),
                    (0.0, 10.0),
                    (0.0, 0.0),
                ]),
                vec![geo_types::LineString::from(vec![
                    (4.0, 4.0),
                    (4.0, 6.0),
                    (6.0, 6.0),
                    (6.0, 4.0),
                    (4.0, 4.0),
                ])],
            ),
        ])),
    });
    let tables = materialize(&db);
    assert_eq!(tables["areas"], vec![format!("-7\t{expected}")]);
}

#[test]
fn watermark_produces_intermediate_flushes() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    let events: Vec<ChangeEvent> = (0..200)
        .map(|i| ChangeEvent::NodeAdd(node(i, 1.0, 1.0, &[("amenity", "bench")])))
        .collect();
    let stats = import(&mapping, &mut middle, &mut evaluator, &mut db, events, 512);
    assert_eq!(stats.rows, 200);
    assert!(db.copy_count() >= 2, "watermark should force intermediate COPY flushes");
    assert_eq!(db.copied_rows(), 200);
    let tables = materialize(&db);
    assert_eq!(tables["pois"].len(), 200);
}

#[test]
fn repeated_update_leaves_only_last_rowset() {
    let mapping = mapping();
    let mut middle = Middle::flat(true);
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let mut db = MemoryDb::new();

    import(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![ChangeEvent::NodeAdd(node(1, 10.0, 50.0, &[("amenity", "pub")]))],
        1 << 20,
    );
    update(
        &mapping,
        &mut middle,
        &mut evaluator,
        &mut db,
        vec![
            ChangeEvent::NodeModify(node(1, 10.5, 50.0, &[("amenity", "pub")])),
            ChangeEvent::NodeModify(node(1, 11.0, 50.0, &[("amenity", "cafe")])),
        ],
    );
    let tables = materialize(&db);
    assert_eq!(
        tables["pois"],
        vec![format!("1\t{{\"amenity\":\"cafe\"}}\t{}", point_hex(11.0, 50.0))]
    );
}
