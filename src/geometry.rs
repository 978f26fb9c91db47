use geo::{Area, Centroid};
use geo_types::{
    Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Point, Polygon,
};

use crate::error::GeometryError;
use crate::middle::ExpandedMember;
use crate::osm::{Location, Node, Relation, Way};
use crate::poly::wn;

const EARTH_RADIUS: f64 = 6_378_137.0;
/// Spherical mercator is undefined at the poles; clamp like the usual
/// web-mercator tile bound.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Wgs84,
    WebMercator,
}

impl Projection {
    pub fn srid(self) -> u32 {
        match self {
            Projection::Wgs84 => 4326,
            Projection::WebMercator => 3857,
        }
    }

    pub fn from_srid(srid: u32) -> Option<Self> {
        match srid {
            4326 => Some(Projection::Wgs84),
            3857 => Some(Projection::WebMercator),
            _ => None,
        }
    }

    pub fn project(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projection::Wgs84 => (lon, lat),
            Projection::WebMercator => {
                let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
                let x = EARTH_RADIUS * lon.to_radians();
                let y = EARTH_RADIUS
                    * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
                (x, y)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationPolicy {
    /// Outer rings counter-clockwise, inner rings clockwise.
    Enforce,
    AsIs,
}

/// Builder configuration chosen by the row emitter per geometry call.
#[derive(Debug, Clone, Copy)]
pub struct GeomOptions {
    pub projection: Projection,
    pub split_antimeridian: bool,
    /// Consecutive points closer than this (in degrees) collapse into
    /// one; zero still collapses exact duplicates.
    pub min_segment: f64,
    pub orientation: OrientationPolicy,
}

impl Default for GeomOptions {
    fn default() -> Self {
        Self {
            projection: Projection::WebMercator,
            split_antimeridian: false,
            min_segment: 0.0,
            orientation: OrientationPolicy::Enforce,
        }
    }
}

/// A built geometry with the SRID it was projected into.
#[derive(Debug, Clone, PartialEq)]
pub struct Geom {
    pub srid: u32,
    pub shape: Geometry<f64>,
}

impl Geom {
    fn new(srid: u32, shape: Geometry<f64>) -> Self {
        Self { srid, shape }
    }
}

/// Planar area of the built geometry, in squared units of its
/// projection.
pub fn area(geom: &Geom) -> f64 {
    geom.shape.unsigned_area()
}

pub fn node_point(node: &Node, opts: &GeomOptions) -> Result<Geom, GeometryError> {
    if !node.location.valid() {
        return Err(GeometryError::NoLocation);
    }
    let (x, y) = opts.projection.project(node.location.lon(), node.location.lat());
    Ok(Geom::new(opts.projection.srid(), Geometry::Point(Point::new(x, y))))
}

/// Representative point of a way, for point columns fed from ways.
pub fn way_centroid(
    way: &Way,
    coords: &[Option<Location>],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    let line = way_linestring(way, coords, opts)?;
    let centroid = match &line.shape {
        Geometry::LineString(l) => l.centroid(),
        Geometry::MultiLineString(m) => m.centroid(),
        _ => None,
    };
    match centroid {
        Some(p) => Ok(Geom::new(line.srid, Geometry::Point(p))),
        None => Err(GeometryError::DegenerateLine(way.id)),
    }
}

pub fn way_linestring(
    way: &Way,
    coords: &[Option<Location>],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    let pts = resolve(way, coords)?;
    let pts = collapse(pts, opts.min_segment);
    if pts.len() < 2 {
        return Err(GeometryError::DegenerateLine(way.id));
    }
    let parts = if opts.split_antimeridian {
        split_antimeridian(pts)
    } else {
        vec![pts]
    };
    let lines: Vec<LineString<f64>> = parts
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(|p| project_line(&p, opts.projection))
        .collect();
    if lines.is_empty() {
        return Err(GeometryError::DegenerateLine(way.id));
    }
    let srid = opts.projection.srid();
    if lines.len() == 1 {
        Ok(Geom::new(srid, Geometry::LineString(lines.into_iter().next().unwrap())))
    } else {
        Ok(Geom::new(srid, Geometry::MultiLineString(MultiLineString(lines))))
    }
}

pub fn way_polygon(
    way: &Way,
    coords: &[Option<Location>],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    if !way.is_closed() {
        return Err(GeometryError::NotClosed(way.id));
    }
    let pts = resolve(way, coords)?;
    let ring = close_ring(collapse(pts, opts.min_segment));
    if ring.len() < 4 {
        return Err(GeometryError::DegenerateLine(way.id));
    }
    let ring = orient(ring, true, opts.orientation);
    let polygon = Polygon::new(project_line(&ring, opts.projection), Vec::new());
    Ok(Geom::new(opts.projection.srid(), Geometry::Polygon(polygon)))
}

/// Assemble a multipolygon from the member ways of a relation:
/// concatenate ways into rings, classify by role hint with a
/// topological fallback, attach each inner ring to the smallest
/// containing outer ring.
pub fn relation_multipolygon(
    rel: &Relation,
    members: &[ExpandedMember],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    let segments = member_segments(members)?;
    if segments.is_empty() {
        return Err(GeometryError::NoRings(rel.id));
    }
    let rings = assemble_rings(segments)?;
    let polygons = nest_rings(rings, opts)?;
    if polygons.is_empty() {
        return Err(GeometryError::NoRings(rel.id));
    }
    Ok(Geom::new(
        opts.projection.srid(),
        Geometry::MultiPolygon(MultiPolygon(polygons)),
    ))
}

pub fn relation_multilinestring(
    rel: &Relation,
    members: &[ExpandedMember],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    let mut lines = Vec::new();
    for m in members {
        if let ExpandedMember::Way { id, way, .. } = m {
            let (way, coords) = way.as_ref().ok_or(GeometryError::MissingWay(*id))?;
            match way_linestring(way, coords, opts)?.shape {
                Geometry::LineString(l) => lines.push(l),
                Geometry::MultiLineString(m) => lines.extend(m.0),
                _ => {}
            }
        }
    }
    if lines.is_empty() {
        return Err(GeometryError::NoRings(rel.id));
    }
    Ok(Geom::new(
        opts.projection.srid(),
        Geometry::MultiLineString(MultiLineString(lines)),
    ))
}

/// Member node points and way linestrings in one collection.
pub fn relation_collection(
    rel: &Relation,
    members: &[ExpandedMember],
    opts: &GeomOptions,
) -> Result<Geom, GeometryError> {
    let mut shapes: Vec<Geometry<f64>> = Vec::new();
    for m in members {
        match m {
            ExpandedMember::Node { id, location, .. } => {
                let loc = location.ok_or(GeometryError::MissingNode(*id))?;
                let (x, y) = opts.projection.project(loc.lon(), loc.lat());
                shapes.push(Geometry::Point(Point::new(x, y)));
            }
            ExpandedMember::Way { id, way, .. } => {
                let (way, coords) = way.as_ref().ok_or(GeometryError::MissingWay(*id))?;
                shapes.push(way_linestring(way, coords, opts)?.shape);
            }
            ExpandedMember::Relation { .. } => {}
        }
    }
    if shapes.is_empty() {
        return Err(GeometryError::NoRings(rel.id));
    }
    Ok(Geom::new(
        opts.projection.srid(),
        Geometry::GeometryCollection(GeometryCollection(shapes)),
    ))
}

fn resolve(way: &Way, coords: &[Option<Location>]) -> Result<Vec<(f64, f64)>, GeometryError> {
    way.refs
        .iter()
        .zip(coords)
        .map(|(r, c)| match c {
            Some(loc) => Ok((loc.lon(), loc.lat())),
            None => Err(GeometryError::MissingNode(*r)),
        })
        .collect()
}

fn collapse(pts: Vec<(f64, f64)>, min_segment: f64) -> Vec<(f64, f64)> {
    let mut out: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for p in pts {
        match out.last() {
            Some(last) if dist(*last, p) <= min_segment => {}
            _ => out.push(p),
        }
    }
    out
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

fn close_ring(mut pts: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    if pts.first() != pts.last() {
        if let Some(first) = pts.first().copied() {
            pts.push(first);
        }
    }
    pts
}

fn project_line(pts: &[(f64, f64)], projection: Projection) -> LineString<f64> {
    LineString::from(
        pts.iter()
            .map(|(lon, lat)| projection.project(*lon, *lat))
            .collect::<Vec<_>>(),
    )
}

fn signed_ring_area(ring: &[(f64, f64)]) -> f64 {
    Polygon::new(LineString::from(ring.to_vec()), Vec::new()).signed_area()
}

fn orient(ring: Vec<(f64, f64)>, outer: bool, policy: OrientationPolicy) -> Vec<(f64, f64)> {
    if policy == OrientationPolicy::AsIs {
        return ring;
    }
    let ccw = signed_ring_area(&ring) > 0.0;
    if ccw == outer {
        ring
    } else {
        ring.into_iter().rev().collect()
    }
}

/// Split a point chain wherever consecutive longitudes jump across the
/// antimeridian, interpolating the crossing latitude at ±180.
fn split_antimeridian(pts: Vec<(f64, f64)>) -> Vec<Vec<(f64, f64)>> {
    let mut parts: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();
    for p in pts {
        if let Some(&(lon1, lat1)) = current.last() {
            let (lon2, lat2) = p;
            if (lon2 - lon1).abs() > 180.0 {
                // Unwrap the second longitude to the first one's side.
                let unwrapped = if lon1 > 0.0 { lon2 + 360.0 } else { lon2 - 360.0 };
                let edge = if lon1 > 0.0 { 180.0 } else { -180.0 };
                let t = (edge - lon1) / (unwrapped - lon1);
                let lat_cross = lat1 + t * (lat2 - lat1);
                current.push((edge, lat_cross));
                parts.push(std::mem::take(&mut current));
                current.push((-edge, lat_cross));
            }
        }
        current.push(p);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleHint {
    Outer,
    Inner,
    Unknown,
}

impl RoleHint {
    fn parse(role: &str) -> Self {
        match role {
            "outer" => RoleHint::Outer,
            "inner" => RoleHint::Inner,
            _ => RoleHint::Unknown,
        }
    }
}

struct RingSegment {
    way_id: i64,
    role: RoleHint,
    refs: Vec<i64>,
    pts: Vec<(f64, f64)>,
}

struct Ring {
    role: RoleHint,
    pts: Vec<(f64, f64)>,
}

fn member_segments(members: &[ExpandedMember]) -> Result<Vec<RingSegment>, GeometryError> {
    let mut segments = Vec::new();
    for m in members {
        if let ExpandedMember::Way { id, role, way } = m {
            let (way, coords) = way.as_ref().ok_or(GeometryError::MissingWay(*id))?;
            let pts = resolve(way, coords)?;
            if pts.len() < 2 {
                continue;
            }
            segments.push(RingSegment {
                way_id: way.id,
                role: RoleHint::parse(role),
                refs: way.refs.clone(),
                pts,
            });
        }
    }
    Ok(segments)
}

/// Concatenate way segments into closed rings, matching by node ids at
/// the endpoints. A segment chain that cannot be closed is a
/// construction failure.
fn assemble_rings(segments: Vec<RingSegment>) -> Result<Vec<Ring>, GeometryError> {
    let mut used = vec![false; segments.len()];
    let mut rings = Vec::new();
    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let seed = &segments[start];
        let mut refs = seed.refs.clone();
        let mut pts = seed.pts.clone();
        let mut role = seed.role;
        while refs.first() != refs.last() {
            let tail = *refs.last().ok_or(GeometryError::OpenRing(seed.way_id))?;
            let next = segments.iter().enumerate().find(|(i, s)| {
                !used[*i] && (s.refs.first() == Some(&tail) || s.refs.last() == Some(&tail))
            });
            let (i, seg) = match next {
                Some(found) => found,
                None => return Err(GeometryError::OpenRing(seed.way_id)),
            };
            used[i] = true;
            if seg.role != role {
                role = RoleHint::Unknown;
            }
            if seg.refs.first() == Some(&tail) {
                refs.extend_from_slice(&seg.refs[1..]);
                pts.extend_from_slice(&seg.pts[1..]);
            } else {
                refs.extend(seg.refs[..seg.refs.len() - 1].iter().rev());
                pts.extend(seg.pts[..seg.pts.len() - 1].iter().rev());
            }
        }
        let pts = close_ring(collapse(pts, 0.0));
        if pts.len() < 4 {
            return Err(GeometryError::OpenRing(seed.way_id));
        }
        rings.push(Ring { role, pts });
    }
    Ok(rings)
}

/// Classify rings as outer or inner and attach inners to the smallest
/// containing outer. Role hints win where present; containment depth
/// decides the rest, and an inner with no surrounding outer becomes an
/// outer of its own.
fn nest_rings(rings: Vec<Ring>, opts: &GeomOptions) -> Result<Vec<Polygon<f64>>, GeometryError> {
    let inside = |inner: &Ring, outer: &Ring| -> bool {
        let (x, y) = inner.pts[0];
        wn(&outer.pts, x, y) != 0
    };
    let mut outer_idx: Vec<usize> = Vec::new();
    let mut inner_idx: Vec<usize> = Vec::new();
    for (i, ring) in rings.iter().enumerate() {
        match ring.role {
            RoleHint::Outer => outer_idx.push(i),
            RoleHint::Inner => inner_idx.push(i),
            RoleHint::Unknown => {
                let depth = rings
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| *j != i && inside(ring, *other))
                    .count();
                if depth % 2 == 0 {
                    outer_idx.push(i);
                } else {
                    inner_idx.push(i);
                }
            }
        }
    }
    let mut shells: Vec<(usize, Vec<usize>)> = outer_idx.iter().map(|i| (*i, Vec::new())).collect();
    for i in inner_idx {
        let mut best: Option<(usize, f64)> = None;
        for (slot, (o, _)) in shells.iter().enumerate() {
            if inside(&rings[i], &rings[*o]) {
                let a = signed_ring_area(&rings[*o].pts).abs();
                if best.map_or(true, |(_, prev)| a < prev) {
                    best = Some((slot, a));
                }
            }
        }
        match best {
            Some((slot, _)) => shells[slot].1.push(i),
            // Hinted inner with no surrounding outer: topology wins.
            None => shells.push((i, Vec::new())),
        }
    }
    let mut polygons = Vec::with_capacity(shells.len());
    for (o, inners) in shells {
        let exterior = orient(rings[o].pts.clone(), true, opts.orientation);
        let interiors: Vec<LineString<f64>> = inners
            .into_iter()
            .map(|i| {
                let ring = orient(rings[i].pts.clone(), false, opts.orientation);
                project_line(&ring, opts.projection)
            })
            .collect();
        polygons.push(Polygon::new(project_line(&exterior, opts.projection), interiors));
    }
    Ok(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::Tags;

    fn loc(lon: f64, lat: f64) -> Option<Location> {
        Some(Location::from_degrees(lon, lat))
    }

    fn way(id: i64, refs: Vec<i64>) -> Way {
        Way { id, version: None, tags: Tags::new(), refs }
    }

    fn wgs84() -> GeomOptions {
        GeomOptions { projection: Projection::Wgs84, ..Default::default() }
    }

    fn member_way(id: i64, role: &str, refs: Vec<i64>, coords: Vec<(f64, f64)>) -> ExpandedMember {
        ExpandedMember::Way {
            id,
            role: role.to_string(),
            way: Some((
                way(id, refs),
                coords.into_iter().map(|(lon, lat)| loc(lon, lat)).collect(),
            )),
        }
    }

    #[test]
    fn mercator_projection() {
        let (x, y) = Projection::WebMercator.project(0.0, 0.0);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
        let (x, _) = Projection::WebMercator.project(180.0, 0.0);
        assert!((x - 20_037_508.342_789_244).abs() < 1e-3);
        let (_, y1) = Projection::WebMercator.project(0.0, 89.0);
        let (_, y2) = Projection::WebMercator.project(0.0, 86.0);
        // Both clamped to the same latitude bound.
        assert_eq!(y1, y2);
    }

    #[test]
    fn node_to_point() {
        let node = Node {
            id: 1,
            version: None,
            tags: Tags::new(),
            location: Location::from_degrees(10.0, 50.0),
        };
        let g = node_point(&node, &wgs84()).unwrap();
        assert_eq!(g.srid, 4326);
        assert_eq!(g.shape, Geometry::Point(Point::new(10.0, 50.0)));
    }

    #[test]
    fn way_to_linestring_with_missing_node() {
        let w = way(100, vec![1, 2]);
        let coords = vec![loc(10.0, 50.0), None];
        assert_eq!(
            way_linestring(&w, &coords, &wgs84()),
            Err(GeometryError::MissingNode(2))
        );
    }

    #[test]
    fn zero_length_segments_collapse() {
        let w = way(100, vec![1, 2, 3]);
        let coords = vec![loc(10.0, 50.0), loc(10.0, 50.0), loc(11.0, 50.0)];
        let g = way_linestring(&w, &coords, &wgs84()).unwrap();
        match g.shape {
            Geometry::LineString(l) => assert_eq!(l.0.len(), 2),
            other => panic!("expected linestring, got {other:?}"),
        }
    }

    #[test]
    fn degenerate_way_fails() {
        let w = way(100, vec![1, 2]);
        let coords = vec![loc(10.0, 50.0), loc(10.0, 50.0)];
        assert_eq!(
            way_linestring(&w, &coords, &wgs84()),
            Err(GeometryError::DegenerateLine(100))
        );
    }

    #[test]
    fn closed_way_to_polygon_is_oriented() {
        // Clockwise input square.
        let w = way(100, vec![1, 2, 3, 4, 1]);
        let coords = vec![
            loc(0.0, 0.0),
            loc(0.0, 1.0),
            loc(1.0, 1.0),
            loc(1.0, 0.0),
            loc(0.0, 0.0),
        ];
        let g = way_polygon(&w, &coords, &wgs84()).unwrap();
        match g.shape {
            Geometry::Polygon(p) => assert!(p.signed_area() > 0.0),
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn open_way_is_not_a_polygon() {
        let w = way(100, vec![1, 2, 3]);
        let coords = vec![loc(0.0, 0.0), loc(1.0, 0.0), loc(1.0, 1.0)];
        assert_eq!(
            way_polygon(&w, &coords, &wgs84()),
            Err(GeometryError::NotClosed(100))
        );
    }

    #[test]
    fn antimeridian_split() {
        let w = way(100, vec![1, 2]);
        let coords = vec![loc(179.0, 10.0), loc(-179.0, 10.0)];
        let opts = GeomOptions { split_antimeridian: true, ..wgs84() };
        let g = way_linestring(&w, &coords, &opts).unwrap();
        match g.shape {
            Geometry::MultiLineString(m) => {
                assert_eq!(m.0.len(), 2);
                assert_eq!(m.0[0].0.last().unwrap().x, 180.0);
                assert_eq!(m.0[1].0.first().unwrap().x, -180.0);
                assert!((m.0[0].0.last().unwrap().y - 10.0).abs() < 1e-9);
            }
            other => panic!("expected multilinestring, got {other:?}"),
        }
    }

    fn rel(id: i64) -> Relation {
        Relation { id, version: None, tags: Tags::new(), members: Vec::new() }
    }

    #[test]
    fn multipolygon_from_two_outer_ways_and_inner() {
        // Two outer ways forming a 10x10 square, one inner 2x2 square.
        let members = vec![
            member_way(
                1,
                "outer",
                vec![1, 2, 3],
                vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
            ),
            member_way(
                2,
                "outer",
                vec![3, 4, 1],
                vec![(10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            ),
            member_way(
                3,
                "inner",
                vec![5, 6, 7, 8, 5],
                vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0), (4.0, 4.0)],
            ),
        ];
        let g = relation_multipolygon(&rel(7), &members, &wgs84()).unwrap();
        match g.shape {
            Geometry::MultiPolygon(mp) => {
                assert_eq!(mp.0.len(), 1);
                let p = &mp.0[0];
                assert_eq!(p.interiors().len(), 1);
                assert!(p.exterior().0.len() >= 5);
                // Outer counter-clockwise, inner clockwise.
                assert!(Polygon::new(p.exterior().clone(), vec![]).signed_area() > 0.0);
                assert!(Polygon::new(p.interiors()[0].clone(), vec![]).signed_area() < 0.0);
                assert!((p.unsigned_area() - 96.0).abs() < 1e-9);
            }
            other => panic!("expected multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn unclosed_ring_is_reported() {
        let members = vec![member_way(
            1,
            "outer",
            vec![1, 2, 3],
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
        )];
        assert_eq!(
            relation_multipolygon(&rel(7), &members, &wgs84()),
            Err(GeometryError::OpenRing(1))
        );
    }

    #[test]
    fn missing_member_way_is_reported() {
        let members = vec![ExpandedMember::Way { id: 9, role: "outer".into(), way: None }];
        assert_eq!(
            relation_multipolygon(&rel(7), &members, &wgs84()),
            Err(GeometryError::MissingWay(9))
        );
    }

    #[test]
    fn unhinted_rings_nest_by_containment() {
        let members = vec![
            member_way(
                1,
                "",
                vec![1, 2, 3, 4, 1],
                vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            ),
            member_way(
                2,
                "",
                vec![5, 6, 7, 8, 5],
                vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0), (4.0, 4.0)],
            ),
        ];
        let g = relation_multipolygon(&rel(7), &members, &wgs84()).unwrap();
        match g.shape {
            Geometry::MultiPolygon(mp) => {
                assert_eq!(mp.0.len(), 1);
                assert_eq!(mp.0[0].interiors().len(), 1);
            }
            other => panic!("expected multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn determinism_same_input_same_output() {
        let members = || {
            vec![member_way(
                1,
                "outer",
                vec![1, 2, 3, 4, 1],
                vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)],
            )]
        };
        let a = relation_multipolygon(&rel(7), &members(), &wgs84()).unwrap();
        let b = relation_multipolygon(&rel(7), &members(), &wgs84()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn geometry_area() {
        let w = way(100, vec![1, 2, 3, 4, 1]);
        let coords = vec![
            loc(0.0, 0.0),
            loc(2.0, 0.0),
            loc(2.0, 2.0),
            loc(0.0, 2.0),
            loc(0.0, 0.0),
        ];
        let g = way_polygon(&w, &coords, &wgs84()).unwrap();
        assert!((area(&g) - 4.0).abs() < 1e-9);
    }
}
