use std::fmt::Write;

use geo_types::{Coord, Geometry, LineString, Polygon};

use crate::geometry::Geom;

/// Extended WKB as understood by PostGIS: little-endian, SRID flag on
/// the outermost geometry only. This is the wire form geometry columns
/// take in COPY streams, hex-encoded.
const SRID_FLAG: u32 = 0x2000_0000;

pub fn encode_hex(geom: &Geom) -> String {
    let mut buf = Vec::new();
    write_geometry(&mut buf, &geom.shape, Some(geom.srid));
    let mut out = String::with_capacity(buf.len() * 2);
    for b in buf {
        // Writing to a String cannot fail.
        let _ = write!(out, "{b:02X}");
    }
    out
}

fn write_geometry(buf: &mut Vec<u8>, shape: &Geometry<f64>, srid: Option<u32>) {
    match shape {
        Geometry::Point(p) => {
            write_header(buf, 1, srid);
            write_coord(buf, &p.0);
        }
        Geometry::Line(l) => {
            let line: LineString<f64> = LineString::from(vec![l.start, l.end]);
            write_geometry(buf, &Geometry::LineString(line), srid);
        }
        Geometry::LineString(l) => {
            write_header(buf, 2, srid);
            write_points(buf, &l.0);
        }
        Geometry::Polygon(p) => {
            write_header(buf, 3, srid);
            write_polygon_body(buf, p);
        }
        Geometry::MultiPoint(m) => {
            write_header(buf, 4, srid);
            buf.extend((m.0.len() as u32).to_le_bytes());
            for p in &m.0 {
                write_geometry(buf, &Geometry::Point(*p), None);
            }
        }
        Geometry::MultiLineString(m) => {
            write_header(buf, 5, srid);
            buf.extend((m.0.len() as u32).to_le_bytes());
            for l in &m.0 {
                write_geometry(buf, &Geometry::LineString(l.clone()), None);
            }
        }
        Geometry::MultiPolygon(m) => {
            write_header(buf, 6, srid);
            buf.extend((m.0.len() as u32).to_le_bytes());
            for p in &m.0 {
                write_geometry(buf, &Geometry::Polygon(p.clone()), None);
            }
        }
        Geometry::GeometryCollection(c) => {
            write_header(buf, 7, srid);
            buf.extend((c.0.len() as u32).to_le_bytes());
            for g in &c.0 {
                write_geometry(buf, g, None);
            }
        }
        Geometry::Rect(r) => {
            write_geometry(buf, &Geometry::Polygon(r.to_polygon()), srid);
        }
        Geometry::Triangle(t) => {
            write_geometry(buf, &Geometry::Polygon(t.to_polygon()), srid);
        }
    }
}

fn write_header(buf: &mut Vec<u8>, code: u32, srid: Option<u32>) {
    buf.push(1); // little-endian
    match srid {
        Some(s) => {
            buf.extend((code | SRID_FLAG).to_le_bytes());
            buf.extend(s.to_le_bytes());
        }
        None => buf.extend(code.to_le_bytes()),
    }
}

fn write_polygon_body(buf: &mut Vec<u8>, p: &Polygon<f64>) {
    let rings = 1 + p.interiors().len() as u32;
    buf.extend(rings.to_le_bytes());
    write_points(buf, &p.exterior().0);
    for ring in p.interiors() {
        write_points(buf, &ring.0);
    }
}

fn write_points(buf: &mut Vec<u8>, pts: &[Coord<f64>]) {
    buf.extend((pts.len() as u32).to_le_bytes());
    for c in pts {
        write_coord(buf, c);
    }
}

fn write_coord(buf: &mut Vec<u8>, c: &Coord<f64>) {
    buf.extend(c.x.to_le_bytes());
    buf.extend(c.y.to_le_bytes());
}
