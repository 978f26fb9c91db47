use geo_types::Polygon;
use wkt::TryFromWkt;

use crate::error::ConfigError;
use crate::poly::wn;

#[derive(Clone)]
pub struct Bbox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bbox {
    /// Parse "xmin,ymin,xmax,ymax".
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let e: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ConfigError::BadBbox(s.to_string()))?;
        if e.len() != 4 || e[0] > e[2] || e[1] > e[3] {
            return Err(ConfigError::BadBbox(s.to_string()));
        }
        Ok(Bbox { xmin: e[0], ymin: e[1], xmax: e[2], ymax: e[3] })
    }
}

/// Import filter on node coordinates.
#[derive(Clone)]
pub enum BoundsFilter {
    Bbox(Bbox),
    Polygon(Vec<(f64, f64)>),
    None,
}

impl BoundsFilter {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            BoundsFilter::Bbox(b) => {
                lon >= b.xmin && lon <= b.xmax && lat >= b.ymin && lat <= b.ymax
            }
            BoundsFilter::Polygon(ring) => wn(ring, lon, lat) != 0,
            BoundsFilter::None => true,
        }
    }

}

/// Parse the exterior ring of a WKT polygon into a closed vertex list.
pub fn parse_wkt_ring(s: &str) -> Result<Vec<(f64, f64)>, ConfigError> {
    let p: Polygon<f64> = Polygon::try_from_wkt_str(s)
        .map_err(|e| ConfigError::BadPolygonFilter(e.to_string()))?;
    Ok(p.exterior().coords().map(|c| (c.x, c.y)).collect())
}
