use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Tags are kept ordered so stored records and emitted rows are
/// byte-for-byte reproducible across runs.
pub type Tags = BTreeMap<String, String>;

/// Fixed-point coordinate scale: 100 nanodegrees per unit.
pub const COORDINATE_SCALE: f64 = 1e7;

/// A lon/lat pair in fixed-point representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            x: (lon * COORDINATE_SCALE).round() as i32,
            y: (lat * COORDINATE_SCALE).round() as i32,
        }
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.x) / COORDINATE_SCALE
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.y) / COORDINATE_SCALE
    }

    pub fn valid(&self) -> bool {
        self.lon().abs() <= 180.0 && self.lat().abs() <= 90.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Node,
    Way,
    Relation,
}

impl ObjectType {
    /// Single-character form used in id_type columns.
    pub fn as_char(self) -> char {
        match self {
            ObjectType::Node => 'N',
            ObjectType::Way => 'W',
            ObjectType::Relation => 'R',
        }
    }
}

/// Key for anything addressed by primitive type and id, e.g. the
/// propagation visited-set and pending row deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OsmId {
    pub kind: ObjectType,
    pub id: i64,
}

impl OsmId {
    pub fn node(id: i64) -> Self {
        Self { kind: ObjectType::Node, id }
    }

    pub fn way(id: i64) -> Self {
        Self { kind: ObjectType::Way, id }
    }

    pub fn relation(id: i64) -> Self {
        Self { kind: ObjectType::Relation, id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub version: Option<i32>,
    pub tags: Tags,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Way {
    pub id: i64,
    pub version: Option<i32>,
    pub tags: Tags,
    pub refs: Vec<i64>,
}

impl Way {
    /// A way is closed when it has at least four refs and the first
    /// and last are the same node.
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 4 && self.refs.first() == self.refs.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub kind: ObjectType,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub version: Option<i32>,
    pub tags: Tags,
    pub members: Vec<Member>,
}

#[derive(EnumString, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationType {
    Unknown,
    Multipolygon,
    Route,
    RouteMaster,
    Restriction,
    Boundary,
    PublicTransport,
    DestinationSign,
    Waterway,
    Enforcement,
    Connectivity,
}

impl RelationType {
    pub fn from_type_tag(tags: &Tags) -> Self {
        use convert_case::{Case, Casing};
        match tags.get("type") {
            Some(t) => RelationType::from_str(t.to_case(Case::Pascal).as_str())
                .unwrap_or(RelationType::Unknown),
            None => RelationType::Unknown,
        }
    }

    /// Relations rendered through multipolygon ring assembly.
    pub fn is_area(self) -> bool {
        matches!(self, RelationType::Multipolygon | RelationType::Boundary)
    }
}

/// One element of the input event stream. Deletes carry only the id.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    NodeAdd(Node),
    NodeModify(Node),
    NodeDelete(i64),
    WayAdd(Way),
    WayModify(Way),
    WayDelete(i64),
    RelationAdd(Relation),
    RelationModify(Relation),
    RelationDelete(i64),
}

impl ChangeEvent {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ChangeEvent::NodeAdd(_) | ChangeEvent::NodeModify(_) | ChangeEvent::NodeDelete(_) => {
                ObjectType::Node
            }
            ChangeEvent::WayAdd(_) | ChangeEvent::WayModify(_) | ChangeEvent::WayDelete(_) => {
                ObjectType::Way
            }
            ChangeEvent::RelationAdd(_)
            | ChangeEvent::RelationModify(_)
            | ChangeEvent::RelationDelete(_) => ObjectType::Relation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_roundtrip() {
        let loc = Location::from_degrees(10.0, 50.0);
        assert_eq!(loc.x, 100_000_000);
        assert_eq!(loc.lon(), 10.0);
        assert_eq!(loc.lat(), 50.0);
        assert!(loc.valid());
        assert!(!Location::from_degrees(181.0, 0.0).valid());
    }

    #[test]
    fn relation_type_from_tag() {
        let mut tags = Tags::new();
        tags.insert("type".into(), "multipolygon".into());
        assert_eq!(RelationType::from_type_tag(&tags), RelationType::Multipolygon);
        tags.insert("type".into(), "route_master".into());
        assert_eq!(RelationType::from_type_tag(&tags), RelationType::RouteMaster);
        tags.insert("type".into(), "sasquatch".into());
        assert_eq!(RelationType::from_type_tag(&tags), RelationType::Unknown);
        assert_eq!(RelationType::from_type_tag(&Tags::new()), RelationType::Unknown);
    }

    #[test]
    fn closed_way() {
        let way = Way {
            id: 1,
            version: None,
            tags: Tags::new(),
            refs: vec![1, 2, 3, 1],
        };
        assert!(way.is_closed());
        let open = Way { refs: vec![1, 2, 3], ..way };
        assert!(!open.is_closed());
    }
}
