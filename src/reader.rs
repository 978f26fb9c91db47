use std::path::Path;

use log::warn;
use osmpbf::{BlobDecode, BlobReader, Element};

use crate::error::RunError;
use crate::osm::{ChangeEvent, Location, Member, Node, ObjectType, Relation, Tags, Way};

/// How PBF elements map to change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Everything is an Add; invisible objects are skipped.
    Import,
    /// Change files: `visible = false` deletes, everything else is a
    /// Modify.
    Update,
}

/// Stream a PBF file through the handler, blob by blob, in file order.
pub fn read_pbf<F>(path: &Path, mode: ReadMode, mut handle: F) -> Result<(), RunError>
where
    F: FnMut(ChangeEvent) -> Result<(), RunError>,
{
    let read_err = |source| RunError::Read { path: path.display().to_string(), source };
    let reader = BlobReader::from_path(path).map_err(read_err)?;
    for blob in reader {
        let blob = blob.map_err(read_err)?;
        match blob.decode().map_err(read_err)? {
            BlobDecode::OsmHeader(_) => {}
            BlobDecode::OsmData(block) => {
                for element in block.elements() {
                    if let Some(event) = convert(element, mode, path)? {
                        handle(event)?;
                    }
                }
            }
            BlobDecode::Unknown(unknown) => warn!("Unknown blob: {unknown}"),
        }
    }
    Ok(())
}

fn convert(
    element: Element,
    mode: ReadMode,
    path: &Path,
) -> Result<Option<ChangeEvent>, RunError> {
    let read_err = |source| RunError::Read { path: path.display().to_string(), source };
    Ok(match element {
        Element::Node(n) => {
            let info = n.info();
            let node = Node {
                id: n.id(),
                version: info.version(),
                tags: collect_tags(n.tags()),
                location: Location::from_degrees(n.lon(), n.lat()),
            };
            node_event(node, info.visible(), mode)
        }
        Element::DenseNode(dn) => {
            let (visible, version) = match dn.info() {
                Some(i) => (i.visible(), Some(i.version())),
                None => (true, None),
            };
            let node = Node {
                id: dn.id(),
                version,
                tags: collect_tags(dn.tags()),
                location: Location::from_degrees(dn.lon(), dn.lat()),
            };
            node_event(node, visible, mode)
        }
        Element::Way(w) => {
            let info = w.info();
            let visible = info.visible();
            match (mode, visible) {
                (ReadMode::Import, false) => None,
                (ReadMode::Update, false) => Some(ChangeEvent::WayDelete(w.id())),
                (_, true) => {
                    let way = Way {
                        id: w.id(),
                        version: info.version(),
                        tags: collect_tags(w.tags()),
                        refs: w.refs().collect(),
                    };
                    Some(match mode {
                        ReadMode::Import => ChangeEvent::WayAdd(way),
                        ReadMode::Update => ChangeEvent::WayModify(way),
                    })
                }
            }
        }
        Element::Relation(r) => {
            let info = r.info();
            let visible = info.visible();
            match (mode, visible) {
                (ReadMode::Import, false) => None,
                (ReadMode::Update, false) => Some(ChangeEvent::RelationDelete(r.id())),
                (_, true) => {
                    let mut members = Vec::new();
                    for m in r.members() {
                        members.push(Member {
                            kind: match m.member_type {
                                osmpbf::RelMemberType::Node => ObjectType::Node,
                                osmpbf::RelMemberType::Way => ObjectType::Way,
                                osmpbf::RelMemberType::Relation => ObjectType::Relation,
                            },
                            id: m.member_id,
                            role: m.role().map_err(read_err)?.to_string(),
                        });
                    }
                    let rel = Relation {
                        id: r.id(),
                        version: info.version(),
                        tags: collect_tags(r.tags()),
                        members,
                    };
                    Some(match mode {
                        ReadMode::Import => ChangeEvent::RelationAdd(rel),
                        ReadMode::Update => ChangeEvent::RelationModify(rel),
                    })
                }
            }
        }
    })
}

fn node_event(node: Node, visible: bool, mode: ReadMode) -> Option<ChangeEvent> {
    match (mode, visible) {
        (ReadMode::Import, false) => None,
        (ReadMode::Update, false) => Some(ChangeEvent::NodeDelete(node.id)),
        (ReadMode::Import, true) => Some(ChangeEvent::NodeAdd(node)),
        (ReadMode::Update, true) => Some(ChangeEvent::NodeModify(node)),
    }
}

fn collect_tags<'a, I>(tags: I) -> Tags
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
