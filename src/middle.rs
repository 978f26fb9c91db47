use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::osm::{Location, Node, Relation, Way};

const MAGIC: &[u8; 7] = b"flexosm";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 12;

const NODE_FILE: &str = "nodes.loc";
const WAY_LOG: &str = "ways.log";
const REL_LOG: &str = "relations.log";

/// The reversible object store. Keeps every primitive for geometry
/// reconstruction, and (when updatable) the reverse indexes that drive
/// change propagation.
///
/// Reads take `&self` so Propagate may run lookups from worker
/// threads; all writes are serialized by the dispatcher.
pub struct Middle {
    backend: Backend,
    updatable: bool,
    node_ways: HashMap<i64, BTreeSet<i64>>,
    node_rels: HashMap<i64, BTreeSet<i64>>,
    way_rels: HashMap<i64, BTreeSet<i64>>,
    rel_rels: HashMap<i64, BTreeSet<i64>>,
}

enum Backend {
    Flat {
        nodes: HashMap<i64, Location>,
        ways: BTreeMap<i64, Way>,
        rels: BTreeMap<i64, Relation>,
    },
    File(FileBackend),
}

impl Middle {
    /// Everything in memory. Good for small extracts and tests.
    pub fn flat(updatable: bool) -> Self {
        Self {
            backend: Backend::Flat {
                nodes: HashMap::new(),
                ways: BTreeMap::new(),
                rels: BTreeMap::new(),
            },
            updatable,
            node_ways: HashMap::new(),
            node_rels: HashMap::new(),
            way_rels: HashMap::new(),
            rel_rels: HashMap::new(),
        }
    }

    /// File-backed store under `dir`: a sparse location file for nodes
    /// and append-only logs for ways and relations. Reopening an
    /// existing store rebuilds the in-memory offset and reverse
    /// indexes from the logs.
    pub fn open(dir: &Path, updatable: bool) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        let backend = FileBackend {
            nodes: NodeFile::open(&dir.join(NODE_FILE))?,
            ways: ObjectLog::open(&dir.join(WAY_LOG))?,
            rels: ObjectLog::open(&dir.join(REL_LOG))?,
        };
        let mut middle = Self {
            backend: Backend::File(backend),
            updatable,
            node_ways: HashMap::new(),
            node_rels: HashMap::new(),
            way_rels: HashMap::new(),
            rel_rels: HashMap::new(),
        };
        if updatable {
            middle.rebuild_reverse_indexes()?;
        }
        Ok(middle)
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub fn put_node(&mut self, node: &Node) -> Result<(), StorageError> {
        match &mut self.backend {
            Backend::Flat { nodes, .. } => {
                nodes.insert(node.id, node.location);
                Ok(())
            }
            Backend::File(f) => f.nodes.set(node.id, node.location),
        }
    }

    pub fn put_way(&mut self, way: &Way) -> Result<(), StorageError> {
        if self.updatable {
            for r in &way.refs {
                self.node_ways.entry(*r).or_default().insert(way.id);
            }
        }
        match &mut self.backend {
            Backend::Flat { ways, .. } => {
                ways.insert(way.id, way.clone());
                Ok(())
            }
            Backend::File(f) => f.ways.append(way.id, way),
        }
    }

    pub fn put_relation(&mut self, rel: &Relation) -> Result<(), StorageError> {
        if self.updatable {
            self.index_relation_members(rel);
        }
        match &mut self.backend {
            Backend::Flat { rels, .. } => {
                rels.insert(rel.id, rel.clone());
                Ok(())
            }
            Backend::File(f) => f.rels.append(rel.id, rel),
        }
    }

    pub fn delete_node(&mut self, id: i64) -> Result<(), StorageError> {
        // Reverse entries stay: dependents of a deleted node must
        // still be found during Propagate.
        match &mut self.backend {
            Backend::Flat { nodes, .. } => {
                nodes.remove(&id);
                Ok(())
            }
            Backend::File(f) => f.nodes.clear(id),
        }
    }

    pub fn delete_way(&mut self, id: i64) -> Result<(), StorageError> {
        match &mut self.backend {
            Backend::Flat { ways, .. } => {
                ways.remove(&id);
                Ok(())
            }
            Backend::File(f) => f.ways.tombstone(id),
        }
    }

    pub fn delete_relation(&mut self, id: i64) -> Result<(), StorageError> {
        match &mut self.backend {
            Backend::Flat { rels, .. } => {
                rels.remove(&id);
                Ok(())
            }
            Backend::File(f) => f.rels.tombstone(id),
        }
    }

    pub fn get_node_coords(&self, id: i64) -> Result<Option<Location>, StorageError> {
        match &self.backend {
            Backend::Flat { nodes, .. } => Ok(nodes.get(&id).copied()),
            Backend::File(f) => f.nodes.get(id),
        }
    }

    pub fn get_way(&self, id: i64) -> Result<Option<Way>, StorageError> {
        match &self.backend {
            Backend::Flat { ways, .. } => Ok(ways.get(&id).cloned()),
            Backend::File(f) => f.ways.get(id),
        }
    }

    pub fn get_relation(&self, id: i64) -> Result<Option<Relation>, StorageError> {
        match &self.backend {
            Backend::Flat { rels, .. } => Ok(rels.get(&id).cloned()),
            Backend::File(f) => f.rels.get(id),
        }
    }

    pub fn ways_using_node(&self, id: i64) -> Vec<i64> {
        self.node_ways
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn relations_using_node(&self, id: i64) -> Vec<i64> {
        self.node_rels
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn relations_using_way(&self, id: i64) -> Vec<i64> {
        self.way_rels
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn relations_using_relation(&self, id: i64) -> Vec<i64> {
        self.rel_rels
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Node locations for every ref of a way, in order. `None` marks a
    /// missing node, which the geometry builder reports as a
    /// construction failure.
    pub fn expand_way(&self, way: &Way) -> Result<Vec<Option<Location>>, StorageError> {
        way.refs.iter().map(|r| self.get_node_coords(*r)).collect()
    }

    pub fn expand_relation(&self, rel: &Relation) -> Result<Vec<ExpandedMember>, StorageError> {
        let mut out = Vec::with_capacity(rel.members.len());
        for m in &rel.members {
            out.push(match m.kind {
                crate::osm::ObjectType::Node => ExpandedMember::Node {
                    id: m.id,
                    role: m.role.clone(),
                    location: self.get_node_coords(m.id)?,
                },
                crate::osm::ObjectType::Way => {
                    let way = match self.get_way(m.id)? {
                        Some(w) => {
                            let coords = self.expand_way(&w)?;
                            Some((w, coords))
                        }
                        None => None,
                    };
                    ExpandedMember::Way { id: m.id, role: m.role.clone(), way }
                }
                crate::osm::ObjectType::Relation => {
                    ExpandedMember::Relation { id: m.id, role: m.role.clone() }
                }
            });
        }
        Ok(out)
    }

    fn index_relation_members(&mut self, rel: &Relation) {
        for m in &rel.members {
            match m.kind {
                crate::osm::ObjectType::Node => {
                    self.node_rels.entry(m.id).or_default().insert(rel.id);
                }
                crate::osm::ObjectType::Way => {
                    self.way_rels.entry(m.id).or_default().insert(rel.id);
                }
                crate::osm::ObjectType::Relation => {
                    self.rel_rels.entry(m.id).or_default().insert(rel.id);
                }
            }
        }
    }

    fn rebuild_reverse_indexes(&mut self) -> Result<(), StorageError> {
        let (ways, rels) = match &self.backend {
            Backend::File(f) => (f.ways.live_records::<Way>()?, f.rels.live_records::<Relation>()?),
            Backend::Flat { .. } => return Ok(()),
        };
        for way in &ways {
            for r in &way.refs {
                self.node_ways.entry(*r).or_default().insert(way.id);
            }
        }
        for rel in rels {
            self.index_relation_members(&rel);
        }
        Ok(())
    }
}

/// A relation member together with everything needed to build its
/// geometry. Nested relations are not expanded; propagation depth
/// handles them.
pub enum ExpandedMember {
    Node {
        id: i64,
        role: String,
        location: Option<Location>,
    },
    Way {
        id: i64,
        role: String,
        way: Option<(Way, Vec<Option<Location>>)>,
    },
    Relation {
        id: i64,
        role: String,
    },
}

struct FileBackend {
    nodes: NodeFile,
    ways: ObjectLog,
    rels: ObjectLog,
}

/// Dense node location store: one u64 slot per id in a sparse file.
/// Slot value is the packed location plus one, so a zero-filled
/// (never written) slot reads as absent.
struct NodeFile {
    file: File,
    path: PathBuf,
    len: u64,
    /// Non-standard negative ids land here instead of the file.
    overlay: HashMap<i64, Location>,
}

impl NodeFile {
    fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        let len = file.metadata().map_err(|e| io_err(path, e))?.len();
        let mut nf = Self { file, path: path.to_path_buf(), len, overlay: HashMap::new() };
        if len == 0 {
            nf.write_header()?;
        } else {
            check_header(&nf.file, path)?;
        }
        Ok(nf)
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        let mut header = [0u8; HEADER_LEN as usize];
        header[..7].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        self.file
            .write_all_at(&header, 0)
            .map_err(|e| io_err(&self.path, e))?;
        self.len = HEADER_LEN;
        Ok(())
    }

    fn slot(id: i64) -> u64 {
        HEADER_LEN + (id as u64) * 8
    }

    fn set(&mut self, id: i64, loc: Location) -> Result<(), StorageError> {
        if id < 0 {
            self.overlay.insert(id, loc);
            return Ok(());
        }
        let packed = ((loc.x as u32 as u64) << 32 | loc.y as u32 as u64).wrapping_add(1);
        let offset = Self::slot(id);
        self.file
            .write_all_at(&packed.to_le_bytes(), offset)
            .map_err(|e| io_err(&self.path, e))?;
        self.len = self.len.max(offset + 8);
        Ok(())
    }

    fn clear(&mut self, id: i64) -> Result<(), StorageError> {
        if id < 0 {
            self.overlay.remove(&id);
            return Ok(());
        }
        let offset = Self::slot(id);
        if offset + 8 > self.len {
            return Ok(());
        }
        self.file
            .write_all_at(&0u64.to_le_bytes(), offset)
            .map_err(|e| io_err(&self.path, e))
    }

    fn get(&self, id: i64) -> Result<Option<Location>, StorageError> {
        if id < 0 {
            return Ok(self.overlay.get(&id).copied());
        }
        let offset = Self::slot(id);
        if offset + 8 > self.len {
            return Ok(None);
        }
        let mut buf = [0u8; 8];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| io_err(&self.path, e))?;
        let raw = u64::from_le_bytes(buf);
        if raw == 0 {
            return Ok(None);
        }
        let packed = raw - 1;
        Ok(Some(Location {
            x: (packed >> 32) as u32 as i32,
            y: packed as u32 as i32,
        }))
    }
}

/// Append-only log of length-prefixed records with an in-memory
/// id → offset index. Record header: kind byte, id, payload length.
struct ObjectLog {
    file: File,
    path: PathBuf,
    end: u64,
    index: HashMap<i64, u64>,
}

const RECORD_HEADER: u64 = 13;
const KIND_LIVE: u8 = b'O';
const KIND_TOMBSTONE: u8 = b'X';

impl ObjectLog {
    fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        let len = file.metadata().map_err(|e| io_err(path, e))?.len();
        let mut log = Self { file, path: path.to_path_buf(), end: len, index: HashMap::new() };
        if len == 0 {
            let mut header = [0u8; HEADER_LEN as usize];
            header[..7].copy_from_slice(MAGIC);
            header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
            log.file
                .write_all_at(&header, 0)
                .map_err(|e| io_err(path, e))?;
            log.end = HEADER_LEN;
        } else {
            check_header(&log.file, path)?;
            log.scan()?;
        }
        Ok(log)
    }

    /// Rebuild the offset index by walking every record. Later records
    /// supersede earlier ones; tombstones drop the id.
    fn scan(&mut self) -> Result<(), StorageError> {
        let mut offset = HEADER_LEN;
        while offset + RECORD_HEADER <= self.end {
            let mut header = [0u8; RECORD_HEADER as usize];
            self.file
                .read_exact_at(&mut header, offset)
                .map_err(|e| io_err(&self.path, e))?;
            let kind = header[0];
            let id = i64::from_le_bytes(header[1..9].try_into().unwrap());
            let len = u32::from_le_bytes(header[9..13].try_into().unwrap()) as u64;
            match kind {
                KIND_LIVE => {
                    self.index.insert(id, offset);
                }
                KIND_TOMBSTONE => {
                    self.index.remove(&id);
                }
                _ => return Err(StorageError::BadHeader(self.path.display().to_string())),
            }
            offset += RECORD_HEADER + len;
        }
        Ok(())
    }

    fn append<T: Serialize>(&mut self, id: i64, value: &T) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(value).map_err(StorageError::Encode)?;
        let mut record = Vec::with_capacity(RECORD_HEADER as usize + payload.len());
        record.push(KIND_LIVE);
        record.extend_from_slice(&id.to_le_bytes());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&payload);
        self.file
            .write_all_at(&record, self.end)
            .map_err(|e| io_err(&self.path, e))?;
        self.index.insert(id, self.end);
        self.end += record.len() as u64;
        Ok(())
    }

    fn tombstone(&mut self, id: i64) -> Result<(), StorageError> {
        let mut record = [0u8; RECORD_HEADER as usize];
        record[0] = KIND_TOMBSTONE;
        record[1..9].copy_from_slice(&id.to_le_bytes());
        self.file
            .write_all_at(&record, self.end)
            .map_err(|e| io_err(&self.path, e))?;
        self.index.remove(&id);
        self.end += RECORD_HEADER;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, id: i64) -> Result<Option<T>, StorageError> {
        let offset = match self.index.get(&id) {
            Some(o) => *o,
            None => return Ok(None),
        };
        let mut header = [0u8; RECORD_HEADER as usize];
        self.file
            .read_exact_at(&mut header, offset)
            .map_err(|e| io_err(&self.path, e))?;
        let len = u32::from_le_bytes(header[9..13].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        self.file
            .read_exact_at(&mut payload, offset + RECORD_HEADER)
            .map_err(|e| io_err(&self.path, e))?;
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|source| StorageError::Decode { offset, source })
    }

    fn live_records<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::with_capacity(self.index.len());
        for id in self.index.keys() {
            if let Some(v) = self.get(*id)? {
                out.push(v);
            }
        }
        Ok(out)
    }
}

fn check_header(file: &File, path: &Path) -> Result<(), StorageError> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact_at(&mut header, 0)
        .map_err(|_| StorageError::BadHeader(path.display().to_string()))?;
    if &header[..7] != MAGIC {
        return Err(StorageError::BadHeader(path.display().to_string()));
    }
    let version = u32::from_le_bytes(header[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(StorageError::UnknownVersion(version));
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io { path: path.display().to_string(), source }
}
