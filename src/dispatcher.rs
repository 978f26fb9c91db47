use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use crate::bounds::BoundsFilter;
use crate::db::Database;
use crate::error::RunError;
use crate::evaluator::{Emitter, Evaluator, ObjectContext, ObjectRef};
use crate::geometry::GeomOptions;
use crate::middle::Middle;
use crate::osm::{ChangeEvent, Node, ObjectType, OsmId, Relation, Way};
use crate::schema::TableDef;
use crate::sink::Sink;

/// How many events pass between cancellation checks; also the
/// propagation batch size.
const BATCH: u64 = 4096;

#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
    pub deletes: u64,
    pub reprocessed: u64,
    pub rows: u64,
    pub geometry_failures: u64,
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map_or(false, |c| c.load(Ordering::Relaxed))
}

/// Import run: a single pass over an ordered add-only stream, phases
/// strictly nodes → ways → relations.
pub struct ImportRun<'a> {
    middle: &'a mut Middle,
    evaluator: &'a mut dyn Evaluator,
    sink: &'a mut Sink,
    db: &'a mut dyn Database,
    emitter: Emitter<'a>,
    bounds: BoundsFilter,
    default_options: GeomOptions,
    cancel: Option<&'a AtomicBool>,
    phase: ObjectType,
    stats: RunStats,
    seen: u64,
}

impl<'a> ImportRun<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        middle: &'a mut Middle,
        evaluator: &'a mut dyn Evaluator,
        sink: &'a mut Sink,
        db: &'a mut dyn Database,
        tables: &'a [TableDef],
        default_options: GeomOptions,
        bounds: BoundsFilter,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        let default_srid = default_options.projection.srid();
        Self {
            middle,
            evaluator,
            sink,
            db,
            emitter: Emitter::new(tables, default_srid),
            bounds,
            default_options,
            cancel,
            phase: ObjectType::Node,
            stats: RunStats::default(),
            seen: 0,
        }
    }

    fn enter_phase(&mut self, next: ObjectType) -> Result<(), RunError> {
        if next < self.phase {
            return Err(RunError::OutOfOrder { got: next, phase: self.phase });
        }
        if next > self.phase {
            match self.phase {
                ObjectType::Node => info!("Imported {} nodes", self.stats.nodes),
                ObjectType::Way => info!("Imported {} ways", self.stats.ways),
                ObjectType::Relation => {}
            }
            self.phase = next;
            if cancelled(self.cancel) {
                self.sink.flush_all(self.db)?;
                return Err(RunError::Cancelled);
            }
        }
        Ok(())
    }

    pub fn handle(&mut self, event: ChangeEvent) -> Result<(), RunError> {
        self.seen += 1;
        if self.seen % BATCH == 0 && cancelled(self.cancel) {
            self.sink.flush_all(self.db)?;
            return Err(RunError::Cancelled);
        }
        match event {
            ChangeEvent::NodeAdd(node) => {
                self.enter_phase(ObjectType::Node)?;
                if !self.bounds.contains(node.location.lon(), node.location.lat()) {
                    return Ok(());
                }
                self.stats.nodes += 1;
                self.middle.put_node(&node)?;
                self.emitter.begin(OsmId::node(node.id));
                let ctx = ObjectContext::new(ObjectRef::Node(&node), self.default_options);
                self.evaluator.process_node(&ctx, &mut self.emitter)?;
                for row in self.emitter.end() {
                    self.sink.stage(self.db, row)?;
                }
                Ok(())
            }
            ChangeEvent::WayAdd(way) => {
                self.enter_phase(ObjectType::Way)?;
                self.stats.ways += 1;
                self.middle.put_way(&way)?;
                let coords = self.middle.expand_way(&way)?;
                self.emitter.begin(OsmId::way(way.id));
                let ctx = ObjectContext::new(ObjectRef::Way(&way, &coords), self.default_options);
                self.evaluator.process_way(&ctx, &mut self.emitter)?;
                for row in self.emitter.end() {
                    self.sink.stage(self.db, row)?;
                }
                Ok(())
            }
            ChangeEvent::RelationAdd(rel) => {
                self.enter_phase(ObjectType::Relation)?;
                self.stats.relations += 1;
                self.middle.put_relation(&rel)?;
                let members = self.middle.expand_relation(&rel)?;
                self.emitter.begin(OsmId::relation(rel.id));
                let ctx =
                    ObjectContext::new(ObjectRef::Relation(&rel, &members), self.default_options);
                self.evaluator.process_relation(&ctx, &mut self.emitter)?;
                for row in self.emitter.end() {
                    self.sink.stage(self.db, row)?;
                }
                Ok(())
            }
            ChangeEvent::NodeModify(_) | ChangeEvent::WayModify(_)
            | ChangeEvent::RelationModify(_) => {
                Err(RunError::BadImportEvent(event.object_type(), "modify"))
            }
            ChangeEvent::NodeDelete(_) | ChangeEvent::WayDelete(_)
            | ChangeEvent::RelationDelete(_) => {
                Err(RunError::BadImportEvent(event.object_type(), "delete"))
            }
        }
    }

    pub fn finish(mut self) -> Result<RunStats, RunError> {
        match self.phase {
            ObjectType::Node => info!("Imported {} nodes", self.stats.nodes),
            ObjectType::Way => info!("Imported {} ways", self.stats.ways),
            ObjectType::Relation => info!("Imported {} relations", self.stats.relations),
        }
        if cancelled(self.cancel) {
            self.sink.flush_all(self.db)?;
            return Err(RunError::Cancelled);
        }
        self.sink.commit_import(self.db)?;
        self.stats.rows = self.sink.staged_rows();
        self.stats.geometry_failures = self.emitter.geometry_failures;
        Ok(self.stats)
    }
}

/// Update run: Apply every change to the middle and the tables, then
/// Propagate to the dependents found through the reverse indexes.
pub struct UpdateRun<'a> {
    middle: &'a mut Middle,
    evaluator: &'a mut dyn Evaluator,
    sink: &'a mut Sink,
    db: &'a mut dyn Database,
    emitter: Emitter<'a>,
    default_options: GeomOptions,
    /// Relation-of-relation hops to chase during Propagate.
    depth: u32,
    cancel: Option<&'a AtomicBool>,
    stats: RunStats,
    seen: u64,
    touched_nodes: BTreeSet<i64>,
    touched_ways: BTreeSet<i64>,
    touched_rels: BTreeSet<i64>,
    /// Everything already evaluated this run, keyed by (type, id).
    visited: HashSet<OsmId>,
}

impl<'a> UpdateRun<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        middle: &'a mut Middle,
        evaluator: &'a mut dyn Evaluator,
        sink: &'a mut Sink,
        db: &'a mut dyn Database,
        tables: &'a [TableDef],
        default_options: GeomOptions,
        depth: u32,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        let default_srid = default_options.projection.srid();
        Self {
            middle,
            evaluator,
            sink,
            db,
            emitter: Emitter::new(tables, default_srid),
            default_options,
            depth,
            cancel,
            stats: RunStats::default(),
            seen: 0,
            touched_nodes: BTreeSet::new(),
            touched_ways: BTreeSet::new(),
            touched_rels: BTreeSet::new(),
            visited: HashSet::new(),
        }
    }

    fn eval_node(&mut self, node: &Node) -> Result<(), RunError> {
        self.emitter.begin(OsmId::node(node.id));
        let ctx = ObjectContext::new(ObjectRef::Node(node), self.default_options);
        self.evaluator.process_node(&ctx, &mut self.emitter)?;
        for row in self.emitter.end() {
            self.sink.stage(self.db, row)?;
        }
        Ok(())
    }

    fn eval_way(&mut self, way: &Way) -> Result<(), RunError> {
        let coords = self.middle.expand_way(way)?;
        self.emitter.begin(OsmId::way(way.id));
        let ctx = ObjectContext::new(ObjectRef::Way(way, &coords), self.default_options);
        self.evaluator.process_way(&ctx, &mut self.emitter)?;
        for row in self.emitter.end() {
            self.sink.stage(self.db, row)?;
        }
        Ok(())
    }

    fn eval_relation(&mut self, rel: &Relation) -> Result<(), RunError> {
        let members = self.middle.expand_relation(rel)?;
        self.emitter.begin(OsmId::relation(rel.id));
        let ctx = ObjectContext::new(ObjectRef::Relation(rel, &members), self.default_options);
        self.evaluator.process_relation(&ctx, &mut self.emitter)?;
        for row in self.emitter.end() {
            self.sink.stage(self.db, row)?;
        }
        Ok(())
    }

    pub fn handle(&mut self, event: ChangeEvent) -> Result<(), RunError> {
        self.seen += 1;
        if self.seen % BATCH == 0 && cancelled(self.cancel) {
            self.sink.flush_all(self.db)?;
            return Err(RunError::Cancelled);
        }
        match event {
            ChangeEvent::NodeAdd(node) | ChangeEvent::NodeModify(node) => {
                self.stats.nodes += 1;
                self.touched_nodes.insert(node.id);
                self.visited.insert(OsmId::node(node.id));
                self.sink.mark_delete(OsmId::node(node.id));
                self.middle.put_node(&node)?;
                self.eval_node(&node)
            }
            ChangeEvent::NodeDelete(id) => {
                self.stats.deletes += 1;
                self.touched_nodes.insert(id);
                self.visited.insert(OsmId::node(id));
                self.sink.mark_delete(OsmId::node(id));
                self.middle.delete_node(id)?;
                Ok(())
            }
            ChangeEvent::WayAdd(way) | ChangeEvent::WayModify(way) => {
                self.stats.ways += 1;
                self.touched_ways.insert(way.id);
                self.visited.insert(OsmId::way(way.id));
                self.sink.mark_delete(OsmId::way(way.id));
                self.middle.put_way(&way)?;
                self.eval_way(&way)
            }
            ChangeEvent::WayDelete(id) => {
                self.stats.deletes += 1;
                self.touched_ways.insert(id);
                self.visited.insert(OsmId::way(id));
                self.sink.mark_delete(OsmId::way(id));
                self.middle.delete_way(id)?;
                Ok(())
            }
            ChangeEvent::RelationAdd(rel) | ChangeEvent::RelationModify(rel) => {
                self.stats.relations += 1;
                self.touched_rels.insert(rel.id);
                self.visited.insert(OsmId::relation(rel.id));
                self.sink.mark_delete(OsmId::relation(rel.id));
                self.middle.put_relation(&rel)?;
                self.eval_relation(&rel)
            }
            ChangeEvent::RelationDelete(id) => {
                self.stats.deletes += 1;
                self.touched_rels.insert(id);
                self.visited.insert(OsmId::relation(id));
                self.sink.mark_delete(OsmId::relation(id));
                self.middle.delete_relation(id)?;
                Ok(())
            }
        }
    }

    fn check_batch_cancel(&mut self, processed: u64) -> Result<(), RunError> {
        if processed % BATCH == 0 && cancelled(self.cancel) {
            self.sink.flush_all(self.db)?;
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<RunStats, RunError> {
        info!(
            "Applied {} changes ({} deletes); propagating",
            self.stats.nodes + self.stats.ways + self.stats.relations + self.stats.deletes,
            self.stats.deletes,
        );

        // Dependent ways of every modified or deleted node.
        let mut dep_ways: BTreeSet<i64> = BTreeSet::new();
        for n in &self.touched_nodes {
            dep_ways.extend(self.middle.ways_using_node(*n));
        }
        let mut processed = 0u64;
        for w in &dep_ways {
            if !self.visited.insert(OsmId::way(*w)) {
                continue;
            }
            self.sink.mark_delete(OsmId::way(*w));
            if let Some(way) = self.middle.get_way(*w)? {
                self.eval_way(&way)?;
            }
            self.stats.reprocessed += 1;
            processed += 1;
            self.check_batch_cancel(processed)?;
        }

        // Dependent relations of modified nodes and ways. A way
        // re-rendered above changed geometry too, so its relations are
        // seeded the same as directly modified ways. Then
        // relation-of-relation parents up to the configured depth.
        let mut current: BTreeSet<i64> = BTreeSet::new();
        for n in &self.touched_nodes {
            current.extend(self.middle.relations_using_node(*n));
        }
        for w in self.touched_ways.iter().chain(dep_ways.iter()) {
            current.extend(self.middle.relations_using_way(*w));
        }
        for r in &self.touched_rels {
            current.extend(self.middle.relations_using_relation(*r));
        }
        let mut hop = 1;
        while hop <= self.depth && !current.is_empty() {
            let mut parents: BTreeSet<i64> = BTreeSet::new();
            for r in current {
                if !self.visited.insert(OsmId::relation(r)) {
                    continue;
                }
                self.sink.mark_delete(OsmId::relation(r));
                if let Some(rel) = self.middle.get_relation(r)? {
                    self.eval_relation(&rel)?;
                }
                self.stats.reprocessed += 1;
                processed += 1;
                self.check_batch_cancel(processed)?;
                parents.extend(self.middle.relations_using_relation(r));
            }
            current = parents;
            hop += 1;
        }

        info!("Reprocessed {} dependent objects", self.stats.reprocessed);
        if cancelled(self.cancel) {
            self.sink.flush_all(self.db)?;
            return Err(RunError::Cancelled);
        }
        self.sink.commit_update(self.db)?;
        self.stats.rows = self.sink.staged_rows();
        self.stats.geometry_failures = self.emitter.geometry_failures;
        Ok(self.stats)
    }
}
