//! Path-addressable DAG of one project's entities.
//!
//! Construction is one bulk query followed by graph assembly:
//!
//! 1. query every entity whose `projectId` is the project's numeric id
//! 2. add an edge `parentId -> id` per record, then drop the project's own
//!    parent (it lives in the store's outer namespace)
//! 3. wrap every remaining identifier in an [`EntityNode`]
//! 4. reject nodes with several parents, cycles, and any node outside the
//!    project's tree
//! 5. flag the project node as root
//!
//! Path resolution walks folder names from the root, optionally creating
//! missing folders. When a parent has several folders with the same name,
//! the first in enumeration order wins.

use std::collections::{HashMap, VecDeque};

use super::graph::Dag;
use super::node::{EntityNode, EntityRecord};
use super::DagError;
use crate::remote::{Entity, EntityId, EntityQuery, SharedSession};

pub struct ProjectDag {
    project_id: EntityId,
    session: SharedSession,
    graph: Dag<EntityId, EntityNode>,
}

impl ProjectDag {
    /// Build the DAG for `project` from a fresh bulk query.
    pub fn build(project: &Entity, session: SharedSession) -> Result<Self, DagError> {
        let project_id = project.id.clone().ok_or_else(|| {
            DagError::InvalidRecord(format!("project \"{}\" has not been stored", project.name))
        })?;

        let query = EntityQuery::for_project(&project_id).to_string();
        let rows = session.query(&query)?.results;
        tracing::debug!(project = %project_id, rows = rows.len(), "queried project entities");

        let mut records: HashMap<EntityId, EntityRecord> = HashMap::with_capacity(rows.len());
        let mut graph = Dag::new();
        for row in &rows {
            let record = EntityRecord::from_query_row(row)?;
            match &record.parent_id {
                Some(parent) => graph.add_edge(parent.clone(), record.id.clone()),
                None => {
                    graph.add_node(record.id.clone());
                }
            }
            records.insert(record.id.clone(), record);
        }

        if let Some(outer) = &project.parent_id {
            graph.remove_node(outer);
        }

        if let Some(id) = graph.nodes().find(|id| graph.parents(id).len() > 1) {
            return Err(DagError::MultipleParents {
                id: id.clone(),
                parents: graph.parents(id).iter().map(|p| p.to_string()).collect(),
            });
        }

        let ids: Vec<EntityId> = graph.nodes().cloned().collect();
        for id in ids {
            let record = records
                .remove(&id)
                .ok_or_else(|| DagError::MissingRecord(id.clone()))?;
            let node = EntityNode::create(record, session.clone(), false)?;
            graph.set_weight(&id, node);
        }

        let stuck = graph.unsorted_nodes();
        if !stuck.is_empty() {
            return Err(DagError::Cyclic {
                nodes: stuck.iter().map(|id| id.to_string()).collect(),
            });
        }

        let strays: Vec<String> = graph
            .roots()
            .into_iter()
            .filter(|id| **id != project_id)
            .map(|id| id.to_string())
            .collect();
        if !strays.is_empty() {
            return Err(DagError::MultipleRoots {
                project: project_id,
                roots: strays,
            });
        }

        graph
            .weight_mut(&project_id)
            .ok_or_else(|| DagError::MissingRecord(project_id.clone()))?
            .set_root(true);

        tracing::info!(project = %project_id, nodes = graph.len(), "built project DAG");
        Ok(Self {
            project_id,
            session,
            graph,
        })
    }

    pub fn root_id(&self) -> &EntityId {
        &self.project_id
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.graph.contains(id)
    }

    pub fn node(&self, id: &EntityId) -> Option<&EntityNode> {
        self.graph.weight(id)
    }

    pub fn node_mut(&mut self, id: &EntityId) -> Option<&mut EntityNode> {
        self.graph.weight_mut(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &EntityNode> {
        self.graph.nodes().filter_map(|id| self.graph.weight(id))
    }

    pub fn parent_of(&self, id: &EntityId) -> Option<&EntityId> {
        self.graph.parents(id).first()
    }

    pub fn children(&self, id: &EntityId) -> &[EntityId] {
        self.graph.children(id)
    }

    /// Direct children of `id` for which `predicate` holds, in enumeration order.
    pub fn children_where(
        &self,
        id: &EntityId,
        predicate: impl Fn(&EntityNode) -> bool,
    ) -> Vec<EntityId> {
        self.graph
            .children(id)
            .iter()
            .filter(|child| self.graph.weight(child).is_some_and(&predicate))
            .cloned()
            .collect()
    }

    /// Slash-separated path of `id` below the root (`""` for the root).
    pub fn path_of(&self, id: &EntityId) -> Option<String> {
        if !self.graph.contains(id) {
            return None;
        }
        let mut names = Vec::new();
        let mut current = id;
        while current != &self.project_id {
            names.push(self.graph.weight(current)?.name());
            current = self.parent_of(current)?;
        }
        names.reverse();
        Some(names.join("/"))
    }

    /// Resolve a slash-separated folder path from the root.
    pub fn resolve_path(&mut self, path: &str, create: bool) -> Result<EntityId, DagError> {
        self.resolve(path.split('/'), None, create)
    }

    /// Walk `segments` from `origin` (default: root), one folder per segment.
    ///
    /// Missing folders are created when `create` is set; otherwise the walk
    /// stops with [`DagError::NotFound`] and the DAG is left untouched.
    /// Empty segments are skipped, so an empty path resolves to `origin`.
    pub fn resolve<'a>(
        &mut self,
        segments: impl IntoIterator<Item = &'a str>,
        origin: Option<&EntityId>,
        create: bool,
    ) -> Result<EntityId, DagError> {
        let mut remaining: VecDeque<&str> =
            segments.into_iter().filter(|s| !s.is_empty()).collect();
        let full_path = remaining.iter().copied().collect::<Vec<_>>().join("/");

        let mut current = origin.cloned().unwrap_or_else(|| self.project_id.clone());
        if !self.graph.contains(&current) {
            return Err(DagError::UnknownNode(current));
        }

        while let Some(segment) = remaining.pop_front() {
            let matches = self.children_where(&current, |node| node.is_folder_named(segment));
            if matches.len() > 1 {
                tracing::warn!(
                    parent = %current,
                    folder = segment,
                    candidates = matches.len(),
                    "several folders share this name; using the first"
                );
            }
            current = match matches.into_iter().next() {
                Some(found) => found,
                None if create => self.create_folder(&current, segment)?,
                None => {
                    return Err(DagError::NotFound {
                        path: full_path,
                        segment: segment.to_string(),
                    });
                }
            };
        }

        Ok(current)
    }

    fn create_folder(&mut self, parent: &EntityId, name: &str) -> Result<EntityId, DagError> {
        let stored = self.session.store(&Entity::folder(name, parent.clone()))?;
        let id = self.insert_child(parent, stored)?;
        tracing::info!(parent = %parent, folder = name, id = %id, "created remote folder");
        Ok(id)
    }

    /// Link a freshly stored file entity under `parent`. No remote call.
    pub fn insert_file(&mut self, parent: &EntityId, entity: Entity) -> Result<EntityId, DagError> {
        self.insert_child(parent, entity)
    }

    fn insert_child(&mut self, parent: &EntityId, entity: Entity) -> Result<EntityId, DagError> {
        if !self.graph.contains(parent) {
            return Err(DagError::UnknownNode(parent.clone()));
        }
        let record = EntityRecord::from_entity(&entity)?;
        let id = record.id.clone();
        if self.graph.contains(&id) {
            return Err(DagError::DuplicateNode(id));
        }
        let node = EntityNode::with_entity(record, entity, self.session.clone(), false);
        self.graph.add_edge(parent.clone(), id.clone());
        self.graph.set_weight(&id, node);
        Ok(id)
    }

    /// Store every node with pending local changes. Returns how many were written.
    pub fn flush(&mut self) -> Result<usize, DagError> {
        let ids: Vec<EntityId> = self.graph.nodes().cloned().collect();
        let mut written = 0;
        for id in ids {
            if let Some(node) = self.graph.weight_mut(&id)
                && node.flush()?
            {
                written += 1;
            }
        }
        Ok(written)
    }
}

impl std::fmt::Debug for ProjectDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectDag")
            .field("project_id", &self.project_id)
            .field("nodes", &self.graph.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemorySession, NodeType, RemoteSession};
    use std::sync::Arc;

    struct Fixture {
        memory: Arc<MemorySession>,
        project: Entity,
        a: EntityId,
        b: EntityId,
    }

    /// demo/
    ///   A/
    ///     B/
    fn fixture() -> Fixture {
        let memory = Arc::new(MemorySession::new());
        let project = memory.store(&Entity::project("demo")).unwrap();
        let pid = project.id.clone().unwrap();
        let a = memory.store(&Entity::folder("A", pid)).unwrap().id.unwrap();
        let b = memory
            .store(&Entity::folder("B", a.clone()))
            .unwrap()
            .id
            .unwrap();
        Fixture {
            memory,
            project,
            a,
            b,
        }
    }

    fn build(fx: &Fixture) -> ProjectDag {
        ProjectDag::build(&fx.project, fx.memory.clone()).unwrap()
    }

    #[test]
    fn tree_builds_with_project_as_only_root() {
        let fx = fixture();
        let dag = build(&fx);
        let pid = fx.project.id.clone().unwrap();

        assert_eq!(dag.root_id(), &pid);
        assert_eq!(dag.len(), 3);
        assert!(dag.node(&pid).unwrap().is_root());
        assert!(!dag.node(&fx.a).unwrap().is_root());
        assert_eq!(dag.nodes().filter(|n| n.is_root()).count(), 1);
        assert!(!dag.contains(&EntityId::new(crate::remote::memory::ROOT_CONTAINER_ID)));
        assert_eq!(dag.parent_of(&fx.b), Some(&fx.a));
    }

    #[test]
    fn cycle_fails_construction() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();
        let mut x = Entity::folder("x", EntityId::new("syn9002"));
        x.id = Some(EntityId::new("syn9001"));
        let mut y = Entity::folder("y", EntityId::new("syn9001"));
        y.id = Some(EntityId::new("syn9002"));
        fx.memory.seed(x, Some(&pid));
        fx.memory.seed(y, Some(&pid));

        let err = ProjectDag::build(&fx.project, fx.memory.clone()).unwrap_err();
        match err {
            DagError::Cyclic { mut nodes } => {
                nodes.sort();
                assert_eq!(nodes, ["syn9001", "syn9002"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn orphaned_subtree_fails_construction() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();
        let mut orphan = Entity::folder("orphan", EntityId::new("syn7777"));
        orphan.id = Some(EntityId::new("syn7000"));
        fx.memory.seed(orphan, Some(&pid));

        let err = ProjectDag::build(&fx.project, fx.memory.clone()).unwrap_err();
        assert!(matches!(err, DagError::MissingRecord(id) if id.as_str() == "syn7777"));
    }

    #[test]
    fn stale_record_is_a_lookup_error() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();
        // present in the query index but gone by the time it is dereferenced
        let mut ghost = Entity::folder("ghost", pid.clone());
        ghost.id = Some(EntityId::new("syn8000"));
        fx.memory.seed(ghost, Some(&pid));

        struct Stale(Arc<MemorySession>);
        impl RemoteSession for Stale {
            fn login(&self, c: &crate::remote::Credentials) -> Result<(), crate::remote::RemoteError> {
                self.0.login(c)
            }
            fn get(&self, id: &EntityId) -> Result<Entity, crate::remote::RemoteError> {
                if id.as_str() == "syn8000" {
                    return Err(crate::remote::RemoteError::EntityNotFound(id.clone()));
                }
                self.0.get(id)
            }
            fn store(&self, e: &Entity) -> Result<Entity, crate::remote::RemoteError> {
                self.0.store(e)
            }
            fn query(&self, q: &str) -> Result<crate::remote::QueryResults, crate::remote::RemoteError> {
                self.0.query(q)
            }
            fn find_child(
                &self,
                parent: Option<&EntityId>,
                name: &str,
            ) -> Result<Option<EntityId>, crate::remote::RemoteError> {
                self.0.find_child(parent, name)
            }
        }

        let err = ProjectDag::build(&fx.project, Arc::new(Stale(fx.memory.clone()))).unwrap_err();
        assert!(matches!(err, DagError::Lookup { id, .. } if id.as_str() == "syn8000"));
    }

    #[test]
    fn entity_listed_under_two_parents_fails_construction() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();

        /// Repeats B's query row with the project as its parent.
        struct DoubledRow {
            inner: Arc<MemorySession>,
            id: EntityId,
            extra_parent: EntityId,
        }
        impl RemoteSession for DoubledRow {
            fn login(&self, c: &crate::remote::Credentials) -> Result<(), crate::remote::RemoteError> {
                self.inner.login(c)
            }
            fn get(&self, id: &EntityId) -> Result<Entity, crate::remote::RemoteError> {
                self.inner.get(id)
            }
            fn store(&self, e: &Entity) -> Result<Entity, crate::remote::RemoteError> {
                self.inner.store(e)
            }
            fn query(&self, q: &str) -> Result<crate::remote::QueryResults, crate::remote::RemoteError> {
                let mut results = self.inner.query(q)?;
                let extra = results
                    .results
                    .iter()
                    .find(|row| row["entity.id"] == self.id.as_str())
                    .cloned()
                    .map(|mut row| {
                        row.insert(
                            "entity.parentId".into(),
                            serde_json::Value::String(self.extra_parent.to_string()),
                        );
                        row
                    });
                results.results.extend(extra);
                Ok(results)
            }
            fn find_child(
                &self,
                parent: Option<&EntityId>,
                name: &str,
            ) -> Result<Option<EntityId>, crate::remote::RemoteError> {
                self.inner.find_child(parent, name)
            }
        }

        let session = Arc::new(DoubledRow {
            inner: fx.memory.clone(),
            id: fx.b.clone(),
            extra_parent: pid.clone(),
        });
        let err = ProjectDag::build(&fx.project, session).unwrap_err();
        match err {
            DagError::MultipleParents { id, mut parents } => {
                assert_eq!(id, fx.b);
                parents.sort();
                let mut expected = vec![fx.a.to_string(), pid.to_string()];
                expected.sort();
                assert_eq!(parents, expected);
            }
            other => panic!("expected MultipleParents, got {other:?}"),
        }
    }

    #[test]
    fn resolves_existing_path_without_creating() {
        let fx = fixture();
        let mut dag = build(&fx);
        let stores = fx.memory.calls().store;

        assert_eq!(dag.resolve_path("A/B", false).unwrap(), fx.b);
        assert_eq!(dag.resolve_path("/A//B/", false).unwrap(), fx.b);
        assert_eq!(fx.memory.calls().store, stores);
    }

    #[test]
    fn missing_path_without_create_is_not_found_and_leaves_dag_alone() {
        let fx = fixture();
        let mut dag = build(&fx);
        let before = dag.len();

        let err = dag.resolve_path("A/C", false).unwrap_err();
        match err {
            DagError::NotFound { path, segment } => {
                assert_eq!(path, "A/C");
                assert_eq!(segment, "C");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(dag.len(), before);
        assert_eq!(dag.children(&fx.a), [fx.b.clone()]);
    }

    #[test]
    fn missing_path_with_create_adds_exactly_one_folder() {
        let fx = fixture();
        let mut dag = build(&fx);
        let before = dag.len();

        let c = dag.resolve_path("A/C", true).unwrap();
        assert_eq!(dag.len(), before + 1);
        assert_eq!(dag.parent_of(&c), Some(&fx.a));
        assert_eq!(dag.node(&c).unwrap().node_type(), NodeType::Folder);
        assert_eq!(dag.path_of(&c).as_deref(), Some("A/C"));

        assert_eq!(dag.resolve_path("A/C", true).unwrap(), c);
        assert_eq!(dag.resolve_path("A/C", false).unwrap(), c);
        assert_eq!(dag.len(), before + 1);
        assert_eq!(fx.memory.children(&fx.a).len(), 2);
    }

    #[test]
    fn nested_creation_builds_every_level() {
        let fx = fixture();
        let mut dag = build(&fx);
        let leaf = dag.resolve_path("x/y/z", true).unwrap();
        assert_eq!(dag.path_of(&leaf).as_deref(), Some("x/y/z"));
        assert!(dag.acyclic_for_tests());
    }

    #[test]
    fn duplicate_sibling_names_pick_first_in_enumeration_order() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();
        let twin = fx
            .memory
            .store(&Entity::folder("A", pid.clone()))
            .unwrap()
            .id
            .unwrap();
        let mut dag = build(&fx);

        let found = dag.children_where(&pid, |n| n.is_folder_named("A"));
        assert_eq!(found, [fx.a.clone(), twin]);
        assert_eq!(dag.resolve_path("A", false).unwrap(), fx.a);
    }

    #[test]
    fn files_are_not_folders_for_resolution() {
        let fx = fixture();
        let pid = fx.project.id.clone().unwrap();
        let mut file = Entity::file(std::path::Path::new("notes"), pid, Default::default());
        file.data_path = None;
        let stored = fx.memory.store(&file).unwrap();
        let mut dag = build(&fx);
        assert!(dag.contains(stored.id.as_ref().unwrap()));
        assert!(matches!(
            dag.resolve_path("notes", false),
            Err(DagError::NotFound { .. })
        ));
    }

    #[test]
    fn insert_file_links_without_remote_call() {
        let fx = fixture();
        let mut dag = build(&fx);
        let mut entity = Entity::file(std::path::Path::new("r1.vcf"), fx.b.clone(), Default::default());
        entity.data_path = None;
        let stored = fx.memory.store(&entity).unwrap();

        let calls = fx.memory.calls();
        let id = dag.insert_file(&fx.b, stored.clone()).unwrap();
        assert_eq!(fx.memory.calls(), calls);
        assert_eq!(dag.parent_of(&id), Some(&fx.b));
        assert!(matches!(
            dag.insert_file(&fx.b, stored),
            Err(DagError::DuplicateNode(_))
        ));
    }

    #[test]
    fn unknown_origin_is_rejected() {
        let fx = fixture();
        let mut dag = build(&fx);
        let err = dag
            .resolve(["A"], Some(&EntityId::new("syn1")), false)
            .unwrap_err();
        assert!(matches!(err, DagError::UnknownNode(_)));
    }

    #[test]
    fn resolve_from_explicit_origin() {
        let fx = fixture();
        let mut dag = build(&fx);
        assert_eq!(dag.resolve(["B"], Some(&fx.a), false).unwrap(), fx.b);
        assert_eq!(dag.resolve([], Some(&fx.a), false).unwrap(), fx.a);
    }

    #[test]
    fn flush_writes_dirty_nodes() {
        let fx = fixture();
        let mut dag = build(&fx);
        assert_eq!(dag.flush().unwrap(), 0);
        dag.node_mut(&fx.b).unwrap().annotate("state", "sealed");
        assert_eq!(dag.flush().unwrap(), 1);
        assert_eq!(
            fx.memory.peek(&fx.b).unwrap().annotations.text("state"),
            Some("sealed")
        );
    }

    impl ProjectDag {
        fn acyclic_for_tests(&self) -> bool {
            self.graph.is_acyclic()
        }
    }
}
