//! In-process entity store.
//!
//! `MemorySession` behaves like a small remote store: it assigns `syn<N>`
//! identifiers, parents projects to a fixed root container, answers the
//! bulk project query, and records how many calls it served so tests can
//! assert that validation failures never reach the remote.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{
    Credentials, Entity, EntityId, EntityQuery, NodeType, QueryResults, RemoteError,
    RemoteSession,
};

/// Identifier of the store's outer namespace; every project is its child.
pub const ROOT_CONTAINER_ID: &str = "syn4489";

const FIRST_ASSIGNED_ID: u64 = 1000;

/// Number of calls served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub login: usize,
    pub get: usize,
    pub store: usize,
    pub query: usize,
    pub find_child: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.login + self.get + self.store + self.query + self.find_child
    }
}

#[derive(Debug, Clone)]
struct StoredEntity {
    entity: Entity,
    project_id: Option<EntityId>,
    size: Option<u64>,
}

#[derive(Debug)]
struct State {
    entities: Vec<StoredEntity>,
    index: HashMap<EntityId, usize>,
    next_id: u64,
    users: HashMap<String, String>,
    logged_in: Option<String>,
    calls: CallCounts,
}

impl State {
    fn ensure_session(&self) -> Result<(), RemoteError> {
        if !self.users.is_empty() && self.logged_in.is_none() {
            return Err(RemoteError::NotAuthenticated);
        }
        Ok(())
    }

    fn lookup(&self, id: &EntityId) -> Option<&StoredEntity> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    fn assign_id(&mut self) -> EntityId {
        let id = EntityId::new(format!("syn{}", self.next_id));
        self.next_id += 1;
        id
    }

    fn push(&mut self, stored: StoredEntity) -> EntityId {
        let id = stored
            .entity
            .id
            .clone()
            .unwrap_or_else(|| EntityId::new(""));
        if let Some(&existing) = self.index.get(&id) {
            self.entities[existing] = stored;
        } else {
            self.index.insert(id.clone(), self.entities.len());
            self.entities.push(stored);
        }
        id
    }
}

/// Thread-safe in-memory [`RemoteSession`].
#[derive(Debug)]
pub struct MemorySession {
    state: Mutex<State>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// An open store: any credentials log in, and calls work without login.
    pub fn new() -> Self {
        let root = Entity {
            id: Some(EntityId::new(ROOT_CONTAINER_ID)),
            parent_id: None,
            node_type: NodeType::Other,
            name: "root".to_string(),
            annotations: Default::default(),
            data_path: None,
        };
        let mut state = State {
            entities: Vec::new(),
            index: HashMap::new(),
            next_id: FIRST_ASSIGNED_ID,
            users: HashMap::new(),
            logged_in: None,
            calls: CallCounts::default(),
        };
        state.push(StoredEntity {
            entity: root,
            project_id: None,
            size: None,
        });
        Self {
            state: Mutex::new(state),
        }
    }

    /// Register a user; once any user is registered, calls require login.
    pub fn with_user(self, username: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.state.lock().users.insert(username.into(), api_key.into());
        self
    }

    /// Insert an entity verbatim, bypassing parent checks.
    ///
    /// Lets tests build record sets the store would never produce itself
    /// (cycles, orphans, duplicate sibling names). The entity keeps its id if
    /// it has one.
    pub fn seed(&self, mut entity: Entity, project: Option<&EntityId>) -> EntityId {
        let mut state = self.state.lock();
        if entity.id.is_none() {
            entity.id = Some(state.assign_id());
        }
        let project_id = match (project, entity.node_type) {
            (Some(p), _) => Some(p.clone()),
            (None, NodeType::Project) => entity.id.clone(),
            (None, _) => None,
        };
        state.push(StoredEntity {
            entity,
            project_id,
            size: None,
        })
    }

    /// Drop an entity, leaving any references to it dangling.
    pub fn remove(&self, id: &EntityId) -> Option<Entity> {
        let mut state = self.state.lock();
        let index = state.index.remove(id)?;
        let removed = state.entities.remove(index);
        for slot in state.index.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        Some(removed.entity)
    }

    /// Current state of an entity without counting a call.
    pub fn peek(&self, id: &EntityId) -> Option<Entity> {
        self.state.lock().lookup(id).map(|s| s.entity.clone())
    }

    /// Uploaded size in bytes of a stored file entity.
    pub fn uploaded_size(&self, id: &EntityId) -> Option<u64> {
        self.state.lock().lookup(id).and_then(|s| s.size)
    }

    /// Children of `parent`, in creation order.
    pub fn children(&self, parent: &EntityId) -> Vec<Entity> {
        self.state
            .lock()
            .entities
            .iter()
            .filter(|s| s.entity.parent_id.as_ref() == Some(parent))
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    pub fn logged_in_as(&self) -> Option<String> {
        self.state.lock().logged_in.clone()
    }
}

fn query_row(stored: &StoredEntity) -> Map<String, Value> {
    let entity = &stored.entity;
    let mut row = Map::new();
    let id = entity.id.as_ref().map(|i| i.to_string()).unwrap_or_default();
    row.insert("entity.id".into(), Value::String(id));
    if let Some(parent) = &entity.parent_id {
        row.insert("entity.parentId".into(), Value::String(parent.to_string()));
    }
    row.insert(
        "entity.nodeType".into(),
        Value::String(entity.node_type.as_str().to_string()),
    );
    row.insert("entity.name".into(), Value::String(entity.name.clone()));
    if let Some(project) = &stored.project_id {
        row.insert(
            "entity.projectId".into(),
            Value::String(project.numeric_suffix().to_string()),
        );
    }
    if !entity.annotations.is_empty()
        && let Ok(annotations) = serde_json::to_value(&entity.annotations)
    {
        row.insert("entity.annotations".into(), annotations);
    }
    row
}

impl RemoteSession for MemorySession {
    fn login(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let mut state = self.state.lock();
        state.calls.login += 1;
        if !state.users.is_empty()
            && state.users.get(&credentials.username) != Some(&credentials.api_key)
        {
            return Err(RemoteError::AuthFailed(credentials.username.clone()));
        }
        state.logged_in = Some(credentials.username.clone());
        tracing::debug!(user = %credentials.username, "memory session logged in");
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Entity, RemoteError> {
        let mut state = self.state.lock();
        state.calls.get += 1;
        state.ensure_session()?;
        state
            .lookup(id)
            .map(|s| s.entity.clone())
            .ok_or_else(|| RemoteError::EntityNotFound(id.clone()))
    }

    fn store(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let mut state = self.state.lock();
        state.calls.store += 1;
        state.ensure_session()?;

        if let Some(id) = &entity.id {
            let existing = state
                .lookup(id)
                .cloned()
                .ok_or_else(|| RemoteError::EntityNotFound(id.clone()))?;
            let mut updated = entity.clone();
            updated.data_path = None;
            state.push(StoredEntity {
                entity: updated.clone(),
                ..existing
            });
            return Ok(updated);
        }

        let (parent_id, project_id) = match entity.node_type {
            NodeType::Project => (EntityId::new(ROOT_CONTAINER_ID), None),
            _ => {
                let parent = entity
                    .parent_id
                    .clone()
                    .ok_or_else(|| RemoteError::MissingParent(entity.name.clone()))?;
                let parent_project = state
                    .lookup(&parent)
                    .ok_or_else(|| RemoteError::EntityNotFound(parent.clone()))?
                    .project_id
                    .clone();
                (parent, parent_project)
            }
        };

        let size = match &entity.data_path {
            Some(path) => Some(
                std::fs::metadata(path)
                    .map_err(|source| RemoteError::Upload {
                        path: path.clone(),
                        source,
                    })?
                    .len(),
            ),
            None => None,
        };

        let id = state.assign_id();
        let mut created = entity.clone();
        created.id = Some(id.clone());
        created.parent_id = Some(parent_id);
        created.data_path = None;
        let project_id = if entity.node_type == NodeType::Project {
            Some(id)
        } else {
            project_id
        };
        state.push(StoredEntity {
            entity: created.clone(),
            project_id,
            size,
        });
        Ok(created)
    }

    fn query(&self, query: &str) -> Result<QueryResults, RemoteError> {
        let mut state = self.state.lock();
        state.calls.query += 1;
        state.ensure_session()?;
        let query: EntityQuery = query.parse()?;
        let results = state
            .entities
            .iter()
            .filter(|s| {
                s.project_id
                    .as_ref()
                    .is_some_and(|p| p.numeric_suffix() == query.project_id)
            })
            .map(query_row)
            .collect();
        Ok(QueryResults { results })
    }

    fn find_child(
        &self,
        parent: Option<&EntityId>,
        name: &str,
    ) -> Result<Option<EntityId>, RemoteError> {
        let mut state = self.state.lock();
        state.calls.find_child += 1;
        state.ensure_session()?;
        let root = EntityId::new(ROOT_CONTAINER_ID);
        let parent = parent.unwrap_or(&root);
        Ok(state
            .entities
            .iter()
            .find(|s| s.entity.parent_id.as_ref() == Some(parent) && s.entity.name == name)
            .and_then(|s| s.entity.id.clone()))
    }
}
