//! Entity records and the nodes that wrap them.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use super::DagError;
use crate::annotations::{AnnotationValue, Annotations};
use crate::remote::{Entity, EntityId, NodeType, RemoteError, SharedSession};

/// Namespace prefix carried by every key of a query result row.
pub const QUERY_PREFIX: &str = "entity.";

/// Descriptive record of one remote entity, as returned by a project query.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub parent_id: Option<EntityId>,
    pub node_type: NodeType,
    pub name: String,
    pub annotations: Annotations,
    /// Every field of the row, keys normalised (prefix stripped).
    pub fields: Map<String, Value>,
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl EntityRecord {
    /// Build a record from a raw query row, stripping the `entity.` prefix.
    pub fn from_query_row(row: &Map<String, Value>) -> Result<Self, DagError> {
        let fields: Map<String, Value> = row
            .iter()
            .map(|(key, value)| {
                let key = key.strip_prefix(QUERY_PREFIX).unwrap_or(key);
                (key.to_string(), value.clone())
            })
            .collect();

        let id = text_field(&fields, "id")
            .map(EntityId::from)
            .ok_or_else(|| DagError::InvalidRecord(format!("row without an id: {row:?}")))?;
        let node_type = text_field(&fields, "nodeType")
            .map(|t| NodeType::parse(&t))
            .ok_or_else(|| DagError::InvalidRecord(format!("{id} has no nodeType")))?;
        let annotations = match fields.get("annotations") {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                .map_err(|e| DagError::InvalidRecord(format!("{id} annotations: {e}")))?,
            _ => Annotations::new(),
        };

        Ok(Self {
            parent_id: text_field(&fields, "parentId").map(EntityId::from),
            name: text_field(&fields, "name").unwrap_or_default(),
            id,
            node_type,
            annotations,
            fields,
        })
    }

    /// Build a record from a stored entity (e.g. the result of `store`).
    pub fn from_entity(entity: &Entity) -> Result<Self, DagError> {
        let id = entity.id.clone().ok_or_else(|| {
            DagError::InvalidRecord(format!("entity \"{}\" has not been stored", entity.name))
        })?;
        let fields = match serde_json::to_value(entity) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Ok(Self {
            id,
            parent_id: entity.parent_id.clone(),
            node_type: entity.node_type,
            name: entity.name.clone(),
            annotations: entity.annotations.clone(),
            fields,
        })
    }
}

/// One entity in a [`super::ProjectDag`]: its record plus the live remote object.
///
/// Equality and hashing use the identifier only.
pub struct EntityNode {
    record: EntityRecord,
    entity: Entity,
    is_root: bool,
    needs_update: bool,
    session: SharedSession,
}

impl EntityNode {
    /// Wrap a record, dereferencing the live object through `session`.
    pub fn create(
        record: EntityRecord,
        session: SharedSession,
        is_root: bool,
    ) -> Result<Self, DagError> {
        let entity = session.get(&record.id).map_err(|source| match source {
            RemoteError::EntityNotFound(_) => DagError::Lookup {
                id: record.id.clone(),
                source,
            },
            other => DagError::Remote(other),
        })?;
        Ok(Self::with_entity(record, entity, session, is_root))
    }

    /// Wrap a record whose live object is already in hand; no remote call.
    pub fn with_entity(
        record: EntityRecord,
        entity: Entity,
        session: SharedSession,
        is_root: bool,
    ) -> Self {
        Self {
            record,
            entity,
            is_root,
            needs_update: false,
            session,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn node_type(&self) -> NodeType {
        self.record.node_type
    }

    pub fn parent_id(&self) -> Option<&EntityId> {
        self.record.parent_id.as_ref()
    }

    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub(crate) fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Current value of an annotation on the live object.
    pub fn annotation(&self, key: &str) -> Option<&AnnotationValue> {
        self.entity.annotations.get(key)
    }

    /// Set an annotation locally; written on the next [`flush`](Self::flush).
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<AnnotationValue>) {
        self.entity.annotations.insert(key, value);
        self.needs_update = true;
    }

    pub fn is_folder_named(&self, name: &str) -> bool {
        self.record.node_type == NodeType::Folder && self.record.name == name
    }

    /// Push pending local changes. Returns whether a write happened.
    pub fn flush(&mut self) -> Result<bool, DagError> {
        if !self.needs_update {
            return Ok(false);
        }
        self.entity = self.session.store(&self.entity)?;
        self.record.annotations = self.entity.annotations.clone();
        self.needs_update = false;
        tracing::debug!(id = %self.record.id, "flushed entity");
        Ok(true)
    }
}

impl PartialEq for EntityNode {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for EntityNode {}

impl Hash for EntityNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.id.hash(state);
    }
}

impl fmt::Debug for EntityNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityNode")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("node_type", &self.record.node_type)
            .field("is_root", &self.is_root)
            .field("needs_update", &self.needs_update)
            .finish()
    }
}

impl fmt::Display for EntityNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemorySession, RemoteSession};
    use serde_json::json;
    use std::collections::HashSet;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::Arc;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn hash_of(node: &EntityNode) -> u64 {
        let mut hasher = DefaultHasher::new();
        node.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn query_row_prefix_is_stripped() {
        let record = EntityRecord::from_query_row(&row(json!({
            "entity.id": "syn5",
            "entity.parentId": "syn4",
            "entity.nodeType": "folder",
            "entity.name": "raw",
            "entity.createdBy": "alice",
            "entity.annotations": {"site": "bch"}
        })))
        .unwrap();
        assert_eq!(record.id, EntityId::new("syn5"));
        assert_eq!(record.parent_id, Some(EntityId::new("syn4")));
        assert_eq!(record.node_type, NodeType::Folder);
        assert_eq!(record.name, "raw");
        assert_eq!(record.annotations.text("site"), Some("bch"));
        assert_eq!(record.fields["createdBy"], "alice");
        assert!(!record.fields.contains_key("entity.id"));
    }

    #[test]
    fn query_row_without_id_is_invalid() {
        let err = EntityRecord::from_query_row(&row(json!({"entity.name": "x"}))).unwrap_err();
        assert!(matches!(err, DagError::InvalidRecord(_)));
    }

    #[test]
    fn nodes_compare_by_id_only() {
        let session: SharedSession = Arc::new(MemorySession::new());
        let a = EntityRecord::from_query_row(&row(json!({
            "entity.id": "syn9", "entity.nodeType": "folder", "entity.name": "a"
        })))
        .unwrap();
        let b = EntityRecord::from_query_row(&row(json!({
            "entity.id": "syn9", "entity.nodeType": "file", "entity.name": "b",
            "entity.parentId": "syn1"
        })))
        .unwrap();
        let entity_a = Entity::folder("a", EntityId::new("syn1"));
        let entity_b = Entity::project("b");

        let first = EntityNode::with_entity(a, entity_a, session.clone(), false);
        let second = EntityNode::with_entity(b, entity_b, session, true);

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
        let set: HashSet<&EntityNode> = [&first, &second].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn create_fails_with_lookup_error_for_stale_id() {
        let session: SharedSession = Arc::new(MemorySession::new());
        let record = EntityRecord::from_query_row(&row(json!({
            "entity.id": "syn404", "entity.nodeType": "folder", "entity.name": "gone"
        })))
        .unwrap();
        let err = EntityNode::create(record, session, false).unwrap_err();
        assert!(matches!(err, DagError::Lookup { id, .. } if id.as_str() == "syn404"));
    }

    #[test]
    fn flush_writes_only_when_dirty() {
        let memory = Arc::new(MemorySession::new());
        let project = memory.store(&Entity::project("demo")).unwrap();
        let session: SharedSession = memory.clone();
        let record = EntityRecord::from_entity(&project).unwrap();
        let mut node = EntityNode::create(record, session, true).unwrap();

        let stores_before = memory.calls().store;
        assert!(!node.flush().unwrap());
        assert_eq!(memory.calls().store, stores_before);

        node.annotate("status", "released");
        assert!(node.needs_update());
        assert!(node.flush().unwrap());
        assert!(!node.needs_update());
        assert_eq!(memory.calls().store, stores_before + 1);

        let stored = memory.peek(node.id()).unwrap();
        assert_eq!(stored.annotations.text("status"), Some("released"));
    }
}
