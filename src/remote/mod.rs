//! Remote entity store boundary.
//!
//! Everything that talks to the remote store goes through [`RemoteSession`].
//! The synchronization core never depends on a transport; it receives a
//! [`SharedSession`] at construction and calls the five operations below.
//!
//! # Transports
//!
//! - [`memory::MemorySession`]: in-process store used by tests and `--dry-run`
//! - [`http::HttpSession`]: blocking JSON/HTTP client for a live store
//!
//! # Queries
//!
//! Discovery is a single bulk query per project, rendered by [`EntityQuery`]:
//!
//! ```text
//! SELECT * FROM entity WHERE projectId=="1234"
//! ```
//!
//! Result rows are flat maps whose keys carry an `entity.` namespace prefix
//! (`entity.id`, `entity.parentId`, ...).

pub mod http;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::annotations::Annotations;

pub use http::HttpSession;
pub use memory::MemorySession;

/// Errors raised by a remote transport.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Not logged in to the remote store")]
    NotAuthenticated,

    #[error("Authentication failed for {0}")]
    AuthFailed(String),

    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("Entity \"{0}\" needs a parent")]
    MissingParent(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Failed to read upload {path}: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote request failed: {0}")]
    Transport(String),

    #[error("Unexpected response from remote: {0}")]
    Protocol(String),
}

/// Opaque entity identifier, unique within the remote store (e.g. `syn1234`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric part of the identifier, as used by project queries.
    ///
    /// `syn1234` becomes `1234`; an identifier without a non-digit prefix is
    /// returned unchanged.
    pub fn numeric_suffix(&self) -> &str {
        self.0.trim_start_matches(|c: char| !c.is_ascii_digit())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Project,
    Folder,
    File,
    /// Any entity kind this tool does not manage (tables, links, ...).
    #[serde(other)]
    Other,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Folder => "folder",
            Self::File => "file",
            Self::Other => "other",
        }
    }

    /// Parse a `nodeType` value from a query row. Unknown kinds map to `Other`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "project" => Self::Project,
            "folder" => Self::Folder,
            "file" => Self::File,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live remote object: what `get` returns and what `store` accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub annotations: Annotations,
    /// Local file whose bytes accompany a file entity on create.
    #[serde(skip)]
    pub data_path: Option<PathBuf>,
}

impl Entity {
    /// A new, not yet stored project. The store assigns its parent.
    pub fn project(name: impl Into<String>) -> Self {
        Self {
            id: None,
            parent_id: None,
            node_type: NodeType::Project,
            name: name.into(),
            annotations: Annotations::new(),
            data_path: None,
        }
    }

    /// A new, not yet stored folder under `parent`.
    pub fn folder(name: impl Into<String>, parent: EntityId) -> Self {
        Self {
            id: None,
            parent_id: Some(parent),
            node_type: NodeType::Folder,
            name: name.into(),
            annotations: Annotations::new(),
            data_path: None,
        }
    }

    /// A new, not yet stored file entity uploading `path` under `parent`.
    pub fn file(path: &Path, parent: EntityId, annotations: Annotations) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: None,
            parent_id: Some(parent),
            node_type: NodeType::File,
            name,
            annotations,
            data_path: Some(path.to_path_buf()),
        }
    }

    pub fn is_stored(&self) -> bool {
        self.id.is_some()
    }
}

/// Operator credentials for [`RemoteSession::login`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Rows returned by [`RemoteSession::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub results: Vec<Map<String, Value>>,
}

/// The bulk "all entities of one project" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery {
    /// Numeric project identifier (no `syn` prefix).
    pub project_id: String,
}

const QUERY_HEAD: &str = "SELECT * FROM entity WHERE projectId==";

impl EntityQuery {
    pub fn for_project(project: &EntityId) -> Self {
        Self {
            project_id: project.numeric_suffix().to_string(),
        }
    }
}

impl fmt::Display for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{QUERY_HEAD}\"{}\"", self.project_id)
    }
}

impl FromStr for EntityQuery {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .strip_prefix(QUERY_HEAD)
            .ok_or_else(|| RemoteError::InvalidQuery(s.to_string()))?;
        let project_id = value
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| RemoteError::InvalidQuery(s.to_string()))?;
        if project_id.is_empty() || !project_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(RemoteError::InvalidQuery(s.to_string()));
        }
        Ok(Self {
            project_id: project_id.to_string(),
        })
    }
}

/// Capability to read and write the remote entity store.
///
/// Methods take `&self`; implementations keep session state (tokens, the
/// in-memory table) behind interior mutability so one session can be shared
/// by the orchestrator, the DAG and every node.
pub trait RemoteSession: Send + Sync {
    /// Authenticate; must precede every other call on a live store.
    fn login(&self, credentials: &Credentials) -> Result<(), RemoteError>;

    /// Dereference an identifier to its live object.
    fn get(&self, id: &EntityId) -> Result<Entity, RemoteError>;

    /// Create (no `id`) or update (with `id`) an entity; returns the stored state.
    fn store(&self, entity: &Entity) -> Result<Entity, RemoteError>;

    /// Run a textual entity query.
    fn query(&self, query: &str) -> Result<QueryResults, RemoteError>;

    /// Identifier of the child of `parent` named `name`, if any.
    ///
    /// `parent = None` searches the store's top-level namespace (projects).
    fn find_child(
        &self,
        parent: Option<&EntityId>,
        name: &str,
    ) -> Result<Option<EntityId>, RemoteError>;
}

/// Session handle shared by every component of one push run.
pub type SharedSession = Arc<dyn RemoteSession>;
