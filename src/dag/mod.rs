//! Local view of one project's remote entity tree.
//!
//! Two layers:
//!
//! - **graph**: a generic [`graph::Dag`] (nodes, edges, acyclicity check)
//! - **project**: [`ProjectDag`], which fills that graph with [`EntityNode`]s
//!   and adds path addressing (`"uploads/batch1"`) with on-demand folder
//!   creation
//!
//! The DAG is rebuilt from a single bulk query on every run and discarded at
//! the end of it; nothing is cached between runs.

pub mod graph;
pub mod node;
pub mod project;

use thiserror::Error;

use crate::remote::{EntityId, RemoteError};

pub use graph::Dag;
pub use node::{EntityNode, EntityRecord, QUERY_PREFIX};
pub use project::ProjectDag;

/// Errors raised while building or addressing a [`ProjectDag`].
#[derive(Error, Debug)]
pub enum DagError {
    #[error("Cyclic relationship detected between entities: {}", .nodes.join(", "))]
    Cyclic { nodes: Vec<String> },

    #[error(
        "Entities outside the tree of {project}: {} (every entity must descend from the project)",
        .roots.join(", ")
    )]
    MultipleRoots {
        project: EntityId,
        roots: Vec<String>,
    },

    #[error("Entity {id} has more than one parent: {}", .parents.join(", "))]
    MultipleParents { id: EntityId, parents: Vec<String> },

    #[error("No entity record returned for {0}")]
    MissingRecord(EntityId),

    #[error("Invalid entity record: {0}")]
    InvalidRecord(String),

    #[error("Entity {0} is already present in the DAG")]
    DuplicateNode(EntityId),

    #[error("Entity {0} is not present in the DAG")]
    UnknownNode(EntityId),

    #[error("Remote destination \"{path}\" does not exist (no folder named \"{segment}\")")]
    NotFound { path: String, segment: String },

    #[error("Entity {id} no longer resolves remotely: {source}")]
    Lookup {
        id: EntityId,
        #[source]
        source: RemoteError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
