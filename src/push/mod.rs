//! Push orchestration: configured upload batches executed against a
//! [`ProjectDag`](crate::dag::ProjectDag).

pub mod interaction;
pub mod orchestrator;
pub mod record;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::dag::DagError;
use crate::remote::RemoteError;

pub use interaction::{InteractionReport, InteractionState, PushInteraction, UploadedFile};
pub use orchestrator::{PUSH_HISTORY_DIR, Push, PushReport};
pub use record::{PushRecord, content_md5};

#[derive(Error, Debug)]
pub enum PushError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Interaction has no resolved destination; call prepare_destination first")]
    DestinationUnresolved,

    #[error("Not logged in; call login before execute")]
    NotLoggedIn,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse failure class, used for exit codes and `--json` error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Lookup,
    Remote,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Lookup => "lookup",
            Self::Remote => "remote",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation => 3,
            Self::NotFound => 4,
            Self::Lookup => 5,
            Self::Remote => 6,
            Self::Io | Self::Internal => 1,
        }
    }
}

impl PushError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Dag(err) => match err {
                DagError::Cyclic { .. }
                | DagError::MultipleRoots { .. }
                | DagError::MultipleParents { .. }
                | DagError::MissingRecord(_)
                | DagError::InvalidRecord(_) => ErrorKind::Validation,
                DagError::NotFound { .. } => ErrorKind::NotFound,
                DagError::Lookup { .. } => ErrorKind::Lookup,
                DagError::Remote(remote) => remote_kind(remote),
                DagError::DuplicateNode(_) | DagError::UnknownNode(_) => ErrorKind::Internal,
            },
            Self::Remote(remote) => remote_kind(remote),
            Self::DestinationUnresolved | Self::NotLoggedIn => ErrorKind::Internal,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

fn remote_kind(err: &RemoteError) -> ErrorKind {
    match err {
        RemoteError::EntityNotFound(_) => ErrorKind::Lookup,
        RemoteError::Upload { .. } => ErrorKind::Io,
        _ => ErrorKind::Remote,
    }
}
