//! One configured upload batch.
//!
//! State machine:
//!
//! ```text
//! Pending -> DestinationResolved -> Uploading -> Done
//!    \_____________\___________________\______-> Failed
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use super::PushError;
use crate::annotations::Annotations;
use crate::dag::ProjectDag;
use crate::remote::{Entity, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    Pending,
    DestinationResolved,
    Uploading,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Path as expanded from `LOCAL_PATHS`.
    pub local_path: PathBuf,
    /// Identifier the remote store assigned to the upload.
    pub id: EntityId,
}

/// Outcome of one executed interaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InteractionReport {
    /// Destination path as written in the push document.
    pub destination: String,
    /// Folder the destination resolved to.
    pub destination_id: Option<EntityId>,
    /// Uploaded files, in expansion order.
    pub files: Vec<UploadedFile>,
    /// Wall time spent resolving and uploading.
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PushInteraction {
    destination: String,
    create_dir: bool,
    local_paths: Vec<PathBuf>,
    annotations: Annotations,
    state: InteractionState,
    destination_id: Option<EntityId>,
}

impl PushInteraction {
    /// Expand `patterns` and bind the batch to `destination`.
    ///
    /// Fails before any remote call if a pattern is malformed or matches no
    /// files.
    pub fn new(
        destination: impl Into<String>,
        create_dir: bool,
        patterns: &[String],
        annotations: Annotations,
    ) -> Result<Self, PushError> {
        let destination = destination.into();
        let mut local_paths = Vec::new();
        for pattern in patterns {
            let matched = expand(pattern)?;
            if matched.is_empty() {
                return Err(PushError::Validation(format!(
                    "LOCAL_PATHS value: {pattern} did not resolve to any files"
                )));
            }
            local_paths.extend(matched);
        }
        tracing::debug!(
            destination = %destination,
            files = local_paths.len(),
            "prepared interaction"
        );
        Ok(Self {
            destination,
            create_dir,
            local_paths,
            annotations,
            state: InteractionState::Pending,
            destination_id: None,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn create_dir(&self) -> bool {
        self.create_dir
    }

    pub fn local_paths(&self) -> &[PathBuf] {
        &self.local_paths
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn destination_id(&self) -> Option<&EntityId> {
        self.destination_id.as_ref()
    }

    /// Resolve (and with `CREATE_DIR`, create) the destination folder.
    pub fn prepare_destination(&mut self, dag: &mut ProjectDag) -> Result<EntityId, PushError> {
        tracing::info!(destination = %self.destination, create = self.create_dir, "preparing destination");
        match dag.resolve_path(&self.destination, self.create_dir) {
            Ok(id) => {
                self.destination_id = Some(id.clone());
                self.state = InteractionState::DestinationResolved;
                Ok(id)
            }
            Err(err) => {
                self.state = InteractionState::Failed;
                Err(err.into())
            }
        }
    }

    /// Upload one local file under the resolved destination and link it into the DAG.
    pub fn add_file(&mut self, dag: &mut ProjectDag, path: &Path) -> Result<EntityId, PushError> {
        let Some(parent) = self.destination_id.clone() else {
            return Err(PushError::DestinationUnresolved);
        };
        self.state = InteractionState::Uploading;
        let result = upload(dag, &parent, path, &self.annotations);
        if result.is_err() {
            self.state = InteractionState::Failed;
        }
        result
    }

    /// Resolve the destination, then upload every expanded path in order.
    pub fn execute(&mut self, dag: &mut ProjectDag) -> Result<InteractionReport, PushError> {
        let started = Instant::now();
        let destination_id = self.prepare_destination(dag)?;

        let mut files = Vec::with_capacity(self.local_paths.len());
        for path in self.local_paths.clone() {
            let id = self.add_file(dag, &path)?;
            files.push(UploadedFile {
                local_path: path,
                id,
            });
        }
        self.state = InteractionState::Done;

        Ok(InteractionReport {
            destination: self.destination.clone(),
            destination_id: Some(destination_id),
            files,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn upload(
    dag: &mut ProjectDag,
    parent: &EntityId,
    path: &Path,
    annotations: &Annotations,
) -> Result<EntityId, PushError> {
    let stored = dag
        .session()
        .store(&Entity::file(path, parent.clone(), annotations.clone()))?;
    let id = dag.insert_file(parent, stored)?;
    tracing::info!(file = %path.display(), id = %id, parent = %parent, "uploaded file");
    Ok(id)
}

/// Files matching `pattern`, in the order the filesystem enumerates them.
///
/// Hidden entries only match when the pattern names the leading dot.
fn expand(pattern: &str) -> Result<Vec<PathBuf>, PushError> {
    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };
    let entries = glob::glob_with(pattern, options).map_err(|err| {
        PushError::Validation(format!("LOCAL_PATHS value: {pattern} is not a valid pattern: {err}"))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(path) => tracing::debug!(path = %path.display(), "skipping non-file match"),
            Err(err) => {
                return Err(PushError::Io {
                    path: err.path().to_path_buf(),
                    source: err.into(),
                });
            }
        }
    }
    Ok(files)
}
