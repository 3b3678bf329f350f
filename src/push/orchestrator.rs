//! Drive one push run end to end.
//!
//! ```text
//! Push::new      validate operator + document, compute PushRecord,
//!                expand every interaction (no remote calls yet)
//! Push::login    authenticate, resolve-or-create the project, build the DAG
//! Push::execute  run interactions in order, audit upload last, flush
//! ```
//!
//! Everything that can be checked locally is checked in `new`, so a
//! misconfigured push fails before it touches the remote store.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::interaction::{InteractionReport, PushInteraction};
use super::record::PushRecord;
use super::PushError;
use crate::annotations::{Annotations, compose};
use crate::config::{MainConfig, PushConfig, UserConfig};
use crate::dag::ProjectDag;
use crate::remote::{Entity, EntityId, NodeType, SharedSession};

/// Folder at the project root holding one uploaded copy of every push document.
pub const PUSH_HISTORY_DIR: &str = "push_history";

const EXPECTED_INTERACTION_TYPE: &str = "push";

/// Summary of a completed push.
#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    /// md5 of the push document.
    pub push_id: String,
    /// When the push started.
    pub push_time: DateTime<Utc>,
    /// User id from `users.yaml`.
    pub user: String,
    /// `PROJECT_NAME` from the push document.
    pub project_name: String,
    /// Remote identifier of the project.
    pub project_id: EntityId,
    /// One report per executed interaction, the audit upload last.
    pub interactions: Vec<InteractionReport>,
    /// Nodes written back by the final flush.
    pub flushed: usize,
    /// Wall time of `execute`.
    pub duration_ms: u64,
}

impl PushReport {
    pub fn files_uploaded(&self) -> usize {
        self.interactions.iter().map(|i| i.files.len()).sum()
    }
}

pub struct Push {
    user_id: String,
    user: UserConfig,
    site_name: String,
    config: PushConfig,
    record: PushRecord,
    session: SharedSession,
    interactions: Vec<PushInteraction>,
    project: Option<Entity>,
    dag: Option<ProjectDag>,
}

impl Push {
    /// Validate `user` and the document at `config_path`, then build interactions.
    pub fn new(
        main: &MainConfig,
        user: &str,
        config_path: &Path,
        session: SharedSession,
    ) -> Result<Self, PushError> {
        let (user_config, config, record) = Self::validate(main, user, config_path)?;
        let mut push = Self {
            user_id: user.to_string(),
            user: user_config,
            site_name: main.site.site_name.clone(),
            config,
            record,
            session,
            interactions: Vec::new(),
            project: None,
            dag: None,
        };
        push.interactions = push.build_interactions()?;
        tracing::info!(
            push_id = %push.record.push_id,
            interactions = push.interactions.len(),
            "push validated"
        );
        Ok(push)
    }

    /// Resolve the operator, load and check the document, compute the push record.
    pub fn validate(
        main: &MainConfig,
        user: &str,
        config_path: &Path,
    ) -> Result<(UserConfig, PushConfig, PushRecord), PushError> {
        if user.trim().is_empty() {
            return Err(PushError::Validation(
                "A value for USER must be provided".to_string(),
            ));
        }
        let user_config = main.user(user).cloned().ok_or_else(|| {
            PushError::Validation(format!("User \"{user}\" not found in \"users.yaml\""))
        })?;

        let config = PushConfig::load(config_path)?;
        match config.interaction_type.as_deref() {
            None => {
                return Err(PushError::Validation(
                    "The push-config file must have \"INTERACTION_TYPE\" set in the top level"
                        .to_string(),
                ));
            }
            Some(kind) if !kind.eq_ignore_ascii_case(EXPECTED_INTERACTION_TYPE) => {
                return Err(PushError::Validation(format!(
                    "The \"INTERACTION_TYPE\" of a push-config file must be \"push\", not \"{}\"",
                    kind.to_lowercase()
                )));
            }
            Some(_) => {}
        }
        if config.project_name.trim().is_empty() {
            return Err(PushError::Validation(
                "\"PROJECT_NAME\" must not be empty".to_string(),
            ));
        }

        let record = PushRecord::new(user, config_path)?;
        Ok((user_config, config, record))
    }

    /// Annotations every uploaded file receives before configured layers.
    pub fn system_annotations(&self) -> Annotations {
        let mut annotations = Annotations::new();
        annotations.insert("deposited_by", self.user.syn_username.as_str());
        annotations.insert("consortium_site", self.site_name.as_str());
        annotations
    }

    /// Configured interactions in document order, then the audit interaction.
    pub fn build_interactions(&self) -> Result<Vec<PushInteraction>, PushError> {
        let system = self.system_annotations();
        let common = self.config.common_annotations();

        let mut interactions = Vec::with_capacity(self.config.interactions.len() + 1);
        for configured in &self.config.interactions {
            let annotations = compose([&system, &common, &configured.annotations()]);
            interactions.push(PushInteraction::new(
                configured.remote_destination_dir.as_str(),
                configured.create_dir,
                &configured.local_paths,
                annotations,
            )?);
        }

        let mut audit = Annotations::new();
        audit.insert("file_type", "yaml");
        audit.insert("push_id", self.record.push_id.as_str());
        audit.insert("push_time", self.record.push_time_rfc3339());
        let own_path = glob::Pattern::escape(&self.record.config_path.to_string_lossy());
        interactions.push(PushInteraction::new(
            PUSH_HISTORY_DIR,
            true,
            &[own_path],
            audit,
        )?);

        Ok(interactions)
    }

    pub fn record(&self) -> &PushRecord {
        &self.record
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn interactions(&self) -> &[PushInteraction] {
        &self.interactions
    }

    pub fn project(&self) -> Option<&Entity> {
        self.project.as_ref()
    }

    pub fn dag(&self) -> Option<&ProjectDag> {
        self.dag.as_ref()
    }

    /// Authenticate, resolve or create the project, and build its DAG.
    pub fn login(&mut self) -> Result<(), PushError> {
        tracing::info!(user = %self.user.syn_username, "logging in to remote store");
        self.session.login(&self.user.credentials())?;

        let name = self.config.project_name.clone();
        let project = match self.session.find_child(None, &name)? {
            Some(id) => {
                tracing::info!(project = %name, id = %id, "found project");
                self.session.get(&id)?
            }
            None => {
                let created = self.session.store(&Entity::project(name.as_str()))?;
                tracing::info!(project = %name, id = ?created.id, "created project");
                created
            }
        };
        self.check_project_id(&project);

        let dag = ProjectDag::build(&project, self.session.clone())?;
        self.warn_on_repeated_push(&dag);
        self.project = Some(project);
        self.dag = Some(dag);
        Ok(())
    }

    fn check_project_id(&self, project: &Entity) {
        let (Some(configured), Some(actual)) = (&self.config.project_id, &project.id) else {
            return;
        };
        let configured = EntityId::new(configured.as_str());
        if configured.numeric_suffix() != actual.numeric_suffix() {
            tracing::warn!(
                configured = %configured,
                resolved = %actual,
                project = %self.config.project_name,
                "PROJECT_ID does not match the project found by name"
            );
        }
    }

    fn warn_on_repeated_push(&self, dag: &ProjectDag) {
        let push_id = self.record.push_id.as_str();
        for folder in dag.children_where(dag.root_id(), |n| n.is_folder_named(PUSH_HISTORY_DIR)) {
            let earlier = dag.children_where(&folder, |n| {
                n.node_type() == NodeType::File
                    && n.annotation("push_id").and_then(|v| v.as_text()) == Some(push_id)
            });
            if let Some(previous) = earlier.first() {
                tracing::warn!(
                    push_id,
                    previous = %previous,
                    "this push document was already pushed once; continuing"
                );
            }
        }
    }

    /// Run every interaction in order, then flush pending node updates.
    ///
    /// The first failure aborts the run; nothing already uploaded is rolled back.
    pub fn execute(&mut self) -> Result<PushReport, PushError> {
        let started = Instant::now();
        let dag = self.dag.as_mut().ok_or(PushError::NotLoggedIn)?;
        let project_id = dag.root_id().clone();

        tracing::info!(interactions = self.interactions.len(), "executing push interactions");
        let mut reports = Vec::with_capacity(self.interactions.len());
        for (index, interaction) in self.interactions.iter_mut().enumerate() {
            match interaction.execute(dag) {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!(
                        destination = interaction.destination(),
                        completed = index,
                        error = %err,
                        "interaction failed; aborting push"
                    );
                    return Err(err);
                }
            }
        }
        let flushed = dag.flush()?;

        let report = PushReport {
            push_id: self.record.push_id.clone(),
            push_time: self.record.push_time,
            user: self.user_id.clone(),
            project_name: self.config.project_name.clone(),
            project_id,
            interactions: reports,
            flushed,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            push_id = %report.push_id,
            files = report.files_uploaded(),
            duration_ms = report.duration_ms,
            "push complete"
        );
        Ok(report)
    }

    /// `login` then `execute`.
    pub fn run(&mut self) -> Result<PushReport, PushError> {
        self.login()?;
        self.execute()
    }
}

impl std::fmt::Debug for Push {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Push")
            .field("user_id", &self.user_id)
            .field("record", &self.record)
            .field("interactions", &self.interactions.len())
            .field("dag", &self.dag)
            .finish()
    }
}
