//! Push-configuration documents.
//!
//! ```yaml
//! INTERACTION_TYPE: push
//! PROJECT_NAME: VEOIBD
//! PROJECT_ID: syn1234
//! COMMON_ANNOTATIONS:
//!   data_type: vcf
//! INTERACTIONS:
//!   - REMOTE_DESTINATION_DIR: uploads/batch1
//!     CREATE_DIR: true
//!     LOCAL_PATHS:
//!       - /data/batch1/*.vcf
//!     ANNOTATIONS:
//!       batch: 1
//! ```

use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::{ConfigError, read_yaml};
use crate::annotations::Annotations;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PushConfig {
    /// Must be `push` (any case); checked by the orchestrator.
    #[serde(default)]
    pub interaction_type: Option<String>,
    pub project_name: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub common_annotations: Option<Annotations>,
    #[serde(default)]
    pub interactions: Vec<InteractionConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InteractionConfig {
    pub remote_destination_dir: String,
    #[serde(default)]
    pub create_dir: bool,
    pub local_paths: Vec<String>,
    #[serde(default)]
    pub annotations: Option<Annotations>,
}

impl PushConfig {
    /// Read and parse a push-configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)?.ok_or_else(|| ConfigError::Parse {
            path: path.to_path_buf(),
            source: serde::de::Error::custom("document is empty"),
        })
    }

    pub fn common_annotations(&self) -> Annotations {
        self.common_annotations.clone().unwrap_or_default()
    }
}

impl InteractionConfig {
    pub fn annotations(&self) -> Annotations {
        self.annotations.clone().unwrap_or_default()
    }
}

/// `PROJECT_ID` may be written `syn1234` or as a bare number.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    }))
}
