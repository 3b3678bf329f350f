//! Identity of one push run.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::PushError;

/// Read size for content hashing.
pub const HASH_CHUNK_SIZE: usize = 1_024_000;

/// Computed once during validation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushRecord {
    /// md5 hex digest of the push-configuration file.
    pub push_id: String,
    pub push_time: DateTime<Utc>,
    pub user: String,
    pub config_path: PathBuf,
}

impl PushRecord {
    pub fn new(user: impl Into<String>, config_path: &Path) -> Result<Self, PushError> {
        Ok(Self {
            push_id: content_md5(config_path)?,
            push_time: Utc::now(),
            user: user.into(),
            config_path: config_path.to_path_buf(),
        })
    }

    /// RFC 3339 timestamp as recorded in annotations.
    pub fn push_time_rfc3339(&self) -> String {
        self.push_time.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// md5 hex digest of a file, read in [`HASH_CHUNK_SIZE`] chunks.
pub fn content_md5(path: &Path) -> Result<String, PushError> {
    let io_err = |source| PushError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}
