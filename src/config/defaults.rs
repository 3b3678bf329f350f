//! Factory-default config files.
//!
//! Defaults never clobber an operator's file: when the target already
//! exists, the fresh default lands next to it as `<name>.bkdup_<timestamp>`.

use std::path::{Path, PathBuf};

use clap::ValueEnum;

use super::ConfigError;

const SITE_TEMPLATE: &str = "\
# Name of the consortium site pushing data; recorded on every uploaded file
# as the `consortium_site` annotation.
SITE_NAME: CHANGE_ME

# Live entity store endpoint. Not needed for `push --dry-run`.
REMOTE:
  URL: https://entities.example.org/api
  TIMEOUT_SECS: 60
";

const USERS_TEMPLATE: &str = "\
# One entry per operator. The key is the id passed to `push --user`.
example_user:
  SYN_USERNAME: user@example.org
  API_KEY: CHANGE_ME
";

const PROJECTS_TEMPLATE: &str = "\
# Short names for the remote projects this site pushes to.
EXAMPLE:
  PROJECT_NAME: Example Project
  PROJECT_ID: syn0000000
";

/// Which default config file(s) to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKind {
    All,
    Site,
    Users,
    Projects,
}

impl ConfigKind {
    fn files(self) -> &'static [(&'static str, &'static str)] {
        const SITE: (&str, &str) = ("site.yaml", SITE_TEMPLATE);
        const USERS: (&str, &str) = ("users.yaml", USERS_TEMPLATE);
        const PROJECTS: (&str, &str) = ("projects.yaml", PROJECTS_TEMPLATE);
        match self {
            Self::All => &[SITE, USERS, PROJECTS],
            Self::Site => &[SITE],
            Self::Users => &[USERS],
            Self::Projects => &[PROJECTS],
        }
    }
}

/// Write the defaults for `kind` into `dir`, creating it if needed.
///
/// Returns the paths actually written, in order.
pub fn write_defaults(dir: &Path, kind: ConfigKind) -> Result<Vec<PathBuf>, ConfigError> {
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S").to_string();
    let mut written = Vec::new();
    for (name, body) in kind.files() {
        let target = free_path(dir, name, &stamp);
        std::fs::write(&target, body).map_err(|source| ConfigError::Write {
            path: target.clone(),
            source,
        })?;
        tracing::info!(path = %target.display(), "generated new config");
        written.push(target);
    }
    Ok(written)
}

fn free_path(dir: &Path, name: &str, stamp: &str) -> PathBuf {
    let target = dir.join(name);
    if !target.exists() {
        return target;
    }
    let backup = dir.join(format!("{name}.bkdup_{stamp}"));
    if !backup.exists() {
        return backup;
    }
    (1..)
        .map(|n| dir.join(format!("{name}.bkdup_{stamp}_{n}")))
        .find(|p| !p.exists())
        .unwrap_or(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MainConfig;
    use tempfile::TempDir;

    #[test]
    fn all_writes_three_loadable_files() {
        let tmp = TempDir::new().unwrap();
        let written = write_defaults(tmp.path(), ConfigKind::All).unwrap();
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["site.yaml", "users.yaml", "projects.yaml"]);

        let config = MainConfig::load(tmp.path()).unwrap();
        assert_eq!(config.site.site_name, "CHANGE_ME");
        assert!(config.user("example_user").is_some());
    }

    #[test]
    fn existing_file_is_kept_and_default_backed_up_beside_it() {
        let tmp = TempDir::new().unwrap();
        let site = tmp.path().join("site.yaml");
        std::fs::write(&site, "SITE_NAME: MINE\n").unwrap();

        let written = write_defaults(tmp.path(), ConfigKind::Site).unwrap();
        assert_eq!(written.len(), 1);
        let name = written[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("site.yaml.bkdup_"), "got {name}");
        assert_eq!(std::fs::read_to_string(&site).unwrap(), "SITE_NAME: MINE\n");

        let again = write_defaults(tmp.path(), ConfigKind::Site).unwrap();
        assert_ne!(again[0], written[0]);
    }

    #[test]
    fn creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        write_defaults(&nested, ConfigKind::Users).unwrap();
        assert!(nested.join("users.yaml").is_file());
    }
}
