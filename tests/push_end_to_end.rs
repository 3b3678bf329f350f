use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dagpush::config::{MainConfig, SiteConfig, UserConfig};
use dagpush::dag::DagError;
use dagpush::push::{ErrorKind, PUSH_HISTORY_DIR, Push, PushError};
use dagpush::remote::{Entity, MemorySession, NodeType, RemoteSession};
use tempfile::TempDir;

fn main_config() -> MainConfig {
    let mut users = BTreeMap::new();
    users.insert(
        "alice".to_string(),
        UserConfig {
            syn_username: "alice@example.org".to_string(),
            api_key: "key".to_string(),
        },
    );
    MainConfig {
        site: SiteConfig {
            site_name: "BCH".to_string(),
            remote: None,
        },
        users,
        dir: PathBuf::new(),
    }
}

fn escaped(dir: &Path) -> String {
    glob::Pattern::escape(&dir.to_string_lossy())
}

/// Two data files and a push document targeting `destination`.
fn scenario(tmp: &TempDir, destination: &str, create: bool) -> PathBuf {
    let data = tmp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("sample1.vcf"), "##fileformat=VCFv4.2\n").unwrap();
    fs::write(data.join("sample2.vcf"), "##fileformat=VCFv4.2\n#CHROM\n").unwrap();

    let config = tmp.path().join("push.yaml");
    fs::write(
        &config,
        format!(
            "INTERACTION_TYPE: push\n\
             PROJECT_NAME: VEOIBD\n\
             COMMON_ANNOTATIONS:\n\
             \x20 data_type: vcf\n\
             INTERACTIONS:\n\
             \x20 - REMOTE_DESTINATION_DIR: {destination}\n\
             \x20   CREATE_DIR: {create}\n\
             \x20   LOCAL_PATHS:\n\
             \x20     - '{}/*.vcf'\n\
             \x20   ANNOTATIONS:\n\
             \x20     batch: 1\n",
            escaped(&data)
        ),
    )
    .unwrap();
    config
}

#[test]
fn push_creates_destination_uploads_files_and_records_itself() {
    let tmp = TempDir::new().unwrap();
    let config = scenario(&tmp, "uploads/batch1", true);
    let remote = Arc::new(MemorySession::new().with_user("alice@example.org", "key"));

    let mut push = Push::new(&main_config(), "alice", &config, remote.clone()).unwrap();
    let report = push.run().unwrap();
    let dag = push.dag().unwrap();
    let root = dag.root_id().clone();

    // uploads/batch1 was created, one folder per segment
    let uploads = dag.resolve_path_readonly("uploads");
    let batch1 = dag.resolve_path_readonly("uploads/batch1");
    assert_eq!(dag.parent_of(&uploads), Some(&root));
    assert_eq!(dag.parent_of(&batch1), Some(&uploads));
    assert_eq!(report.interactions[0].destination_id.as_ref(), Some(&batch1));

    // both files hang off batch1 with composed annotations
    let files = &report.interactions[0].files;
    assert_eq!(files.len(), 2);
    for file in files {
        assert_eq!(dag.parent_of(&file.id), Some(&batch1));
        let node = dag.node(&file.id).unwrap();
        assert_eq!(node.node_type(), NodeType::File);
        let stored = remote.peek(&file.id).unwrap();
        assert_eq!(stored.annotations.text("deposited_by"), Some("alice@example.org"));
        assert_eq!(stored.annotations.text("consortium_site"), Some("BCH"));
        assert_eq!(stored.annotations.text("data_type"), Some("vcf"));
        assert_eq!(stored.annotations.text("batch"), Some("1"));
    }

    // the push document itself lands under push_history
    let history = dag.resolve_path_readonly(PUSH_HISTORY_DIR);
    assert_eq!(dag.parent_of(&history), Some(&root));
    let audit = &report.interactions.last().unwrap().files;
    assert_eq!(audit.len(), 1);
    let audit_node = dag.node(&audit[0].id).unwrap();
    assert_eq!(dag.parent_of(&audit[0].id), Some(&history));
    assert_eq!(
        audit_node.annotation("file_type").and_then(|v| v.as_text()),
        Some("yaml")
    );
    assert_eq!(
        audit_node.annotation("push_id").and_then(|v| v.as_text()),
        Some(report.push_id.as_str())
    );
    assert_eq!(audit_node.name(), "push.yaml");
    assert_eq!(
        remote.uploaded_size(&audit[0].id),
        Some(fs::metadata(&config).unwrap().len())
    );
}

#[test]
fn zero_match_pattern_never_reaches_the_remote() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("push.yaml");
    fs::write(
        &config,
        format!(
            "INTERACTION_TYPE: push\nPROJECT_NAME: VEOIBD\nINTERACTIONS:\n  - REMOTE_DESTINATION_DIR: raw\n    CREATE_DIR: true\n    LOCAL_PATHS: ['{}/*.bam']\n",
            escaped(tmp.path())
        ),
    )
    .unwrap();
    let remote = Arc::new(MemorySession::new());

    let err = Push::new(&main_config(), "alice", &config, remote.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("did not resolve to any files"));
    assert_eq!(remote.calls().total(), 0);
}

#[test]
fn missing_destination_without_create_aborts_before_audit() {
    let tmp = TempDir::new().unwrap();
    let config = scenario(&tmp, "uploads/batch1", false);
    let remote = Arc::new(MemorySession::new());

    let mut push = Push::new(&main_config(), "alice", &config, remote.clone()).unwrap();
    let err = push.run().unwrap_err();
    assert!(matches!(err, PushError::Dag(DagError::NotFound { .. })));
    assert_eq!(err.kind().exit_code(), 4);

    // project exists but nothing was uploaded, not even the audit copy
    let project = push.project().unwrap().id.clone().unwrap();
    assert!(remote.children(&project).is_empty());
}

#[test]
fn existing_destination_is_reused() {
    let tmp = TempDir::new().unwrap();
    let config = scenario(&tmp, "raw", false);
    let remote = Arc::new(MemorySession::new());
    let project = remote.store(&Entity::project("VEOIBD")).unwrap();
    let raw = remote
        .store(&Entity::folder("raw", project.id.clone().unwrap()))
        .unwrap()
        .id
        .unwrap();

    let mut push = Push::new(&main_config(), "alice", &config, remote.clone()).unwrap();
    let report = push.run().unwrap();
    assert_eq!(report.interactions[0].destination_id.as_ref(), Some(&raw));
    assert_eq!(remote.children(&raw).len(), 2);
}

#[test]
fn cyclic_remote_state_is_a_validation_error() {
    let tmp = TempDir::new().unwrap();
    let config = scenario(&tmp, "raw", true);
    let remote = Arc::new(MemorySession::new());
    let project = remote.store(&Entity::project("VEOIBD")).unwrap();
    let pid = project.id.clone().unwrap();

    let mut a = Entity::folder("a", "syn9002".into());
    a.id = Some("syn9001".into());
    let mut b = Entity::folder("b", "syn9001".into());
    b.id = Some("syn9002".into());
    remote.seed(a, Some(&pid));
    remote.seed(b, Some(&pid));

    let mut push = Push::new(&main_config(), "alice", &config, remote.clone()).unwrap();
    let stores = remote.calls().store;
    let err = push.login().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(push.dag().is_none());
    assert_eq!(remote.calls().store, stores);
}

/// Read-only path lookup for assertions.
trait ResolveReadonly {
    fn resolve_path_readonly(&self, path: &str) -> dagpush::remote::EntityId;
}

impl ResolveReadonly for dagpush::dag::ProjectDag {
    fn resolve_path_readonly(&self, path: &str) -> dagpush::remote::EntityId {
        let mut current = self.root_id().clone();
        for segment in path.split('/') {
            current = self
                .children_where(&current, |n| n.is_folder_named(segment))
                .into_iter()
                .next()
                .unwrap_or_else(|| panic!("no folder {segment} in {path}"));
        }
        current
    }
}
