//! End-to-end push of the fixture trees into a staging directory.

use push_agent::diff::{diff, ChangeKind};
use push_agent::executor::result::EntryStatus;
use push_agent::executor::{ExecutorOptions, PushExecutor, RunStatus};
use push_agent::fs::walker::IgnoreRules;
use push_agent::manifest::{Manifest, ManifestOptions};
use push_agent::snapshot::SnapshotBuilder;
use push_agent::target::{LocalDirTarget, PushTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn builder() -> SnapshotBuilder {
    SnapshotBuilder::new(IgnoreRules::none())
}

async fn push(source: &Path, target: Arc<LocalDirTarget>) -> push_agent::executor::result::PushResult {
    let before = target.recorded_state().await.unwrap();
    let after = builder().build(source).unwrap();
    let manifest = Manifest::generate(
        diff(&before, &after),
        before.root_id(),
        after.root_id(),
        ManifestOptions::default(),
    )
    .unwrap();

    PushExecutor::new(target, source, ExecutorOptions::default())
        .execute(manifest)
        .await
}

#[test]
fn test_fixture_diff() {
    let before = builder().build(&fixture("push-files")).unwrap();
    let after = builder().build(&fixture("push-files-changed")).unwrap();
    let change_set = diff(&before, &after);

    let summary: Vec<(&str, ChangeKind)> = change_set
        .iter()
        .map(|e| (e.path.as_str(), e.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("components/AnimatedProgressView.js", ChangeKind::Removed),
            ("components/CardView.js", ChangeKind::Added),
            ("index.ios.js", ChangeKind::Removed),
        ]
    );
}

#[tokio::test]
async fn test_push_converges_staging_directory() {
    let staging = TempDir::new().unwrap();
    let target = Arc::new(LocalDirTarget::new(staging.path().join("device")));

    // First push populates an empty target
    let first = push(&fixture("push-files"), target.clone()).await;
    assert_eq!(first.status(), RunStatus::Completed);
    assert_eq!(first.entries().len(), 2);

    let pushed = builder().build(target.root()).unwrap();
    let source = builder().build(&fixture("push-files")).unwrap();
    assert_eq!(pushed.root_id(), source.root_id());

    // Second push moves the target to the changed tree
    let second = push(&fixture("push-files-changed"), target.clone()).await;
    assert_eq!(second.status(), RunStatus::Completed);
    assert_eq!(second.count(EntryStatus::Success), 3);

    let pushed = builder().build(target.root()).unwrap();
    let source = builder().build(&fixture("push-files-changed")).unwrap();
    assert_eq!(pushed, source);

    // Nothing left to push
    let state = target.recorded_state().await.unwrap();
    assert!(diff(&state, &source).is_empty());
}
