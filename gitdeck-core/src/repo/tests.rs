//! End-to-end tests against the real git executable

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::credentials::NoCredentials;
use crate::model::RefKind;

fn service() -> RepoService {
    let config = Config::default();
    RepoService::from_parts(
        Git::new(config.git.clone()),
        TaskQueue::new(0),
        CredentialMediator::new(Arc::new(NoCredentials), Duration::from_secs(1), None),
        WatchHub::new(Duration::from_millis(50)),
    )
}

/// Run git directly for fixture setup
fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn identify(dir: &Path) {
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "tag.gpgsign", "false"]);
}

/// A repository on `master` with `committed.txt` in its first commit
async fn repo_with_commit(service: &RepoService, dir: &Path) -> RepositoryPath {
    let repo = service.init(dir, false).await.unwrap();
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    identify(dir);
    std::fs::write(dir.join("committed.txt"), "original\n").unwrap();
    service
        .commit(dir, "initial", vec!["committed.txt".to_string()], false)
        .await
        .unwrap();
    repo
}

async fn assert_clean(service: &RepoService, dir: &Path) {
    let status = service.get_status(dir).await.unwrap();
    assert!(status.files.is_empty(), "unexpected changes: {:?}", status.files);
}

#[tokio::test]
async fn test_quick_status_kinds() {
    let temp = TempDir::new().unwrap();
    let service = service();

    assert_eq!(
        service.quick_status(temp.path().join("missing")).unwrap(),
        QuickStatus::NoSuchPath
    );

    let plain = temp.path().join("plain");
    std::fs::create_dir(&plain).unwrap();
    assert_eq!(service.quick_status(&plain).unwrap(), QuickStatus::Uninited);

    let work = temp.path().join("work");
    let repo = service.init(&work, false).await.unwrap();
    std::fs::create_dir(work.join("nested")).unwrap();
    assert_eq!(
        service.quick_status(work.join("nested")).unwrap(),
        QuickStatus::Inited { root: repo }
    );

    let bare = temp.path().join("bare.git");
    service.init(&bare, true).await.unwrap();
    assert!(matches!(
        service.quick_status(&bare).unwrap(),
        QuickStatus::Bare { .. }
    ));
}

#[tokio::test]
async fn test_unborn_repository() {
    let temp = TempDir::new().unwrap();
    let service = service();
    service.init(temp.path(), false).await.unwrap();
    git(temp.path(), &["symbolic-ref", "HEAD", "refs/heads/master"]);

    let status = service.get_status(temp.path()).await.unwrap();
    assert!(status.branch.unborn);
    assert_eq!(status.branch.branch.as_deref(), Some("master"));
    assert!(status.files.is_empty());

    let log = service.get_log(temp.path(), 50, 0).await.unwrap();
    assert!(log.nodes.is_empty());
}

#[tokio::test]
async fn test_discard_new_file() {
    let temp = TempDir::new().unwrap();
    let service = service();
    service.init(temp.path(), false).await.unwrap();

    std::fs::write(temp.path().join("new.txt"), "hello\n").unwrap();
    let status = service.get_status(temp.path()).await.unwrap();
    assert_eq!(status.files.len(), 1);
    assert_eq!(status.files[0].status, FileStatus::Untracked);

    service.discard_changes(temp.path(), "new.txt").await.unwrap();
    assert_clean(&service, temp.path()).await;
    assert!(!temp.path().join("new.txt").exists());
}

#[tokio::test]
async fn test_discard_modified_file() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    std::fs::write(temp.path().join("committed.txt"), "changed\n").unwrap();
    let status = service.get_status(temp.path()).await.unwrap();
    assert_eq!(status.files[0].status, FileStatus::Modified);

    service
        .discard_changes(temp.path(), "committed.txt")
        .await
        .unwrap();
    assert_clean(&service, temp.path()).await;
    assert_eq!(
        std::fs::read_to_string(temp.path().join("committed.txt")).unwrap(),
        "original\n"
    );
}

#[tokio::test]
async fn test_discard_removed_file() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    std::fs::remove_file(temp.path().join("committed.txt")).unwrap();
    service
        .discard_changes(temp.path(), "committed.txt")
        .await
        .unwrap();
    assert_clean(&service, temp.path()).await;
    assert!(temp.path().join("committed.txt").exists());
}

#[tokio::test]
async fn test_discard_staged_new_file() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    std::fs::write(temp.path().join("staged.txt"), "new\n").unwrap();
    git(temp.path(), &["add", "staged.txt"]);
    let status = service.get_status(temp.path()).await.unwrap();
    assert_eq!(status.files[0].status, FileStatus::Added);

    service.discard_changes(temp.path(), "staged.txt").await.unwrap();
    assert_clean(&service, temp.path()).await;
    assert!(!temp.path().join("staged.txt").exists());
}

#[tokio::test]
async fn test_discard_staged_then_removed_file() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    std::fs::write(temp.path().join("staged.txt"), "new\n").unwrap();
    git(temp.path(), &["add", "staged.txt"]);
    std::fs::remove_file(temp.path().join("staged.txt")).unwrap();

    service.discard_changes(temp.path(), "staged.txt").await.unwrap();
    assert_clean(&service, temp.path()).await;
}

#[tokio::test]
async fn test_discard_rename_restores_both_sides() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    git(temp.path(), &["mv", "committed.txt", "renamed.txt"]);
    let status = service.get_status(temp.path()).await.unwrap();
    assert_eq!(status.files[0].status, FileStatus::Renamed);

    service.discard_changes(temp.path(), "renamed.txt").await.unwrap();
    assert_clean(&service, temp.path()).await;
    assert!(temp.path().join("committed.txt").exists());
    assert!(!temp.path().join("renamed.txt").exists());
}

#[tokio::test]
async fn test_discard_untracked_directory() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    let dir = temp.path().join("scratch");
    std::fs::create_dir(&dir).unwrap();
    std::fs::write(dir.join("a.txt"), "a").unwrap();
    std::fs::write(dir.join("b.txt"), "b").unwrap();

    service.discard_changes(temp.path(), "scratch").await.unwrap();
    assert_clean(&service, temp.path()).await;
}

#[tokio::test]
async fn test_discard_rejects_paths_outside_repository() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let repo_dir = temp.path().join("repo");
    repo_with_commit(&service, &repo_dir).await;
    std::fs::write(temp.path().join("outside.txt"), "keep").unwrap();

    let result = service.discard_changes(&repo_dir, "../outside.txt").await;
    assert!(matches!(result, Err(Error::InvalidPath(_))));
    assert!(temp.path().join("outside.txt").exists());
}

#[tokio::test]
async fn test_discard_from_subdirectory_targets_repository_root() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    let sub = temp.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("a.txt"), "committed\n").unwrap();
    service
        .commit(temp.path(), "add sub/a.txt", vec!["sub/a.txt".to_string()], false)
        .await
        .unwrap();
    std::fs::write(temp.path().join("a.txt"), "untracked\n").unwrap();

    // file paths are relative to the repository root, wherever the caller is
    service.discard_changes(&sub, "a.txt").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(sub.join("a.txt")).unwrap(),
        "committed\n"
    );
    assert!(!temp.path().join("a.txt").exists());
    assert_clean(&service, &sub).await;
}

#[tokio::test]
async fn test_discard_conflicts_with_and_without_head_side() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let dir = temp.path();
    repo_with_commit(&service, dir).await;

    git(dir, &["branch", "other"]);
    git(dir, &["rm", "-q", "committed.txt"]);
    std::fs::write(dir.join("both.txt"), "ours\n").unwrap();
    git(dir, &["add", "both.txt"]);
    git(dir, &["commit", "-q", "-m", "ours"]);

    git(dir, &["checkout", "-q", "other"]);
    std::fs::write(dir.join("committed.txt"), "changed on other\n").unwrap();
    std::fs::write(dir.join("both.txt"), "theirs\n").unwrap();
    git(dir, &["add", "committed.txt", "both.txt"]);
    git(dir, &["commit", "-q", "-m", "theirs"]);
    git(dir, &["checkout", "-q", "master"]);

    let outcome = service.merge(dir, "other", false).await.unwrap();
    assert_eq!(
        outcome,
        MutationOutcome::Conflicted {
            files: vec!["both.txt".to_string(), "committed.txt".to_string()]
        }
    );

    // deleted on master, so HEAD has nothing to restore
    service.discard_changes(dir, "committed.txt").await.unwrap();
    assert!(!dir.join("committed.txt").exists());

    // added on both sides: HEAD's version wins
    service.discard_changes(dir, "both.txt").await.unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("both.txt")).unwrap(), "ours\n");

    let status = service.get_status(dir).await.unwrap();
    assert!(status.files.is_empty(), "unexpected changes: {:?}", status.files);
    assert!(status.in_merge);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_discard_non_utf8_file_names() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    let dir = temp.path().join("latin1");
    std::fs::create_dir(&dir).unwrap();
    let tracked = dir.join(OsStr::from_bytes(b"caf\xe9.txt"));
    std::fs::write(&tracked, "original\n").unwrap();
    git(temp.path(), &["add", "-A"]);
    git(temp.path(), &["commit", "-q", "-m", "latin-1 name"]);

    std::fs::write(&tracked, "changed\n").unwrap();
    let untracked = dir.join(OsStr::from_bytes(b"na\xefve.txt"));
    std::fs::write(&untracked, "new\n").unwrap();

    service.discard_changes(temp.path(), "latin1").await.unwrap();
    assert_eq!(std::fs::read_to_string(&tracked).unwrap(), "original\n");
    assert!(!untracked.exists());
    assert_clean(&service, temp.path()).await;
}

#[tokio::test]
async fn test_log_refs_and_tags() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    service
        .create_tag(temp.path(), "v1.0", None, Some("release"))
        .await
        .unwrap();
    service
        .create_tag(temp.path(), "light", None, None)
        .await
        .unwrap();
    service
        .create_branch(temp.path(), "topic", None)
        .await
        .unwrap();

    let log = service.get_log(temp.path(), 10, 0).await.unwrap();
    assert_eq!(log.nodes.len(), 1);
    let head = log.head().unwrap();
    assert_eq!(head.title(), "initial");

    let names: Vec<String> = head.refs.iter().map(|r| r.to_string()).collect();
    assert_eq!(
        names,
        vec![
            "HEAD",
            "refs/heads/master",
            "refs/heads/topic",
            "tag: refs/tags/light",
            "tag: refs/tags/v1.0",
        ]
    );
    let kind = |name: &str| head.refs.iter().find(|r| r.name == name).unwrap().kind;
    assert_eq!(kind("refs/tags/v1.0"), RefKind::AnnotatedTag);
    assert_eq!(kind("refs/tags/light"), RefKind::LightweightTag);

    let branches = service.list_branches(temp.path()).await.unwrap();
    assert_eq!(branches.len(), 2);
    assert!(branches
        .iter()
        .any(|b| b.name == "refs/heads/master" && b.current));
}

#[tokio::test]
async fn test_log_paging() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;
    for i in 0..3 {
        std::fs::write(temp.path().join("committed.txt"), format!("{}\n", i)).unwrap();
        service
            .commit(
                temp.path(),
                &format!("change {}", i),
                vec!["committed.txt".to_string()],
                false,
            )
            .await
            .unwrap();
    }

    let page = service.get_log(temp.path(), 2, 1).await.unwrap();
    assert_eq!(page.nodes.len(), 2);
    assert_eq!(page.nodes[0].title(), "change 1");
    assert_eq!(page.nodes[0].parents.len(), 1);
}

/// `master` and `topic` both change `file.txt`; leaves `master` checked out
async fn diverged(service: &RepoService, dir: &Path) {
    repo_with_commit(service, dir).await;
    std::fs::write(dir.join("file.txt"), "base\n").unwrap();
    service
        .commit(dir, "base", vec!["file.txt".to_string()], false)
        .await
        .unwrap();

    service.create_branch(dir, "topic", None).await.unwrap();
    service.checkout(dir, "topic").await.unwrap();
    std::fs::write(dir.join("file.txt"), "topic\n").unwrap();
    service
        .commit(dir, "topic change", vec!["file.txt".to_string()], false)
        .await
        .unwrap();

    service.checkout(dir, "master").await.unwrap();
    std::fs::write(dir.join("file.txt"), "master\n").unwrap();
    service
        .commit(dir, "master change", vec!["file.txt".to_string()], false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_merge_conflict_is_an_outcome() {
    let temp = TempDir::new().unwrap();
    let service = service();
    diverged(&service, temp.path()).await;

    let outcome = service.merge(temp.path(), "topic", false).await.unwrap();
    assert_eq!(
        outcome,
        MutationOutcome::Conflicted {
            files: vec!["file.txt".to_string()]
        }
    );

    let status = service.get_status(temp.path()).await.unwrap();
    assert!(status.in_merge);
    assert_eq!(status.conflicted(), vec!["file.txt".to_string()]);
}

#[tokio::test]
async fn test_rebase_conflict_then_abort() {
    let temp = TempDir::new().unwrap();
    let service = service();
    diverged(&service, temp.path()).await;
    service.checkout(temp.path(), "topic").await.unwrap();

    let outcome = service.rebase(temp.path(), "master").await.unwrap();
    assert!(outcome.is_conflicted());
    assert!(service.get_status(temp.path()).await.unwrap().in_rebase);

    service.rebase_abort(temp.path()).await.unwrap();
    let status = service.get_status(temp.path()).await.unwrap();
    assert!(!status.in_rebase);
    assert!(status.files.is_empty());
    assert_eq!(status.branch.branch.as_deref(), Some("topic"));
}

#[tokio::test]
async fn test_failed_command_is_process_error() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    let result = service.checkout(temp.path(), "does-not-exist").await;
    match result {
        Err(Error::Process { exit_code, stderr, .. }) => {
            assert_ne!(exit_code, 0);
            assert!(!stderr.is_empty());
        }
        other => panic!("Expected process error, got {:?}", other),
    }

    // the queue keeps working after a failure
    assert_clean(&service, temp.path()).await;
}

/// Bare remote seeded with one commit on `master`
fn bare_remote(temp: &Path) -> String {
    let seed = temp.join("seed");
    std::fs::create_dir(&seed).unwrap();
    git(&seed, &["init"]);
    git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    identify(&seed);
    std::fs::write(seed.join("committed.txt"), "original\n").unwrap();
    git(&seed, &["add", "committed.txt"]);
    git(&seed, &["commit", "-m", "initial"]);
    git(temp, &["clone", "--bare", "seed", "remote.git"]);
    temp.join("remote.git").to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_clone_lists_single_origin() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let url = bare_remote(temp.path());

    let clone = service
        .clone_repository(temp.path(), &url, "clone", false, None)
        .await
        .unwrap();
    assert!(clone.as_path().join("committed.txt").exists());

    let remotes = service.list_remotes(&clone).await.unwrap();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].name, "origin");
    assert_eq!(remotes[0].url, url);
}

#[tokio::test]
async fn test_push_then_fetch_and_rebase() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let url = bare_remote(temp.path());

    let a = service
        .clone_repository(temp.path(), &url, "a", false, None)
        .await
        .unwrap();
    let b = service
        .clone_repository(temp.path(), &url, "b", false, None)
        .await
        .unwrap();
    identify(a.as_path());
    identify(b.as_path());

    std::fs::write(a.as_path().join("pushed.txt"), "from a\n").unwrap();
    service
        .commit(&a, "pushed commit", vec!["pushed.txt".to_string()], false)
        .await
        .unwrap();
    service.push(&a, PushOptions::default()).await.unwrap();

    service.fetch(&b, "origin", None, None).await.unwrap();
    let outcome = service.rebase(&b, "origin/master").await.unwrap();
    assert_eq!(outcome, MutationOutcome::Completed);

    let a_log = service.get_log(&a, 10, 0).await.unwrap();
    let b_log = service.get_log(&b, 10, 0).await.unwrap();
    let a_head = a_log.head().unwrap();
    let b_head = b_log.head().unwrap();
    assert_eq!(a_head.sha, b_head.sha);
    assert_eq!(b_head.title(), "pushed commit");
    assert!(b_head.has_ref("HEAD"));
    assert!(b_head.has_ref("refs/heads/master"));
    assert!(b_head.has_ref("refs/remotes/origin/master"));

    let status = service.get_status(&b).await.unwrap();
    assert_eq!((status.branch.ahead, status.branch.behind), (0, 0));
}

#[tokio::test]
async fn test_remote_tags_after_tag_push() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let url = bare_remote(temp.path());
    let a = service
        .clone_repository(temp.path(), &url, "a", false, None)
        .await
        .unwrap();
    identify(a.as_path());

    service
        .create_tag(&a, "v2.0", None, Some("second release"))
        .await
        .unwrap();
    service.push_tag(&a, "v2.0", "origin", None).await.unwrap();

    let tags = service.remote_tags(&a, "origin", None).await.unwrap();
    assert!(tags.iter().any(|t| t.name == "refs/tags/v2.0"));
    assert!(tags.iter().any(|t| t.name == "refs/tags/v2.0^{}"));
}

#[tokio::test]
async fn test_push_rejects_option_like_refspec() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let url = bare_remote(temp.path());
    let a = service
        .clone_repository(temp.path(), &url, "a", false, None)
        .await
        .unwrap();

    let marker = temp.path().join("marker");
    let result = service
        .push(
            &a,
            PushOptions {
                refspec: Some(format!("--receive-pack=touch {}", marker.display())),
                ..PushOptions::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Other(_))));
    assert!(!marker.exists());

    let result = service
        .push(
            &a,
            PushOptions {
                remote_branch: Some("--delete".to_string()),
                ..PushOptions::default()
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Other(_))));
    assert_eq!(
        git(
            temp.path(),
            &["--git-dir", "remote.git", "for-each-ref", "--format=%(refname)", "refs/heads"]
        )
        .trim(),
        "refs/heads/master"
    );
}

#[tokio::test]
async fn test_submodule_discard_restores_pinned_state() {
    let temp = TempDir::new().unwrap();
    let service = service();

    let lib_dir = temp.path().join("lib");
    repo_with_commit(&service, &lib_dir).await;
    let parent_dir = temp.path().join("parent");
    repo_with_commit(&service, &parent_dir).await;

    let entry = service
        .add_submodule(&parent_dir, &lib_dir.to_string_lossy(), "lib")
        .await
        .unwrap();
    assert!(entry.is_initialized());
    service
        .commit(
            &parent_dir,
            "add lib",
            vec![".gitmodules".to_string(), "lib".to_string()],
            false,
        )
        .await
        .unwrap();

    let sub = parent_dir.join("lib");
    identify(&sub);
    let pinned = git(&sub, &["rev-parse", "HEAD"]);

    // working tree changes are visible only through the nested status
    std::fs::write(sub.join("committed.txt"), "changed in submodule\n").unwrap();
    std::fs::write(sub.join("extra.txt"), "untracked\n").unwrap();
    let status = service.get_status(&parent_dir).await.unwrap();
    assert!(status.files.is_empty());
    assert_eq!(status.submodules.len(), 1);
    assert_eq!(status.submodules[0].files.len(), 2);

    service.discard_changes(&parent_dir, "lib").await.unwrap();
    let status = service.get_status(&parent_dir).await.unwrap();
    assert!(status.files.is_empty());
    assert!(status.submodules[0].is_clean());
    assert!(!sub.join("extra.txt").exists());

    // a new commit inside the submodule moves it off the pinned commit
    std::fs::write(sub.join("committed.txt"), "committed in submodule\n").unwrap();
    git(&sub, &["commit", "-am", "inside"]);
    let status = service.get_status(&parent_dir).await.unwrap();
    assert_eq!(status.files.len(), 1);
    assert_eq!(status.files[0].path, "lib");

    service.discard_changes(&parent_dir, "lib").await.unwrap();
    assert_clean(&service, &parent_dir).await;
    assert_eq!(git(&sub, &["rev-parse", "HEAD"]), pinned);
    assert_eq!(
        std::fs::read_to_string(sub.join("committed.txt")).unwrap(),
        "original\n"
    );
}

#[tokio::test]
async fn test_submodule_listing_and_removal() {
    let temp = TempDir::new().unwrap();
    let service = service();

    let lib_dir = temp.path().join("lib");
    repo_with_commit(&service, &lib_dir).await;
    let parent_dir = temp.path().join("parent");
    repo_with_commit(&service, &parent_dir).await;
    service
        .add_submodule(&parent_dir, &lib_dir.to_string_lossy(), "vendor/lib")
        .await
        .unwrap();

    let entries = service.list_submodules(&parent_dir).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "vendor/lib");
    let lib_url = lib_dir.to_string_lossy().into_owned();
    assert_eq!(entries[0].url.as_deref(), Some(lib_url.as_str()));
    assert!(entries[0].repository.is_some());

    service
        .remove_submodule(&parent_dir, "vendor/lib")
        .await
        .unwrap();
    assert!(service.list_submodules(&parent_dir).await.unwrap().is_empty());
    assert!(!parent_dir.join("vendor/lib").exists());
}

/// `parent` with `lib` added as a submodule at `lib` and committed
async fn parent_with_submodule(service: &RepoService, temp: &Path) -> (PathBuf, PathBuf) {
    let lib_dir = temp.join("lib");
    repo_with_commit(service, &lib_dir).await;
    let parent_dir = temp.join("parent");
    repo_with_commit(service, &parent_dir).await;
    service
        .add_submodule(&parent_dir, &lib_dir.to_string_lossy(), "lib")
        .await
        .unwrap();
    service
        .commit(
            &parent_dir,
            "add lib",
            vec![".gitmodules".to_string(), "lib".to_string()],
            false,
        )
        .await
        .unwrap();
    (lib_dir, parent_dir)
}

#[tokio::test]
async fn test_update_submodules_follows_the_pinned_commit() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let (lib_dir, parent_dir) = parent_with_submodule(&service, temp.path()).await;
    let first_pin = git(&lib_dir, &["rev-parse", "HEAD"]);

    let copy = service
        .clone_repository(temp.path(), &parent_dir.to_string_lossy(), "copy", false, None)
        .await
        .unwrap();
    let copy_lib = copy.as_path().join("lib");
    let entries = service.list_submodules(&copy).await.unwrap();
    assert!(entries[0].repository.is_none());

    // init clones the submodule at the commit the parent pins
    let entries = service
        .update_submodules(&copy, UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_initialized());
    assert_eq!(git(&copy_lib, &["rev-parse", "HEAD"]), first_pin);

    // lib moves on and the parent pins the new commit
    std::fs::write(lib_dir.join("committed.txt"), "second\n").unwrap();
    git(&lib_dir, &["commit", "-q", "-am", "second"]);
    let second_pin = git(&lib_dir, &["rev-parse", "HEAD"]);
    let parent_lib = parent_dir.join("lib");
    git(&parent_lib, &["fetch", "-q", "origin"]);
    git(&parent_lib, &["checkout", "-q", second_pin.trim()]);
    service
        .commit(&parent_dir, "bump lib", vec!["lib".to_string()], false)
        .await
        .unwrap();

    service.fetch(&copy, "origin", None, None).await.unwrap();
    let outcome = service.merge(&copy, "origin/master", false).await.unwrap();
    assert_eq!(outcome, MutationOutcome::Completed);
    assert_eq!(git(&copy_lib, &["rev-parse", "HEAD"]), first_pin);

    service
        .update_submodules(&copy, UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(git(&copy_lib, &["rev-parse", "HEAD"]), second_pin);
    assert_eq!(
        std::fs::read_to_string(copy_lib.join("committed.txt")).unwrap(),
        "second\n"
    );
    assert_clean(&service, copy.as_path()).await;
}

#[tokio::test]
async fn test_external_commit_in_submodule_notifies() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let (_, parent_dir) = parent_with_submodule(&service, temp.path()).await;
    let sub = parent_dir.join("lib");
    identify(&sub);

    let mut subscription = service.subscribe_to_changes(&sub).unwrap();
    assert_eq!(subscription.path(), &RepositoryPath::new(&sub).unwrap());

    // only the submodule's git directory, under the parent's .git, changes
    git(&sub, &["commit", "-q", "--allow-empty", "-m", "outside"]);

    let saw_metadata = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = subscription.changed().await {
            if event.sources.contains(&ChangeSource::Metadata) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(saw_metadata);
}

#[tokio::test]
async fn test_mutation_notifies_subscribers() {
    let temp = TempDir::new().unwrap();
    let service = service();
    repo_with_commit(&service, temp.path()).await;

    let mut subscription = service.subscribe_to_changes(temp.path()).unwrap();
    service
        .create_branch(temp.path(), "notified", None)
        .await
        .unwrap();

    let saw_operation = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = subscription.changed().await {
            if event.sources.contains(&ChangeSource::Operation) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(saw_operation);

    service.unsubscribe(subscription);
    let repo = RepositoryPath::new(temp.path()).unwrap();
    assert!(!service.watch_hub().is_watching(&repo));
}

#[tokio::test]
async fn test_different_spellings_share_a_queue() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let repo = repo_with_commit(&service, temp.path()).await;

    let dotted = temp.path().join(".");
    let status = service.get_status(&dotted).await.unwrap();
    assert!(status.files.is_empty());
    assert_eq!(RepositoryPath::new(&dotted).unwrap(), repo);
}

#[tokio::test]
async fn test_subdirectory_resolves_to_the_repository() {
    let temp = TempDir::new().unwrap();
    let service = service();
    let repo = repo_with_commit(&service, temp.path()).await;
    let sub = temp.path().join("sub").join("deeper");
    std::fs::create_dir_all(&sub).unwrap();

    let subscription = service.subscribe_to_changes(&sub).unwrap();
    assert_eq!(subscription.path(), &repo);
    assert!(service.watch_hub().is_watching(&repo));

    let status = service.get_status(&sub).await.unwrap();
    assert_eq!(status.branch.branch.as_deref(), Some("master"));
    let log = service.get_log(&sub, 10, 0).await.unwrap();
    assert_eq!(log.nodes.len(), 1);

    service.unsubscribe(subscription);
    assert!(!service.watch_hub().is_watching(&repo));
}
