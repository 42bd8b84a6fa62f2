mod common;

use common::{init_tracing, service, FakeCrypto, FakeRemote, ScriptedDialog, Vault};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vaultsync_core::{ConflictResolution, DownloadTarget, SyncProgress, SyncStatus};
use vaultsync_infra::fingerprint;
use vaultsync_pipeline::{QueueStatus, SyncError};

fn assert_invariant(p: &SyncProgress) {
    assert!(p.settled() <= p.total, "{p:?}");
    if p.status == SyncStatus::Completed {
        assert_eq!(p.in_progress, 0, "{p:?}");
        assert!(p.settled() >= p.total, "{p:?}");
    }
}

#[tokio::test]
async fn first_sync_uploads_new_notes_at_version_one() {
    init_tracing();
    let vault = Vault::new();
    vault.write("a.md", "alpha");
    vault.write("journal/b.md", "beta");
    vault.write("image.png", "not a note");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!((progress.total, progress.completed, progress.failed), (2, 2, 0));
    assert_eq!(progress.status, SyncStatus::Completed);

    let meta = vault.metadata();
    assert_eq!(meta.len(), 2);
    assert_eq!(meta["a.md"].version, 1);
    assert_eq!(meta["a.md"].hash, fingerprint("alpha"));
    assert_eq!(meta["journal/b.md"].version, 1);
    assert_eq!(remote.content("journal/b.md").as_deref(), Some("beta"));
    assert!(remote.file("image.png").is_none());
}

#[tokio::test]
async fn second_sync_of_unchanged_vault_is_a_no_op() {
    let vault = Vault::new();
    vault.write("a.md", "alpha");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();
    let again = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!(again.total, 0);
    assert_eq!(again.status, SyncStatus::Completed);
    assert_eq!(remote.accepted_uploads(), 1);
    assert_eq!(svc.get_queue_status(), QueueStatus::default());
}

#[tokio::test]
async fn server_only_note_is_downloaded_into_place() {
    let vault = Vault::new();
    let remote = FakeRemote::new();
    remote.push_from_other_device("inbox/new.md", "from phone");
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!(progress.completed, 1);
    assert_eq!(vault.read("inbox/new.md"), "from phone");
    let meta = vault.metadata();
    assert_eq!(meta["inbox/new.md"].version, 1);
    assert_eq!(meta["inbox/new.md"].hash, fingerprint("from phone"));
}

#[tokio::test]
async fn remote_edit_is_pulled_when_local_is_unchanged() {
    let vault = Vault::new();
    vault.write("a.md", "v1 text");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    remote.push_from_other_device("a.md", "v2 text");
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!(vault.read("a.md"), "v2 text");
    assert_eq!(vault.metadata()["a.md"].version, 2);
}

#[tokio::test]
async fn local_edit_of_tracked_note_uploads_next_version() {
    let vault = Vault::new();
    vault.write("a.md", "first");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    vault.write("a.md", "second");
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!(remote.content("a.md").as_deref(), Some("second"));
    let meta = vault.metadata();
    assert_eq!(meta["a.md"].version, 2);
    assert_eq!(meta["a.md"].hash, fingerprint("second"));
}

/// Both sides edited the same note since version 1: the server reports a
/// conflict, the planner turns it into an upload, and the upload's rejection
/// reaches the dialog.
async fn diverged_vault(dialog: Arc<ScriptedDialog>) -> (Vault, Arc<FakeRemote>, SyncProgress) {
    let vault = Vault::new();
    vault.write("a.md", "base");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::unlocked(), dialog);
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    remote.push_from_other_device("a.md", "theirs");
    vault.write("a.md", "mine");
    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();
    (vault, remote, progress)
}

#[tokio::test]
async fn conflict_keep_local_force_uploads_on_top_of_server() {
    let dialog = ScriptedDialog::answering(ConflictResolution::KeepLocal);
    let (vault, remote, progress) = diverged_vault(dialog.clone()).await;

    assert_eq!((progress.completed, progress.failed), (1, 0));
    assert_eq!(dialog.count(), 1);
    {
        let presented = dialog.presented.lock().unwrap();
        let (info, server_content) = &presented[0];
        assert_eq!(info.relative_path, "a.md");
        assert_eq!(info.server_version, 2);
        assert_eq!(info.local_content, "mine");
        assert_eq!(server_content, "theirs");
    }

    assert_eq!(remote.file("a.md").unwrap().version(), 3);
    assert_eq!(remote.content("a.md").as_deref(), Some("mine"));
    assert_eq!(vault.read("a.md"), "mine");
    let meta = vault.metadata();
    assert_eq!(meta["a.md"].version, 3);
    assert_eq!(meta["a.md"].hash, fingerprint("mine"));
}

#[tokio::test]
async fn conflict_use_server_adopts_server_copy_without_uploading() {
    let dialog = ScriptedDialog::answering(ConflictResolution::UseServer);
    let (vault, remote, progress) = diverged_vault(dialog).await;

    assert_eq!(progress.completed, 1);
    assert_eq!(remote.file("a.md").unwrap().version(), 2);
    assert_eq!(vault.read("a.md"), "theirs");
    let meta = vault.metadata();
    assert_eq!(meta["a.md"].version, 2);
    assert_eq!(meta["a.md"].hash, fingerprint("theirs"));
}

#[tokio::test]
async fn conflict_merge_uploads_merged_text_everywhere() {
    let dialog = ScriptedDialog::answering(ConflictResolution::Merge {
        merged_content: "mine + theirs".into(),
    });
    let (vault, remote, _) = diverged_vault(dialog).await;

    assert_eq!(remote.file("a.md").unwrap().version(), 3);
    assert_eq!(remote.content("a.md").as_deref(), Some("mine + theirs"));
    assert_eq!(vault.read("a.md"), "mine + theirs");
    assert_eq!(vault.metadata()["a.md"].hash, fingerprint("mine + theirs"));
}

#[tokio::test]
async fn dismissed_conflict_fails_the_file_once() {
    let dialog = ScriptedDialog::dismissing();
    let (vault, remote, progress) = diverged_vault(dialog.clone()).await;

    assert_eq!((progress.total, progress.completed, progress.failed), (1, 0, 1));
    assert_eq!(progress.status, SyncStatus::Completed);
    assert_eq!(dialog.count(), 1);
    assert_eq!(remote.content("a.md").as_deref(), Some("theirs"));
    assert_eq!(vault.read("a.md"), "mine");
    assert_eq!(vault.metadata()["a.md"].version, 1);
}

#[tokio::test]
async fn untracked_note_clashing_with_server_goes_through_the_dialog() {
    let vault = Vault::new();
    vault.write("a.md", "laptop draft");
    let remote = FakeRemote::new();
    remote.push_from_other_device("a.md", "phone draft");
    let dialog = ScriptedDialog::answering(ConflictResolution::KeepLocal);
    let svc = service(remote.clone(), FakeCrypto::unlocked(), dialog.clone());

    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!(dialog.count(), 1);
    assert_eq!(remote.content("a.md").as_deref(), Some("laptop draft"));
    assert_eq!(vault.metadata()["a.md"].version, 2);
}

#[tokio::test]
async fn locked_vault_fails_uploads_without_retrying() {
    let vault = Vault::new();
    vault.write("a.md", "secret");
    let remote = FakeRemote::new();
    let svc = service(remote.clone(), FakeCrypto::locked(), ScriptedDialog::dismissing());

    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!((progress.completed, progress.failed), (0, 1));
    assert_eq!(remote.upload_attempts.load(Ordering::SeqCst), 0);
    assert!(vault.metadata().is_empty());
}

#[tokio::test]
async fn transient_upload_errors_are_retried() {
    let vault = Vault::new();
    vault.write("a.md", "eventually");
    let remote = FakeRemote::new();
    remote.fail_next_uploads("a.md", 2);
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!((progress.completed, progress.failed), (1, 0));
    assert_eq!(remote.upload_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_upload_errors_give_up_after_four_attempts() {
    let vault = Vault::new();
    vault.write("a.md", "never");
    vault.write("b.md", "fine");
    let remote = FakeRemote::new();
    remote.fail_next_uploads("a.md", 10);
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let progress = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    assert_eq!((progress.total, progress.completed, progress.failed), (2, 1, 1));
    assert_eq!(remote.upload_attempts.load(Ordering::SeqCst), 5);
    assert!(remote.file("b.md").is_some());
}

#[tokio::test]
async fn planning_failure_fails_the_pass() {
    let vault = Vault::new();
    vault.write("a.md", "x");
    let remote = FakeRemote::new();
    remote.fail_check.store(true, Ordering::SeqCst);
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let err = svc
        .perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(svc.sync_progress("v1").unwrap().status, SyncStatus::Error);
    assert_eq!(remote.check_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn progress_callback_sees_consistent_snapshots() {
    let vault = Vault::new();
    for i in 0..8 {
        vault.write(&format!("n{i}.md"), &format!("note {i}"));
    }
    let remote = FakeRemote::new();
    remote.fail_next_uploads("n3.md", 10);
    let svc = service(remote, FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    svc.perform_background_sync(
        "v1",
        vault.path(),
        &vault.tree(),
        Some(Arc::new(move |p: &SyncProgress| sink.lock().unwrap().push(*p))),
    )
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    seen.iter().for_each(assert_invariant);
    assert_eq!(seen[0].status, SyncStatus::Syncing);
    let last = seen.last().unwrap();
    assert_eq!((last.total, last.completed, last.failed), (8, 7, 1));
    assert_eq!(last.status, SyncStatus::Completed);
}

#[tokio::test]
async fn overlapping_passes_do_not_double_count() {
    init_tracing();
    let vault = Vault::new();
    for i in 0..12 {
        vault.write(&format!("n{i:02}.md"), &format!("note {i}"));
    }
    let remote = FakeRemote::new();
    remote.slow_uploads(Duration::from_millis(15));
    let svc = service(
        remote.clone(),
        FakeCrypto::unlocked(),
        ScriptedDialog::answering(ConflictResolution::KeepLocal),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    svc.on_sync_progress(
        "v1",
        Arc::new(move |p: &SyncProgress| sink.lock().unwrap().push(*p)),
    );

    let tree = vault.tree();
    let (first, second) = tokio::join!(
        svc.perform_background_sync("v1", vault.path(), &tree, None),
        svc.perform_background_sync("v1", vault.path(), &tree, None),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_invariant(&first);
    assert_invariant(&second);
    seen.lock().unwrap().iter().for_each(assert_invariant);

    // Whatever interleaving happened, every note ends up in sync.
    let meta = vault.metadata();
    assert_eq!(meta.len(), 12);
    for (path, entry) in &meta {
        let server = remote.file(path).unwrap();
        assert_eq!(entry.version, server.version(), "{path}");
        assert_eq!(Some(vault.read(path)), remote.content(path));
    }
    assert_eq!(svc.get_queue_status(), QueueStatus::default());
}

#[tokio::test]
async fn clear_sync_progress_forgets_the_vault() {
    let vault = Vault::new();
    vault.write("a.md", "x");
    let svc = service(FakeRemote::new(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();
    assert!(svc.sync_progress("v1").is_some());

    svc.clear_sync_progress("v1");
    assert!(svc.sync_progress("v1").is_none());
}

async fn locally_edited_then_downloaded(choice: ConflictResolution) -> (Vault, Arc<FakeRemote>, Arc<ScriptedDialog>) {
    let vault = Vault::new();
    vault.write("a.md", "base");
    let remote = FakeRemote::new();
    let dialog = ScriptedDialog::answering(choice);
    let svc = service(remote.clone(), FakeCrypto::unlocked(), dialog.clone());
    svc.perform_background_sync("v1", vault.path(), &vault.tree(), None)
        .await
        .unwrap();

    // The edit lands after planning, so only the download itself can see it.
    remote.push_from_other_device("a.md", "remote");
    vault.write("a.md", "edited");
    let target = DownloadTarget {
        file_id: Some(remote.file("a.md").unwrap().file_id),
        relative_path: "a.md".into(),
        version: 2,
    };
    let outcome = svc.download_file("v1", vault.path(), &target).await.unwrap();
    assert!(outcome.resolved_conflict);
    (vault, remote, dialog)
}

#[tokio::test]
async fn download_over_local_edit_keep_local_reuploads() {
    let (vault, remote, dialog) = locally_edited_then_downloaded(ConflictResolution::KeepLocal).await;

    assert_eq!(dialog.count(), 1);
    assert_eq!(dialog.presented.lock().unwrap()[0].1, "remote");
    assert_eq!(vault.read("a.md"), "edited");
    assert_eq!(remote.file("a.md").unwrap().version(), 3);
    assert_eq!(remote.content("a.md").as_deref(), Some("edited"));
    assert_eq!(vault.metadata()["a.md"].version, 3);
}

#[tokio::test]
async fn download_over_local_edit_use_server_overwrites() {
    let (vault, remote, _) = locally_edited_then_downloaded(ConflictResolution::UseServer).await;

    assert_eq!(vault.read("a.md"), "remote");
    assert_eq!(remote.file("a.md").unwrap().version(), 2);
    let meta = vault.metadata();
    assert_eq!(meta["a.md"].version, 2);
    assert_eq!(meta["a.md"].hash, fingerprint("remote"));
}

#[tokio::test]
async fn download_over_local_edit_merge_writes_and_uploads_merged() {
    let merged = "edited\nremote";
    let (vault, remote, dialog) = locally_edited_then_downloaded(ConflictResolution::Merge {
        merged_content: merged.into(),
    })
    .await;

    assert_eq!(dialog.count(), 1);
    assert_eq!(vault.read("a.md"), merged);
    assert_eq!(remote.content("a.md").as_deref(), Some(merged));
    assert_eq!(remote.file("a.md").unwrap().version(), 3);
    let meta = vault.metadata();
    assert_eq!(meta["a.md"].version, 3);
    assert_eq!(meta["a.md"].hash, fingerprint(merged));
}

#[tokio::test]
async fn shutdown_during_a_pass_returns_without_hanging() {
    let vault = Vault::new();
    for i in 0..12 {
        vault.write(&format!("n{i:02}.md"), &format!("note {i}"));
    }
    let remote = FakeRemote::new();
    remote.slow_uploads(Duration::from_millis(50));
    let svc = service(remote.clone(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());

    let tree = vault.tree();
    let pass = async {
        tokio::time::timeout(
            Duration::from_secs(3),
            svc.perform_background_sync("v1", vault.path(), &tree, None),
        )
        .await
    };
    let stop = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        svc.shutdown();
    };
    let (result, ()) = tokio::join!(pass, stop);

    let progress = result.expect("pass returned after shutdown").unwrap();
    assert_ne!(progress.status, SyncStatus::Completed);
    assert!(remote.upload_attempts.load(Ordering::SeqCst) < 12);
    assert_eq!(svc.get_queue_status(), QueueStatus::default());

    let late = svc
        .perform_background_sync("v1", vault.path(), &tree, None)
        .await
        .unwrap();
    assert_ne!(late.status, SyncStatus::Completed);
}

#[tokio::test]
async fn download_outside_vault_is_refused() {
    let vault = Vault::new();
    let svc = service(FakeRemote::new(), FakeCrypto::unlocked(), ScriptedDialog::dismissing());
    let target = DownloadTarget {
        file_id: None,
        relative_path: "../escape.md".into(),
        version: 1,
    };

    let err = svc.download_file("v1", vault.path(), &target).await.unwrap_err();
    assert!(matches!(err, SyncError::Security(_)));
}
