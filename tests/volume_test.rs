//! Integration tests for the volume lifecycle state machine.
//!
//! Collaborators are in-memory fakes, so these run without Ceph or root:
//! ```bash
//! cargo test --test volume_test
//! ```

mod common;

use std::{sync::Arc, time::Duration};

use cephfs_volume::VolumeError;
use common::{FakeExecutor, Harness, MountCall};
use tokio::sync::Barrier;

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_makes_backing_dir_without_registering() {
    let h = Harness::new();

    h.manager.create("  /team/cache ").await.unwrap();

    assert!(h.probe.has("/team/cache"));
    assert!(h.manager.registry().is_empty());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_create_recreates_missing_dir_for_mounted_volume() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();
    // Deleted out of band while the volume is still mounted.
    h.probe.forget("/foo");
    let probes = h.probe.probe_count();

    h.manager.create("/foo").await.unwrap();

    assert!(h.probe.probe_count() > probes);
    assert!(h.probe.has("/foo"));
    assert_eq!(h.connections("/foo"), Some(1));
}

#[tokio::test]
async fn test_create_rejects_empty_names() {
    let h = Harness::new();
    for raw in ["", "   ", "////"] {
        let err = h.manager.create(raw).await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName(_)));
    }
    assert_eq!(h.probe.probe_count(), 0);
}

#[tokio::test]
async fn test_parent_segments_never_reach_the_filesystem() {
    let h = Harness::new();
    for raw in ["../escape", "/a/../../etc", ".."] {
        assert!(matches!(
            h.manager.mount(raw).await.unwrap_err(),
            VolumeError::InvalidName(_)
        ));
        assert!(matches!(
            h.manager.create(raw).await.unwrap_err(),
            VolumeError::InvalidName(_)
        ));
        assert!(h.manager.path(raw).is_err());
    }
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.probe.probe_count(), 0);
    assert!(!h.root.path().join("escape").exists());
}

#[tokio::test]
async fn test_create_reports_probe_failure() {
    let h = Harness::new();
    *h.probe.fail_probe.lock().unwrap() = true;

    let err = h.manager.create("foo").await.unwrap_err();
    assert!(matches!(err, VolumeError::ProbeFailed { .. }));
    assert!(!h.probe.has("/foo"));
}

// =============================================================================
// Mount / Unmount
// =============================================================================

#[tokio::test]
async fn test_first_mount_registers_one_connection() {
    let h = Harness::new();

    let mountpoint = h.manager.mount("foo/bar").await.unwrap();

    assert_eq!(mountpoint, h.local_root().join("foo/bar"));
    assert!(mountpoint.is_dir());
    assert!(h.probe.has("/foo/bar"));
    assert_eq!(h.connections("/foo/bar"), Some(1));

    let record = h.manager.registry().get("/foo/bar").unwrap();
    assert_eq!(record.name, "foo/bar");
    assert_eq!(record.filesystem_root, "/foo/bar");

    assert_eq!(
        h.executor.calls(),
        vec![MountCall::Mount {
            source: "/foo/bar".to_string(),
            target: mountpoint,
        }]
    );
}

#[tokio::test]
async fn test_second_mount_increments_and_mounts_again() {
    let h = Harness::new();

    let first = h.manager.mount("foo").await.unwrap();
    let second = h.manager.mount("/foo").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.connections("/foo"), Some(2));
    assert_eq!(h.executor.mounts(), 2);
}

#[tokio::test]
async fn test_mount_rejects_file_at_mountpoint() {
    let h = Harness::new();
    std::fs::create_dir_all(h.local_root()).unwrap();
    std::fs::write(h.local_root().join("foo"), b"not a dir").unwrap();

    let err = h.manager.mount("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::LocalPathConflict(_)));
    assert!(err.to_string().contains("not a directory"));
    assert!(h.executor.calls().is_empty());
    assert!(h.manager.registry().is_empty());
}

#[tokio::test]
async fn test_failed_mount_leaves_no_record() {
    let h = Harness::new();
    *h.executor.fail_mount.lock().unwrap() = true;

    let err = h.manager.mount("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::MountFailed { .. }));
    assert!(h.manager.registry().is_empty());
    // Side effects before the failing step are kept.
    assert!(h.probe.has("/foo"));
    assert!(h.local_root().join("foo").is_dir());
}

#[tokio::test]
async fn test_unmount_without_record_is_not_mounted() {
    let h = Harness::new();

    let err = h.manager.unmount("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::NotMounted(_)));
    assert_eq!(h.executor.unmounts(), 0);
}

#[tokio::test]
async fn test_unmount_to_zero_then_remount_resets_count() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();

    h.manager.unmount("foo").await.unwrap();
    assert_eq!(h.executor.unmounts(), 1);
    assert_eq!(h.connections("/foo"), Some(0));

    // A zero-count record refuses further unmounts.
    let err = h.manager.unmount("foo").await.unwrap_err();
    assert!(matches!(err, VolumeError::NotMounted(_)));
    assert_eq!(h.executor.unmounts(), 1);

    h.manager.mount("foo").await.unwrap();
    assert_eq!(h.connections("/foo"), Some(1));
}

#[tokio::test]
async fn test_every_unmount_is_physical() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();
    h.manager.mount("foo").await.unwrap();

    h.manager.unmount("foo").await.unwrap();

    assert_eq!(h.executor.unmounts(), 1);
    assert_eq!(h.connections("/foo"), Some(1));
}

#[tokio::test]
async fn test_failed_unmount_keeps_count() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();
    *h.executor.fail_unmount.lock().unwrap() = true;

    let err = h.manager.unmount("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::UnmountFailed { .. }));
    assert_eq!(h.connections("/foo"), Some(1));
}

// =============================================================================
// Remove
// =============================================================================

#[tokio::test]
async fn test_remove_single_reference_clears_contents() {
    let h = Harness::new();
    let mountpoint = h.manager.mount("foo").await.unwrap();
    std::fs::write(mountpoint.join("data.bin"), b"payload").unwrap();
    std::fs::write(mountpoint.join(".hidden"), b"dot").unwrap();
    std::fs::create_dir_all(mountpoint.join("nested/deeper")).unwrap();

    h.manager.remove("foo").await.unwrap();

    assert!(mountpoint.is_dir(), "mountpoint itself is kept");
    assert_eq!(std::fs::read_dir(&mountpoint).unwrap().count(), 0);
    assert_eq!(
        h.executor.calls().last(),
        Some(&MountCall::Unmount {
            target: mountpoint.clone()
        })
    );
    assert!(h.manager.registry().is_empty());
}

#[tokio::test]
async fn test_remove_zero_references_deletes_through_root_mount() {
    let h = Harness::new();
    let mountpoint = h.manager.mount("foo").await.unwrap();
    h.manager.unmount("foo").await.unwrap();

    // What the CephFS root looks like once mounted on the mountpoint.
    let subtree = mountpoint.join("foo");
    std::fs::create_dir_all(&subtree).unwrap();
    std::fs::write(subtree.join("data.bin"), b"payload").unwrap();

    h.manager.remove("foo").await.unwrap();

    let calls = h.executor.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            MountCall::Mount {
                source: "/".to_string(),
                target: mountpoint.clone(),
            },
            MountCall::Unmount {
                target: mountpoint.clone()
            },
        ]
    );
    assert!(!subtree.exists());
    assert!(h.manager.registry().is_empty());
}

#[tokio::test]
async fn test_remove_failure_after_root_mount_unmounts_root() {
    let h = Harness::new();
    let mountpoint = h.manager.mount("foo").await.unwrap();
    h.manager.unmount("foo").await.unwrap();

    // A regular file where the subtree should be cannot be removed as a tree.
    std::fs::write(mountpoint.join("foo"), b"not a dir").unwrap();

    let err = h.manager.remove("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::LocalIo { .. }));
    let calls = h.executor.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        &[
            MountCall::Mount {
                source: "/".to_string(),
                target: mountpoint.clone(),
            },
            MountCall::Unmount {
                target: mountpoint.clone()
            },
        ]
    );
    assert_eq!(h.connections("/foo"), Some(0));
}

#[tokio::test]
async fn test_remove_shared_volume_keeps_data() {
    let h = Harness::new();
    let mountpoint = h.manager.mount("foo").await.unwrap();
    h.manager.mount("foo").await.unwrap();
    std::fs::write(mountpoint.join("data.bin"), b"payload").unwrap();

    h.manager.remove("foo").await.unwrap();

    assert!(mountpoint.join("data.bin").exists());
    assert_eq!(h.executor.mounts(), 2);
    assert_eq!(h.executor.unmounts(), 1);
    assert!(h.manager.registry().is_empty());
}

#[tokio::test]
async fn test_remove_unknown_volume_is_noop() {
    let h = Harness::new();

    h.manager.remove("never-mounted").await.unwrap();

    assert!(h.executor.calls().is_empty());
    assert_eq!(h.probe.probe_count(), 0);
}

#[tokio::test]
async fn test_failed_remove_keeps_record() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();
    *h.executor.fail_unmount.lock().unwrap() = true;

    let err = h.manager.remove("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::UnmountFailed { .. }));
    assert_eq!(h.connections("/foo"), Some(1));
}

// =============================================================================
// Get / List / Path / Capabilities
// =============================================================================

#[tokio::test]
async fn test_get_reports_canonical_name() {
    let h = Harness::new();
    h.manager.create("foo/bar").await.unwrap();

    let info = h.manager.get(" foo/bar").await.unwrap();

    assert_eq!(info.name, "/foo/bar");
    assert_eq!(info.mountpoint, h.local_root().join("foo/bar"));
}

#[tokio::test]
async fn test_get_missing_dir_evicts_record() {
    let h = Harness::new();
    h.manager.mount("foo").await.unwrap();
    h.probe.forget("/foo");

    let err = h.manager.get("foo").await.unwrap_err();

    assert!(matches!(err, VolumeError::NotFound(_)));
    assert!(h.manager.registry().get("/foo").is_none());
}

#[tokio::test]
async fn test_list_uses_display_names_and_key_mountpoints() {
    let h = Harness::new();
    h.manager.mount("b").await.unwrap();
    h.manager.mount("/a/nested").await.unwrap();

    let listed = h.manager.list();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, "a/nested");
    assert_eq!(listed[0].mountpoint, h.local_root().join("a/nested"));
    assert_eq!(listed[1].name, "b");
    assert_eq!(listed[1].mountpoint, h.local_root().join("b"));
}

#[tokio::test]
async fn test_path_ignores_registry() {
    let h = Harness::new();

    let path = h.manager.path("never/mounted").unwrap();

    assert_eq!(path, h.local_root().join("never/mounted"));
    assert!(h.manager.path("  ").is_err());
}

#[tokio::test]
async fn test_capabilities_are_global() {
    let h = Harness::new();
    assert_eq!(
        h.manager.capabilities().scope,
        cephfs_volume::volume::VolumeScope::Global
    );
}

// =============================================================================
// Concurrency
// =============================================================================

/// Both mounts must be inside the executor at the same time to pass the
/// barrier; a lock spanning unrelated volumes would deadlock here.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_distinct_volumes_mount_concurrently() {
    let h = Harness::with_executor(FakeExecutor {
        mount_barrier: Some(Arc::new(Barrier::new(2))),
        ..FakeExecutor::default()
    });

    let (m1, m2) = (h.manager.clone(), h.manager.clone());
    let both = async move { tokio::join!(m1.mount("alpha"), m2.mount("beta")) };
    let (a, b) = tokio::time::timeout(Duration::from_secs(5), both)
        .await
        .expect("mounts of distinct volumes must not block each other");

    assert_eq!(a.unwrap(), h.local_root().join("alpha"));
    assert_eq!(b.unwrap(), h.local_root().join("beta"));
    assert_eq!(h.connections("/alpha"), Some(1));
    assert_eq!(h.connections("/beta"), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mounts_of_one_volume_count_exactly() {
    let h = Harness::new();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let m = h.manager.clone();
            tokio::spawn(async move { m.mount("shared").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.connections("/shared"), Some(16));
    assert_eq!(h.executor.mounts(), 16);
}
