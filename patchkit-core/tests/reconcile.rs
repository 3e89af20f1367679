mod common;

use common::{entry, manifest, write_file, MemState};
use patchkit_core::config::SyncConfig;
use patchkit_core::manifest::Manifest;
use patchkit_core::reconcile::{FetchReason, FsState, Reconciler};
use patchkit_core::store::LocalManifestStore;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn reconciler() -> Reconciler {
    Reconciler::new(SyncConfig::new("/game"))
}

#[test]
fn classifies_missing_and_modified_files() {
    let target = manifest(&[("a.txt", b"hello"), ("b.txt", b"world"), ("c.txt", b"new!")]);
    let local = MemState::with(&[("a.txt", b"hello"), ("b.txt", b"WORLD")]);

    let plan = reconciler().plan(&target, &local, None);
    assert_eq!(plan.fetch_paths(), ["b.txt", "c.txt"]);
    assert_eq!(plan.to_fetch[0].reason, FetchReason::HashMismatch);
    assert_eq!(plan.to_fetch[1].reason, FetchReason::Missing);
    assert_eq!(plan.unchanged, vec![entry("a.txt", b"hello")]);
    assert!(plan.to_delete.is_empty());
    assert_eq!(plan.fetch_bytes(), 9);
}

#[test]
fn previous_record_drives_deletion() {
    let target = manifest(&[("a.txt", b"hello"), ("b.txt", b"world"), ("c.txt", b"new!")]);
    let previous = manifest(&[("a.txt", b"hello"), ("b.txt", b"old"), ("old.txt", b"x")]);
    let local = MemState::with(&[("a.txt", b"hello"), ("b.txt", b"old"), ("old.txt", b"x")]);

    let plan = reconciler().plan(&target, &local, Some(&previous));
    assert_eq!(plan.fetch_paths(), ["b.txt", "c.txt"]);
    assert_eq!(plan.to_fetch[0].reason, FetchReason::SizeMismatch);
    assert_eq!(plan.to_delete, BTreeSet::from(["old.txt".to_string()]));
}

#[test]
fn no_record_means_no_deletions() {
    let target = manifest(&[("a.txt", b"a")]);
    let local = MemState::with(&[("a.txt", b"a"), ("stray.txt", b"user file")]);
    let plan = reconciler().plan(&target, &local, None);
    assert!(plan.is_empty());
}

#[test]
fn files_never_placed_by_us_are_not_deleted() {
    let target = manifest(&[("a.txt", b"a")]);
    let previous = manifest(&[("a.txt", b"a")]);
    let local = MemState::with(&[("a.txt", b"a"), ("screenshot.bmp", b"mine")]);
    let plan = reconciler().plan(&target, &local, Some(&previous));
    assert!(plan.to_delete.is_empty());
}

#[test]
fn size_mismatch_skips_hashing() {
    let target = manifest(&[("big.bin", b"0123456789")]);
    let local = MemState::with(&[("big.bin", b"0123")]);
    let plan = reconciler().plan(&target, &local, None);
    assert_eq!(plan.to_fetch[0].reason, FetchReason::SizeMismatch);
    assert_eq!(local.hash_calls.get(), 0);
}

#[test]
fn unreadable_local_file_is_refetched() {
    let target = manifest(&[("locked.dat", b"data")]);
    let mut local = MemState::with(&[("locked.dat", b"data")]);
    local.broken.insert("locked.dat".into());
    let plan = reconciler().plan(&target, &local, None);
    assert_eq!(plan.to_fetch[0].reason, FetchReason::Unreadable);
}

#[test]
fn protected_paths_are_never_deleted_but_updates_are_reported() {
    let target = manifest(&[("patcher.exe", b"v2"), ("a.txt", b"a")]);
    let previous =
        manifest(&[("patcher.exe", b"v1"), ("LaunchPad.exe", b"lp"), ("a.txt", b"a")]);
    let local = MemState::with(&[("patcher.exe", b"v1"), ("LaunchPad.exe", b"lp"), ("a.txt", b"a")]);

    let plan = reconciler().plan(&target, &local, Some(&previous));
    assert!(plan.to_delete.is_empty());
    assert_eq!(plan.launcher_updates(), ["patcher.exe".to_string()]);
    let protected = reconciler().config().protected.clone();
    plan.validate(&protected).unwrap();
}

#[test]
fn plan_keeps_target_order() {
    let target = manifest(&[("z.txt", b"1"), ("a.txt", b"2"), ("m/x.txt", b"3")]);
    let plan = reconciler().plan(&target, &MemState::default(), None);
    assert_eq!(plan.fetch_paths(), ["z.txt", "a.txt", "m/x.txt"]);
}

#[test]
fn plan_local_reads_disk_and_record() {
    let td = tempfile::tempdir().unwrap();
    write_file(td.path(), "a.txt", b"hello");
    write_file(td.path(), "gone.txt", b"bye");
    let cfg = SyncConfig::new(td.path());
    LocalManifestStore::for_config(&cfg)
        .save(&manifest(&[("a.txt", b"hello"), ("gone.txt", b"bye")]))
        .unwrap();

    let target = manifest(&[("a.txt", b"hello"), ("maps/b.eqg", b"b")]);
    let plan = Reconciler::new(cfg).plan_local(&target).unwrap();
    assert_eq!(plan.fetch_paths(), ["maps/b.eqg"]);
    assert_eq!(plan.unchanged.len(), 1);
    assert_eq!(plan.to_delete, BTreeSet::from(["gone.txt".to_string()]));
}

#[test]
fn directory_where_a_file_should_be_needs_fetch() {
    let td = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(td.path().join("a.txt")).unwrap();
    let target = manifest(&[("a.txt", b"hello")]);
    let state = FsState::new(td.path(), Default::default());
    let plan = reconciler().plan(&target, &state, None);
    assert_eq!(plan.to_fetch[0].reason, FetchReason::Unreadable);
}

#[test]
fn run_state_entries_in_target_are_ignored() {
    let target = manifest(&[
        ("a.txt", b"a"),
        (".patcher-manifest.json", b"{}"),
        (".patcher.lock", b""),
    ]);
    let plan = reconciler().plan(&target, &MemState::default(), None);
    assert_eq!(plan.fetch_paths(), ["a.txt"]);
    assert!(plan.unchanged.is_empty());
    assert!(plan.launcher_updates().is_empty());
}

fn tree() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    let body = prop::collection::vec(any::<u8>(), 0..6);
    prop::collection::btree_map("[a-e]{1,2}(/[a-e]{1,2})?\\.txt", body, 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn as_manifest(files: &[(String, Vec<u8>)]) -> Manifest {
    let refs: Vec<(&str, &[u8])> = files.iter().map(|(p, b)| (p.as_str(), b.as_slice())).collect();
    manifest(&refs)
}

proptest! {
    #[test]
    fn fetch_and_delete_are_disjoint(
        target in tree(),
        previous in tree(),
        local in tree(),
    ) {
        let target = as_manifest(&target);
        let previous = as_manifest(&previous);
        let local_refs: Vec<(&str, &[u8])> =
            local.iter().map(|(p, b)| (p.as_str(), b.as_slice())).collect();
        let state = MemState::with(&local_refs);

        let plan = reconciler().plan(&target, &state, Some(&previous));
        let again = reconciler().plan(&target, &state, Some(&previous));
        prop_assert_eq!(&plan, &again);
        for item in &plan.to_fetch {
            prop_assert!(!plan.to_delete.contains(&item.entry.path));
        }
        for p in &plan.to_delete {
            prop_assert!(!target.contains(p));
            prop_assert!(previous.contains(p));
        }
        prop_assert_eq!(plan.to_fetch.len() + plan.unchanged.len(), target.len());
    }

    #[test]
    fn converged_tree_plans_nothing(target in tree()) {
        let m = as_manifest(&target);
        let refs: Vec<(&str, &[u8])> =
            target.iter().map(|(p, b)| (p.as_str(), b.as_slice())).collect();
        let state = MemState::with(&refs);
        let plan = reconciler().plan(&m, &state, Some(&m));
        prop_assert!(plan.is_empty());
        prop_assert_eq!(plan.unchanged.len(), m.len());
    }
}
