use patchkit_core::path_safety::{check_manifest_path, relativize, resolve, PathPolicy};
use patchkit_core::ErrorKind;
use proptest::prelude::*;
use std::fs;

#[cfg(target_family = "unix")]
fn symlink_dir<P: AsRef<std::path::Path>, Q: AsRef<std::path::Path>>(
    src: P,
    dst: Q,
) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[test]
fn rejects_traversal_absolute_and_odd_forms() {
    for bad in [
        "../../etc/passwd",
        "a/../../b",
        "/etc/passwd",
        "C:/Windows/win.ini",
        "maps\\gfx.eqg",
        "a//b",
        "./a",
        "a/",
        "",
        "file.txt:stream",
    ] {
        assert!(check_manifest_path(bad).is_err(), "accepted {bad:?}");
    }
}

#[test]
fn accepts_normal_nested_paths() {
    for ok in ["eqgame.exe", "maps/qeynos.eqg", "Resources/Sky/..sky.s3d", "a b/c-d_e.txt"] {
        assert!(check_manifest_path(ok).is_ok(), "rejected {ok:?}");
    }
}

#[test]
fn resolve_reports_traversal_as_parse_error() {
    let td = tempfile::tempdir().unwrap();
    let err = resolve(td.path(), "../../etc/passwd", PathPolicy::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn resolve_joins_segments_under_root() {
    let td = tempfile::tempdir().unwrap();
    let p = resolve(td.path(), "maps/zone/a.eqg", PathPolicy::default()).unwrap();
    assert_eq!(p, td.path().join("maps").join("zone").join("a.eqg"));
}

#[cfg(target_family = "unix")]
#[test]
fn resolve_rejects_symlink_by_default_allows_contained_when_following() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("root");
    fs::create_dir_all(root.join("target")).unwrap();
    fs::write(root.join("target/file.txt"), b"hello").unwrap();
    symlink_dir(root.join("target"), root.join("safe")).unwrap();

    let err = resolve(&root, "safe/file.txt", PathPolicy::default()).unwrap_err();
    assert!(err.to_string().contains("symlink"), "unexpected error: {err}");

    let policy = PathPolicy { follow_symlinks: true };
    assert!(resolve(&root, "safe/file.txt", policy).is_ok());
}

#[cfg(target_family = "unix")]
#[test]
fn resolve_blocks_symlink_escape_even_when_following() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(td.path().join("outside.txt"), b"outside").unwrap();
    // root/evil -> the parent tempdir
    symlink_dir(td.path(), root.join("evil")).unwrap();

    let policy = PathPolicy { follow_symlinks: true };
    let err = resolve(&root, "evil/outside.txt", policy).unwrap_err();
    assert!(err.to_string().contains("escapes root"), "unexpected error: {err}");
}

#[test]
fn relativize_uses_forward_slashes() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("maps").join("a.eqg");
    assert_eq!(relativize(td.path(), &p).as_deref(), Some("maps/a.eqg"));
    assert_eq!(relativize(td.path(), td.path()), None);
}

proptest! {
    #[test]
    fn parent_segment_anywhere_is_rejected(
        pre in prop::collection::vec("[a-z0-9]{1,6}", 0..4),
        post in prop::collection::vec("[a-z0-9]{1,6}", 0..4),
    ) {
        let mut segs = pre.clone();
        segs.push("..".to_string());
        segs.extend(post);
        prop_assert!(check_manifest_path(&segs.join("/")).is_err());
    }

    #[test]
    fn plain_segments_are_accepted(segs in prop::collection::vec("[A-Za-z0-9_-]{1,8}", 1..5)) {
        prop_assert!(check_manifest_path(&segs.join("/")).is_ok());
    }
}
