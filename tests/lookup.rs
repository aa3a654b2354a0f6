//! Path resolution, symlink traversal, globbing, scoped views, and the
//! error taxonomy, exercised over freshly written images.

mod common;

use sqfs::write::Metadata;
use sqfs::ErrorKind;

use common::build_archive;

fn sample_tree() -> sqfs::read::Archive<sqfs::MemBuffer> {
    build_archive(131_072, |w| {
        w.add_dir("include", Metadata::dir()).unwrap();
        w.add_file("include/zlib.h", Metadata::file(), &b"/* zlib */"[..])
            .unwrap();
        w.add_dir("lib64", Metadata::dir()).unwrap();
        w.add_file("lib64/libz.so", Metadata::file(), &b"ELF so"[..])
            .unwrap();
        w.add_file("lib64/libz.a", Metadata::file(), &b"!<arch>"[..])
            .unwrap();
        w.add_file("lib64/README", Metadata::file(), &b"readme"[..])
            .unwrap();
        w.add_symlink("lib", Metadata::file(), "lib64").unwrap();
        w.add_dir("pkgconfig", Metadata::dir()).unwrap();
        w.add_file("pkgconfig/zlib.pc", Metadata::file(), &b"Name: zlib"[..])
            .unwrap();
    })
}

#[test]
fn stat_follows_symlinks_lstat_does_not() {
    let archive = sample_tree();

    let st = archive.stat("lib").unwrap();
    assert!(st.is_dir());

    let lst = archive.lstat("lib").unwrap();
    assert!(!lst.is_dir());
    assert!(lst.is_symlink());
    assert_eq!(lst.size(), 5);

    assert_eq!(archive.read_link("lib").unwrap(), "lib64");
    assert_eq!(
        archive.read_link("include").unwrap_err().kind(),
        ErrorKind::Lookup
    );
}

#[test]
fn resolution_through_symlinks() {
    let archive = sample_tree();

    assert_eq!(archive.read_file("lib/libz.so").unwrap(), b"ELF so");
    let info = archive.stat("lib/libz.a").unwrap();
    assert_eq!(info.size(), 7);
}

#[test]
fn not_a_directory_kind() {
    let archive = sample_tree();

    let err = archive.read_file("pkgconfig/zlib.pc/foo").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    let message = err.to_string();
    assert!(message.contains("not a directory"), "{}", message);
    assert!(message.contains("pkgconfig/zlib.pc/foo"), "{}", message);
}

#[test]
fn not_found_kind() {
    let archive = sample_tree();

    let err = archive.stat("include/missing.h").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(err.is_not_found());

    let err = archive.read_file("nonexistent/file.txt").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
}

#[test]
fn invalid_paths_are_rejected() {
    let archive = sample_tree();

    for path in ["..", "a/../b", "/abs", "trailing/", "", "a//b"] {
        let err = archive.stat(path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup, "path {:?}", path);
    }
}

#[test]
fn symlink_loop_hits_redirect_budget() {
    let archive = sample_tree();

    // Each `lib` hop rewrites the remaining path through the symlink; fifty
    // of them exhaust the 40-redirect budget before anything resolves.
    let path = format!("{}libz.a", "lib/../".repeat(50));
    let err = archive.find_inode(&path, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(
        err.to_string().contains("too many levels of symbolic links"),
        "{}",
        err
    );
}

#[test]
fn symlink_chain_depth_budget() {
    let archive = build_archive(131_072, |w| {
        w.add_file("target", Metadata::file(), &b"the end"[..]).unwrap();
        w.add_symlink("link01", Metadata::file(), "target").unwrap();
        for i in 2..=41 {
            w.add_symlink(
                &format!("link{:02}", i),
                Metadata::file(),
                format!("link{:02}", i - 1),
            )
            .unwrap();
        }
    });

    // 40 hops resolve; the 41st exceeds the budget
    let inode = archive.find_inode("link40", true).unwrap();
    assert!(inode.is_file());
    assert_eq!(archive.read_file("link40").unwrap(), b"the end");

    let err = archive.find_inode("link41", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert!(err.to_string().contains("too many levels"), "{}", err);

    // Without following, the final symlink itself comes back
    assert!(archive.find_inode("link41", false).unwrap().is_symlink());
}

#[test]
fn empty_and_absolute_symlink_targets_are_invalid() {
    let archive = build_archive(131_072, |w| {
        w.add_symlink("absolute", Metadata::file(), "/etc/passwd").unwrap();
        w.add_dir("d", Metadata::dir()).unwrap();
    });

    let err = archive.find_inode("absolute", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);

    // Unfollowed, it is readable as a symlink
    assert_eq!(archive.read_link("absolute").unwrap(), "/etc/passwd");
}

#[test]
fn glob_matches_shell_patterns() {
    let archive = sample_tree();

    assert_eq!(archive.glob("lib/*.so").unwrap(), vec!["lib/libz.so"]);
    assert_eq!(
        archive.glob("lib64/libz.*").unwrap(),
        vec!["lib64/libz.a", "lib64/libz.so"]
    );
    assert_eq!(
        archive.glob("*/zlib.h").unwrap(),
        vec!["include/zlib.h"]
    );
    assert!(archive.glob("lib/*.dylib").unwrap().is_empty());
    assert!(archive.glob("nosuchdir/*").unwrap().is_empty());

    // literal patterns act as existence checks
    assert_eq!(
        archive.glob("pkgconfig/zlib.pc").unwrap(),
        vec!["pkgconfig/zlib.pc"]
    );
    assert!(archive.glob("pkgconfig/zlib.nope").unwrap().is_empty());
}

#[test]
fn sub_scopes_the_facade() {
    let archive = sample_tree();

    let include = archive.sub("include").unwrap();
    assert_eq!(include.read_file("zlib.h").unwrap(), b"/* zlib */");
    assert_eq!(include.read_dir(".").unwrap().count(), 1);

    // Paths cannot escape the scoped view
    assert!(include.read_file("../lib64/libz.a").is_err());

    // sub of a file is refused
    let err = archive.sub("pkgconfig/zlib.pc").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lookup);
}

#[test]
fn find_inode_skips_validation_but_walks_correctly() {
    let archive = sample_tree();

    // `..` climbs, `.` is a no-op, extra slashes collapse
    let inode = archive.find_inode("include/../lib64/./libz.a", true).unwrap();
    assert!(inode.is_file());

    // climbing above the root stays at the root
    let inode = archive.find_inode("../../include/zlib.h", true).unwrap();
    assert!(inode.is_file());
}

#[test]
fn unsupported_compression_is_a_capability_error() {
    use sqfs::compression::Kind;
    use sqfs::write::WriterBuilder;
    use std::sync::Arc;

    let sink = Arc::new(sqfs::MemBuffer::new());
    let mut writer = WriterBuilder::new()
        .build(Box::new(Arc::clone(&sink)))
        .unwrap();
    let err = writer.set_compression(Kind::Zstd).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
}

#[test]
fn inode_numbers_without_export_table() {
    let archive = sample_tree();

    // The root is always reachable by number
    let root = archive.root().unwrap();
    assert!(archive.inode_by_number(root.inode_number()).unwrap().is_dir());

    // A cached child becomes reachable after a lookup resolves it
    let file = archive.find_inode("include/zlib.h", true).unwrap();
    let again = archive.inode_by_number(file.inode_number()).unwrap();
    assert_eq!(again.inode_number(), file.inode_number());

    // Never-resolved numbers fail as unexported (no export table written)
    let err = archive.inode_by_number(9999).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capability);
}
