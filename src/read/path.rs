//! Slash-delimited path resolution with bounded symlink traversal.

use bstr::{BString, ByteSlice};
use positioned_io::ReadAt;

use crate::errors::{ErrorInner, Result};
use crate::read::dir;
use crate::read::inode::Inode;
use crate::read::ArchiveInner;

/// Redirect budget: resolving a path may traverse at most this many symlinks
pub const MAX_SYMLINK_DEPTH: u32 = 40;

/// The facade's path-validity predicate.
///
/// Valid paths are unrooted and slash-separated: `"."` for the root itself,
/// otherwise one or more non-empty components none of which is `.` or `..`.
pub(crate) fn valid_path(path: &str) -> bool {
    if path == "." {
        return true;
    }
    if path.is_empty() {
        return false;
    }
    path.split('/').all(|comp| !comp.is_empty() && comp != "." && comp != "..")
}

/// Walk `path` starting from `start`, resolving symlinks with a redirect
/// budget.
///
/// Returns the final inode together with its reference. When a non-final
/// component names a symlink, the target text is spliced in front of the
/// remaining path and walking continues from the directory containing the
/// symlink; the final component is only dereferenced when `follow_last` is
/// set. Absolute or empty symlink targets are rejected.
pub(crate) fn resolve<R: ReadAt>(
    archive: &ArchiveInner<R>,
    start: (Inode, repr::inode::Ref),
    path: &str,
    follow_last: bool,
) -> Result<(Inode, repr::inode::Ref)> {
    let (mut cur, mut cur_ref) = start.clone();
    let mut remaining = BString::from(if path == "." { "" } else { path });
    let mut redirects = MAX_SYMLINK_DEPTH;
    // Directories already descended through, so `..` can climb back without
    // needing an export table
    let mut parents: Vec<(Inode, repr::inode::Ref)> = Vec::new();

    loop {
        if remaining.is_empty() {
            return Ok((cur, cur_ref));
        }

        let (component, rest) = match remaining.find_byte(b'/') {
            Some(pos) => {
                let rest = BString::from(&remaining[pos + 1..]);
                let component = BString::from(&remaining[..pos]);
                (component, rest)
            }
            None => (std::mem::take(&mut remaining), BString::default()),
        };

        if component.is_empty() || component == "." {
            // doubled slash, leading slash, or a no-op component
            remaining = rest;
            continue;
        }

        if component == ".." {
            // In the walk root, `..` refers to the walk root itself
            let (p, p_ref) = parents.pop().unwrap_or_else(|| start.clone());
            cur = p;
            cur_ref = p_ref;
            remaining = rest;
            continue;
        }

        if !cur.is_dir() {
            return Err(ErrorInner::NotADirectory.into());
        }

        let entry = dir::lookup(archive, &cur, component.as_slice())?
            .ok_or(ErrorInner::NotFound)?;
        let inode = archive.inode_for_entry(&entry)?;
        let is_last = rest.is_empty();

        if inode.is_symlink() && (!is_last || follow_last) {
            if redirects == 0 {
                return Err(ErrorInner::TooManySymlinks.into());
            }
            redirects -= 1;

            let target = inode.readlink()?;
            if target.is_empty() || target.first() == Some(&b'/') {
                return Err(ErrorInner::InvalidPath.into());
            }

            // Splice the target in front of what is left, preserving the
            // slash that followed the symlink component, and keep walking
            // from the symlink's parent directory.
            let mut spliced = BString::from(target.to_vec());
            if !rest.is_empty() {
                spliced.push(b'/');
                spliced.extend_from_slice(&rest);
            }
            remaining = spliced;
            continue;
        }

        if is_last {
            return Ok((inode, entry.inode_ref()));
        }

        parents.push((cur, cur_ref));
        cur = inode;
        cur_ref = entry.inode_ref();
        remaining = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validity() {
        assert!(valid_path("."));
        assert!(valid_path("a"));
        assert!(valid_path("a/b/c"));
        assert!(!valid_path(""));
        assert!(!valid_path("/a"));
        assert!(!valid_path("a/"));
        assert!(!valid_path("a//b"));
        assert!(!valid_path(".."));
        assert!(!valid_path("a/../b"));
        assert!(!valid_path("./a"));
    }
}
