//! Reading squashfs archives.
//!
//! [`Archive`] is the entry point: it owns a positioned reader, validates the
//! superblock, and exposes filesystem-shaped operations (`open`, `stat`,
//! `read_dir`, `read_link`, `glob`, `sub`). An archive is cheap to clone and
//! clones share the underlying reader, so independent readers can work on the
//! same image concurrently; the only shared mutable state is the inode
//! reference cache, guarded by a read-write lock.

mod dir;
mod file;
mod glob;
mod inode;
mod metastream;
mod path;

pub use dir::{DirEntry, ReadDir};
pub use file::{File, FileContent};
pub use inode::Inode;
pub use path::MAX_SYMLINK_DEPTH;

pub(crate) use path::valid_path as valid_archive_path;

use bstr::{BStr, BString, ByteSlice};
use parking_lot::RwLock;
use positioned_io::{RandomAccessFile, ReadAt};
use slog::{debug, info, o, warn, Logger};
use snafu::ResultExt;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use repr::inode::Kind;
use repr::superblock::{Superblock, TABLE_ABSENT};
use repr::{Mode, Order};

use crate::compression::{Codec, Registry};
use crate::errors::{
    with_op, ErrorInner, Result, UnableToOpenSnafu,
};
use crate::read::metastream::MetaReader;

/// Shared state behind every clone of an [`Archive`]
pub(crate) struct ArchiveInner<R> {
    reader: R,
    pub(crate) superblock: Superblock,
    pub(crate) order: Order,
    pub(crate) codec: Arc<dyn Codec>,
    id_table: Vec<u32>,
    /// inode number -> inode reference, filled as lookups resolve entries.
    /// Purely a performance aid: contents are reconstructible from the
    /// export table when one exists.
    inode_cache: RwLock<HashMap<u32, repr::inode::Ref>>,
    root_ino_number: u32,
    logger: Logger,
}

impl<R: ReadAt> ArchiveInner<R> {
    /// Positioned read that treats short reads as corruption
    pub(crate) fn read_exact_at(&self, mut pos: u64, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self
                .reader
                .read_at(pos, buf)
                .map_err(|source| ErrorInner::Io { source })?;
            if n == 0 {
                return Err(ErrorInner::UnexpectedEof.into());
            }
            pos += n as u64;
            let rest = buf;
            buf = &mut rest[n..];
        }
        Ok(())
    }

    /// Decode the inode an entry refers to, remembering the reference for
    /// number-based lookups
    pub(crate) fn inode_for_entry(&self, entry: &DirEntry) -> Result<Inode> {
        let inode = Inode::read_at_ref(self, entry.inode_ref())?;
        self.inode_cache.write().insert(inode.ino, entry.inode_ref());
        Ok(inode)
    }
}

/// A read-only squashfs 4.0 archive.
///
/// All operations take `&self`; clones share the reader and cache. Paths are
/// unrooted (`"etc/hosts"`, `"."` for the root), and every facade call tags
/// its errors with the operation and path that failed.
pub struct Archive<R> {
    inner: Arc<ArchiveInner<R>>,
    root: repr::inode::Ref,
}

impl<R> Clone for Archive<R> {
    fn clone(&self) -> Self {
        Archive {
            inner: Arc::clone(&self.inner),
            root: self.root,
        }
    }
}

fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

impl Archive<RandomAccessFile> {
    /// Open an archive from a filesystem path
    pub fn open<P: AsRef<Path>>(p: P) -> Result<Self> {
        Archive::open_with_logger(p, crate::default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(p: P, logger: Logger) -> Result<Self> {
        Self::_open_with_logger(p.as_ref(), logger)
    }

    fn _open_with_logger(path: &Path, logger: Logger) -> Result<Self> {
        let path_str = path.display().to_string();
        let logger = logger.new(o!("file" => path_str));
        let file = RandomAccessFile::open(path).context(UnableToOpenSnafu { path })?;
        Self::with_options(file, &Registry::default(), logger)
    }
}

impl<R: ReadAt> Archive<R> {
    /// Open an archive over any positioned reader
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, &Registry::default(), crate::default_logger())
    }

    pub fn with_logger(reader: R, logger: Logger) -> Result<Self> {
        Self::with_options(reader, &Registry::default(), logger)
    }

    /// Open with an explicit codec registry, for archives using pluggable
    /// compression
    pub fn with_options(reader: R, registry: &Registry, logger: Logger) -> Result<Self> {
        let mut head = [0u8; repr::superblock::SIZE];
        read_exact_at_raw(&reader, 0, &mut head)?;

        let order = match &head[..4] {
            b"hsqs" => Order::Little,
            b"sqsh" => Order::Big,
            _ => {
                return Err(ErrorInner::BadMagic {
                    magic: u32::from_le_bytes([head[0], head[1], head[2], head[3]]),
                }
                .into())
            }
        };

        let superblock = Superblock::read_from(&mut &head[..], order)
            .map_err(|source| ErrorInner::Io { source })?;

        info!(logger, "read superblock";
            "inode_count" => superblock.inode_count,
            "modification_time" => superblock.modification_time,
            "block_size" => superblock.block_size,
            "fragment_entry_count" => superblock.fragment_entry_count,
            "compression_id" => %superblock.compression_id,
            "block_log" => superblock.block_log,
            "flags" => ?superblock.flags,
            "id_count" => superblock.id_count,
            "version" => format!("{}.{}", superblock.version_major, superblock.version_minor),
            "root_inode_ref" => ?superblock.root_inode_ref,
            "bytes_used" => superblock.bytes_used,
        );

        if superblock.version_major != repr::superblock::VERSION_MAJOR
            || superblock.version_minor != repr::superblock::VERSION_MINOR
        {
            return Err(ErrorInner::BadVersion {
                major: superblock.version_major,
                minor: superblock.version_minor,
            }
            .into());
        }
        if !superblock.block_size.is_power_of_two()
            || superblock.block_size < repr::BLOCK_SIZE_MIN
            || superblock.block_size > repr::BLOCK_SIZE_MAX
        {
            return Err(ErrorInner::OutOfRangeBlockSize {
                actual: superblock.block_size,
            }
            .into());
        }
        if superblock.block_log > repr::BLOCK_LOG_MAX
            || 1u32 << superblock.block_log != superblock.block_size
        {
            return Err(ErrorInner::CorruptBlockSizes {
                block_log: superblock.block_log,
                block_size: superblock.block_size,
            }
            .into());
        }

        let codec = registry.get(superblock.compression_id).ok_or(
            ErrorInner::UnsupportedCompression {
                id: superblock.compression_id,
            },
        )?;

        if superblock
            .flags
            .contains(repr::superblock::Flags::COMPRESSOR_OPTIONS)
        {
            // Options only tune the compressor; the registry codec has to
            // cope without them.
            warn!(logger, "archive carries compressor options; ignoring them");
        }

        let mut inner = ArchiveInner {
            reader,
            superblock,
            order,
            codec,
            id_table: Vec::new(),
            inode_cache: RwLock::new(HashMap::new()),
            root_ino_number: 0,
            logger,
        };

        inner.id_table = load_id_table(&inner)?;

        let root = Inode::read_at_ref(&inner, superblock.root_inode_ref)?;
        inner.root_ino_number = root.ino;

        Ok(Archive {
            inner: Arc::new(inner),
            root: superblock.root_inode_ref,
        })
    }

    /// The decoded superblock
    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    /// The root directory of this archive view
    pub fn root(&self) -> Result<Inode> {
        Inode::read_at_ref(&self.inner, self.root)
    }

    /// Resolve a UID/GID table index
    pub fn id(&self, idx: u16) -> Option<u32> {
        self.inner.id_table.get(usize::from(idx)).copied()
    }

    /// Walk `path` from this view's root. Unlike the facade operations this
    /// performs no path validation; `..` climbs and symlinks are traversed
    /// with the usual redirect budget, with `follow_last` deciding whether a
    /// final symlink is dereferenced.
    pub fn find_inode(&self, path: &str, follow_last: bool) -> Result<Inode> {
        self.resolve(path, follow_last).map(|(inode, _)| inode)
    }

    fn resolve(&self, path: &str, follow_last: bool) -> Result<(Inode, repr::inode::Ref)> {
        let root = (self.root()?, self.root);
        path::resolve(&self.inner, root, path, follow_last)
    }

    fn resolve_valid(
        &self,
        path: &str,
        follow_last: bool,
    ) -> Result<(Inode, repr::inode::Ref)> {
        if !path::valid_path(path) {
            return Err(ErrorInner::InvalidPath.into());
        }
        self.resolve(path, follow_last)
    }

    /// Open a file or directory for reading
    pub fn open(&self, path: &str) -> Result<Node<R>> {
        with_op(self._open(path), "open", path)
    }

    fn _open(&self, path: &str) -> Result<Node<R>> {
        let (inode, _) = self.resolve_valid(path, true)?;
        let info = self.file_info(base_name(path), &inode);
        if inode.is_dir() {
            Ok(Node::Dir(DirHandle {
                archive: self.clone(),
                inode,
                info,
            }))
        } else {
            let content = FileContent::new(Arc::clone(&self.inner), &inode);
            Ok(Node::File(File::new(content, info)))
        }
    }

    /// `stat` follows symlinks to the final target
    pub fn stat(&self, path: &str) -> Result<FileInfo> {
        with_op(self._stat(path, true), "stat", path)
    }

    /// `lstat` reports the final component itself, symlink or not
    pub fn lstat(&self, path: &str) -> Result<FileInfo> {
        with_op(self._stat(path, false), "lstat", path)
    }

    fn _stat(&self, path: &str, follow_last: bool) -> Result<FileInfo> {
        let (inode, _) = self.resolve_valid(path, follow_last)?;
        Ok(self.file_info(base_name(path), &inode))
    }

    /// The target text of a symlink
    pub fn read_link(&self, path: &str) -> Result<BString> {
        with_op(self._read_link(path), "readlink", path)
    }

    fn _read_link(&self, path: &str) -> Result<BString> {
        let (inode, _) = self.resolve_valid(path, false)?;
        inode.readlink().map(BString::from)
    }

    /// Iterate the entries of a directory
    pub fn read_dir(&self, path: &str) -> Result<ReadDir<'_, R>> {
        with_op(self._read_dir(path), "readdir", path)
    }

    fn _read_dir(&self, path: &str) -> Result<ReadDir<'_, R>> {
        let (inode, _) = self.resolve_valid(path, true)?;
        if !inode.is_dir() {
            return Err(ErrorInner::NotADirectory.into());
        }
        ReadDir::new(&self.inner, &inode)
    }

    /// Decode the inode a directory entry points at
    pub fn inode_for(&self, entry: &DirEntry) -> Result<Inode> {
        self.inner.inode_for_entry(entry)
    }

    /// Stat an entry yielded by [`read_dir`](Self::read_dir)
    pub fn entry_info(&self, entry: &DirEntry) -> Result<FileInfo> {
        let inode = self.inner.inode_for_entry(entry)?;
        Ok(FileInfo::new(entry.name().to_owned(), &inode, &self.inner))
    }

    /// Read a whole file into memory
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        with_op(self._read_file(path), "open", path)
    }

    fn _read_file(&self, path: &str) -> Result<Vec<u8>> {
        let (inode, _) = self.resolve_valid(path, true)?;
        if !inode.is_file() {
            return Err(ErrorInner::InvalidPath.into());
        }
        let content = FileContent::new(Arc::clone(&self.inner), &inode);
        let mut out = vec![0u8; content.size() as usize];
        let mut filled = 0usize;
        while filled < out.len() {
            let n = content.read_at(&mut out[filled..], filled as u64)?;
            if n == 0 {
                return Err(ErrorInner::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(out)
    }

    /// A view of the archive scoped to a subdirectory. The returned archive
    /// shares the reader and cache; its root is the named directory.
    pub fn sub(&self, path: &str) -> Result<Archive<R>> {
        with_op(self._sub(path), "sub", path)
    }

    fn _sub(&self, path: &str) -> Result<Archive<R>> {
        let (inode, inode_ref) = self.resolve_valid(path, true)?;
        if !inode.is_dir() {
            return Err(ErrorInner::NotADirectory.into());
        }
        Ok(Archive {
            inner: Arc::clone(&self.inner),
            root: inode_ref,
        })
    }

    /// All paths matching a shell-style pattern, one pattern component per
    /// directory level. Results come back in directory order, which squashfs
    /// keeps sorted.
    pub fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        with_op(self._glob(pattern), "glob", pattern)
    }

    fn _glob(&self, pattern: &str) -> Result<Vec<String>> {
        if !glob::has_meta(pattern) {
            return Ok(match self._stat(pattern, true) {
                Ok(_) => vec![pattern.to_string()],
                Err(_) => Vec::new(),
            });
        }
        let components: Vec<&str> = pattern.split('/').collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(ErrorInner::InvalidPath.into());
        }
        let mut out = Vec::new();
        self.glob_walk("", &components, &mut out)?;
        Ok(out)
    }

    fn glob_walk(&self, dir: &str, components: &[&str], out: &mut Vec<String>) -> Result<()> {
        let component = components[0];
        let rest = &components[1..];

        if !glob::has_meta(component) {
            let full = join_path(dir, component);
            if rest.is_empty() {
                if self._stat(&full, true).is_ok() {
                    out.push(full);
                }
            } else {
                self.glob_walk(&full, rest, out)?;
            }
            return Ok(());
        }

        let lookup_dir = if dir.is_empty() { "." } else { dir };
        let entries = match self._read_dir(lookup_dir) {
            Ok(entries) => entries,
            // A missing or non-directory prefix just contributes nothing
            Err(_) => return Ok(()),
        };
        let mut matched_dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if glob::component_match(component.as_bytes(), entry.name().as_bytes())? {
                let name = entry.name().to_str_lossy().into_owned();
                let full = join_path(dir, &name);
                if rest.is_empty() {
                    out.push(full);
                } else if entry.is_dir() {
                    matched_dirs.push(full);
                }
            }
        }
        // Recurse after the directory stream is drained
        for full in matched_dirs {
            self.glob_walk(&full, rest, out)?;
        }
        Ok(())
    }

    /// Look an inode up by number.
    ///
    /// Hits the reference cache first; misses fall back to the export table,
    /// and fail as unexported when the image carries none.
    pub fn inode_by_number(&self, inode_number: u32) -> Result<Inode> {
        if inode_number == self.inner.root_ino_number {
            return self.root();
        }

        if let Some(inode_ref) = self.inner.inode_cache.read().get(&inode_number).copied() {
            return Inode::read_at_ref(&self.inner, inode_ref);
        }

        if self.inner.superblock.export_table_start == TABLE_ABSENT {
            return Err(ErrorInner::InodeNotExported { inode_number }.into());
        }
        if inode_number == 0 || inode_number > self.inner.superblock.inode_count {
            return Err(ErrorInner::NotFound.into());
        }
        debug!(self.inner.logger, "inode cache miss, using export table";
            "inode_number" => inode_number);

        // Export entries are u64 inode references, 1024 per metadata block
        let index = u64::from(inode_number - 1);
        let pointer_pos = self.inner.superblock.export_table_start + (index / 1024) * 8;
        let mut raw = [0u8; 8];
        self.inner.read_exact_at(pointer_pos, &mut raw)?;
        let block_addr = self.inner.order.get_u64(&raw);

        let mut table =
            MetaReader::direct(&self.inner, block_addr, (index % 1024) as usize * 8)?;
        let entry = table.read_exact_bytes(8)?;
        let inode_ref = repr::inode::Ref(self.inner.order.get_u64(&entry));

        self.inner
            .inode_cache
            .write()
            .insert(inode_number, inode_ref);
        Inode::read_at_ref(&self.inner, inode_ref)
    }

    /// Build a [`FileInfo`] for an inode found under `name`
    fn file_info(&self, name: &str, inode: &Inode) -> FileInfo {
        FileInfo::new(BString::from(name), inode, &self.inner)
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Bootstrap positioned read used before an `ArchiveInner` exists
fn read_exact_at_raw<R: ReadAt>(reader: &R, mut pos: u64, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        let n = reader
            .read_at(pos, buf)
            .map_err(|source| ErrorInner::Io { source })?;
        if n == 0 {
            return Err(ErrorInner::UnexpectedEof.into());
        }
        pos += n as u64;
        let rest = buf;
        buf = &mut rest[n..];
    }
    Ok(())
}

/// Load the dense UID/GID array through its pointer table
fn load_id_table<R: ReadAt>(inner: &ArchiveInner<R>) -> Result<Vec<u32>> {
    let count = usize::from(inner.superblock.id_count);
    let mut ids = Vec::with_capacity(count);
    if count == 0 {
        return Ok(ids);
    }
    let mut reader = MetaReader::indirect(inner, inner.superblock.id_table_start, 0)?;
    for _ in 0..count {
        let id = inner
            .order
            .u32(&mut reader)
            .map_err(crate::errors::from_decode_io)?;
        ids.push(id);
    }
    Ok(ids)
}

/// Everything `stat` reports about one filesystem object
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: BString,
    size: u64,
    mode: Mode,
    mtime: i32,
    inode_number: u32,
    uid: u32,
    gid: u32,
    kind: Kind,
}

impl FileInfo {
    fn new<R>(name: BString, inode: &Inode, inner: &ArchiveInner<R>) -> Self {
        FileInfo {
            name,
            size: inode.size(),
            mode: inode.mode(),
            mtime: inode.mtime(),
            inode_number: inode.inode_number(),
            uid: inner
                .id_table
                .get(usize::from(inode.uid_idx()))
                .copied()
                .unwrap_or(0),
            gid: inner
                .id_table
                .get(usize::from(inode.gid_idx()))
                .copied()
                .unwrap_or(0),
            kind: inode.kind(),
        }
    }

    pub fn name(&self) -> &BStr {
        self.name.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Permission bits plus file type bits, rendered `-rwxr-xr-x` style by
    /// `Display` on [`Mode`]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Seconds since the epoch; signed 32 bits, good until 2038
    pub fn mtime(&self) -> i32 {
        self.mtime
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// An opened filesystem object: a seekable file or a listable directory
pub enum Node<R> {
    File(File<R>),
    Dir(DirHandle<R>),
}

impl<R: ReadAt> Node<R> {
    pub fn stat(&self) -> FileInfo {
        match self {
            Node::File(f) => f.stat(),
            Node::Dir(d) => d.stat(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    pub fn into_file(self) -> Option<File<R>> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }
}

impl<R: ReadAt> io::Read for Node<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Node::File(f) => io::Read::read(f, out),
            Node::Dir(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )),
        }
    }
}

/// An opened directory
pub struct DirHandle<R> {
    archive: Archive<R>,
    inode: Inode,
    info: FileInfo,
}

impl<R: ReadAt> DirHandle<R> {
    pub fn stat(&self) -> FileInfo {
        self.info.clone()
    }

    pub fn entries(&self) -> Result<ReadDir<'_, R>> {
        ReadDir::new(&self.archive.inner, &self.inode)
    }
}
