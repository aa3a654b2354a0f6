//! Building squashfs archives.
//!
//! A [`Writer`] accumulates an in-memory tree of inodes ([`add`](Writer::add)
//! in parent-before-child order, the order a tree walk produces), then
//! [`finalize`](Writer::finalize) lays the archive out and writes it in one
//! pass: file data first, then the directory and inode tables (whose mutual
//! references are settled by [`layout`]), the id table, and finally the
//! superblock over the placeholder reserved at offset 0.
//!
//! `finalize` consumes the writer, so the add → finalize → closed lifecycle
//! is enforced by ownership: adding after finalize, or finalizing twice, does
//! not compile.

mod layout;
mod metablock_writer;
mod two_level;
mod uid_gid;

use bstr::BString;
use chrono::{DateTime, Utc};
use positioned_io::RandomAccessFile;
use slog::{info, o, warn, Logger};
use snafu::ResultExt;
use std::collections::HashMap;
use std::convert::TryInto;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, mem};

use repr::inode::Kind;
use repr::superblock::{Superblock, TABLE_ABSENT};
use repr::Mode;

use crate::compression::{self, Codec, Registry};
use crate::errors::{ErrorInner, Result, UnableToOpenSnafu};
use crate::sink::ImageSink;

const MODE_DEFAULT_DIRECTORY: Mode = Mode::O755;
const MODE_DEFAULT_FILE: Mode = Mode::O644;

/// Index of an item in the writer's inode arena
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ItemRef(pub(crate) usize);

/// One node of the in-memory tree. Parent and child links are arena indices;
/// the arena owns everything.
pub(crate) struct Item {
    pub(crate) name: BString,
    pub(crate) ino: u32,
    pub(crate) mode: Mode,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) mtime: i32,
    /// Basic kind at add time; directories may be promoted to `EXT_DIR`
    /// during layout
    pub(crate) kind: Kind,
    pub(crate) data: ItemData,
    pub(crate) parent: Option<ItemRef>,

    // File layout, filled while data blocks are written
    pub(crate) start_block: u64,
    pub(crate) file_size: u64,
    pub(crate) data_blocks: Vec<u32>,

    // Directory layout, filled by the layout passes
    pub(crate) dir_offset: u32,
    pub(crate) dir_body: Vec<u8>,
    pub(crate) dir_size: u32,
    pub(crate) dir_index: Vec<IndexEntry>,
    pub(crate) dir_ref_start: u32,
    pub(crate) dir_ref_offset: u16,
}

pub(crate) enum ItemData {
    Dir { children: Vec<ItemRef> },
    File { source: FileSource },
    Symlink { target: BString },
    BlockDev { rdev: u32 },
    CharDev { rdev: u32 },
    Fifo,
    Socket,
}

/// Directory index entry being assembled for an extended directory
pub(crate) struct IndexEntry {
    pub(crate) index: u32,
    pub(crate) start: u32,
    pub(crate) name: BString,
}

/// Where a regular file's bytes come from at finalize time
pub enum FileSource {
    /// Bytes already in memory
    Bytes(Vec<u8>),
    /// A host file opened and streamed at finalize
    Path(PathBuf),
    /// Any reader, drained at finalize
    Reader(Box<dyn Read + Send>),
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            FileSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Ownership and timestamps for an added entry
#[derive(Debug, Clone)]
pub struct Metadata {
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    /// Defaults to the archive's modification time
    pub modified_time: Option<DateTime<Utc>>,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            mode: MODE_DEFAULT_FILE,
            uid: 0,
            gid: 0,
            modified_time: None,
        }
    }
}

impl Metadata {
    pub fn dir() -> Self {
        Metadata {
            mode: MODE_DEFAULT_DIRECTORY,
            ..Default::default()
        }
    }

    pub fn file() -> Self {
        Metadata::default()
    }

    pub fn with_mode(mode: Mode) -> Self {
        Metadata {
            mode,
            ..Default::default()
        }
    }
}

/// What an added path is
pub enum Entry {
    Dir,
    File(FileSource),
    Symlink(BString),
    BlockDev(u32),
    CharDev(u32),
    Fifo,
    Socket,
}

enum Sink {
    /// Positioned writes; the superblock is patched in place at the end
    Positioned(Box<dyn ImageSink>),
    /// Everything buffered in memory (superblock space pre-reserved) and
    /// flushed to the sequential sink once, at finalize
    Buffered {
        out: Box<dyn io::Write + Send>,
        buf: Vec<u8>,
    },
}

/// Configuration for a [`Writer`]. Defaults: 128 KiB blocks, gzip, "now" as
/// the archive timestamp
#[derive(Clone)]
pub struct WriterBuilder {
    block_size: u32,
    compressor: compression::Kind,
    registry: Registry,
    modified_time: DateTime<Utc>,
    logger: Option<Logger>,
}

impl Default for WriterBuilder {
    fn default() -> Self {
        WriterBuilder {
            block_size: repr::BLOCK_SIZE_DEFAULT,
            compressor: compression::Kind::default(),
            registry: Registry::default(),
            modified_time: Utc::now(),
            logger: None,
        }
    }
}

impl WriterBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Panics unless `block_size` is a power of two between 4 KiB and 1 MiB
    pub fn set_block_size(&mut self, block_size: u32) -> &mut Self {
        if block_size < repr::BLOCK_SIZE_MIN
            || block_size > repr::BLOCK_SIZE_MAX
            || !block_size.is_power_of_two()
        {
            panic!(
                "block size must be a power of two between {} and {}",
                repr::BLOCK_SIZE_MIN,
                repr::BLOCK_SIZE_MAX
            );
        }
        self.block_size = block_size;
        self
    }

    pub fn set_compressor(&mut self, kind: compression::Kind) -> &mut Self {
        self.compressor = kind;
        self
    }

    /// Codecs to draw compressors from; defaults to the built-in registry
    pub fn set_registry(&mut self, registry: Registry) -> &mut Self {
        self.registry = registry;
        self
    }

    pub fn set_modification_time(&mut self, time: DateTime<Utc>) -> &mut Self {
        self.modified_time = time;
        self
    }

    pub fn set_logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = Some(logger);
        self
    }

    /// Create an archive file on disk and write through positioned I/O
    pub fn build_path<P: AsRef<Path>>(self, path: P) -> Result<Writer> {
        self._build_path(path.as_ref())
    }

    fn _build_path(mut self, path: &Path) -> Result<Writer> {
        let logger = self.logger.take().unwrap_or_else(crate::default_logger);
        let path_str = path.display().to_string();
        self.logger = Some(logger.new(o!("file" => path_str)));

        let file = fs::File::create(path).context(UnableToOpenSnafu { path })?;
        let file = RandomAccessFile::try_new(file).context(UnableToOpenSnafu { path })?;
        self.build(Box::new(file))
    }

    /// Write through any positioned sink
    pub fn build(self, sink: Box<dyn ImageSink>) -> Result<Writer> {
        self._build(Sink::Positioned(sink))
    }

    /// Write through a sequential sink; the whole image is buffered in
    /// memory until finalize
    pub fn build_buffered(self, out: Box<dyn io::Write + Send>) -> Result<Writer> {
        self._build(Sink::Buffered {
            out,
            // the superblock placeholder
            buf: vec![0u8; repr::superblock::SIZE],
        })
    }

    fn _build(self, sink: Sink) -> Result<Writer> {
        let logger = self.logger.unwrap_or_else(crate::default_logger);
        let codec = self.registry.get(self.compressor.id()).ok_or(
            ErrorInner::UnsupportedCompression {
                id: self.compressor.id(),
            },
        )?;

        let mtime = date_time_to_mtime(self.modified_time, &logger);

        let root = Item {
            name: BString::from(""),
            ino: 1,
            mode: MODE_DEFAULT_DIRECTORY,
            uid: 0,
            gid: 0,
            mtime,
            kind: Kind::BASIC_DIR,
            data: ItemData::Dir {
                children: Vec::new(),
            },
            parent: None,
            start_block: 0,
            file_size: 0,
            data_blocks: Vec::new(),
            dir_offset: 0,
            dir_body: Vec::new(),
            dir_size: 0,
            dir_index: Vec::new(),
            dir_ref_start: 0,
            dir_ref_offset: 0,
        };

        let mut uid_gids = uid_gid::Table::new();
        uid_gids.add(0);

        Ok(Writer {
            sink,
            offset: repr::superblock::SIZE as u64,
            block_size: self.block_size,
            compressor: self.compressor,
            codec,
            registry: self.registry,
            mtime,
            items: vec![root],
            by_path: HashMap::new(),
            uid_gids,
            source_root: None,
            logger,
        })
    }
}

/// Streams a squashfs image out of an in-memory tree
pub struct Writer {
    sink: Sink,
    offset: u64,
    block_size: u32,
    compressor: compression::Kind,
    codec: Arc<dyn Codec>,
    registry: Registry,
    mtime: i32,
    items: Vec<Item>,
    by_path: HashMap<String, ItemRef>,
    uid_gids: uid_gid::Table,
    source_root: Option<PathBuf>,
    logger: Logger,
}

impl Writer {
    /// Create an archive at `path` with default options
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Writer> {
        WriterBuilder::new().build_path(path)
    }

    /// Switch compression before finalize
    pub fn set_compression(&mut self, kind: compression::Kind) -> Result<()> {
        self.codec = self
            .registry
            .get(kind.id())
            .ok_or(ErrorInner::UnsupportedCompression { id: kind.id() })?;
        self.compressor = kind;
        Ok(())
    }

    /// Resolve relative [`FileSource::Path`] sources added from now on
    /// against this directory
    pub fn set_source_root<P: Into<PathBuf>>(&mut self, root: P) {
        self.source_root = Some(root.into());
    }

    /// Add one entry under its slash-separated archive path.
    ///
    /// The parent directory must have been added first (`"a"` before
    /// `"a/b"`), which is the order any tree walk yields. Adding `"."`
    /// updates the root directory's metadata instead of creating anything.
    pub fn add(&mut self, path: &str, metadata: Metadata, entry: Entry) -> Result<()> {
        let path = path.strip_prefix("./").unwrap_or(path);
        if path.is_empty() || path == "." {
            let root = &mut self.items[0];
            root.mode = metadata.mode & Mode::PERM_MASK;
            root.uid = metadata.uid;
            root.gid = metadata.gid;
            if let Some(time) = metadata.modified_time {
                root.mtime = date_time_to_mtime(time, &self.logger);
            }
            self.uid_gids.add(metadata.uid);
            self.uid_gids.add(metadata.gid);
            return Ok(());
        }

        if !crate::read::valid_archive_path(path) {
            return Err(ErrorInner::InvalidPath.into());
        }
        if self.by_path.contains_key(path) {
            return Err(ErrorInner::InvalidPath.into());
        }

        let (parent_path, name) = match path.rfind('/') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => ("", path),
        };
        let parent = if parent_path.is_empty() {
            ItemRef(0)
        } else {
            *self
                .by_path
                .get(parent_path)
                .ok_or_else(|| ErrorInner::ParentNotFound {
                    path: path.to_string(),
                })?
        };
        if !matches!(self.items[parent.0].data, ItemData::Dir { .. }) {
            return Err(ErrorInner::NotADirectory.into());
        }

        let (kind, data) = match entry {
            Entry::Dir => (
                Kind::BASIC_DIR,
                ItemData::Dir {
                    children: Vec::new(),
                },
            ),
            Entry::File(source) => {
                let source = self.anchor_source(source);
                (Kind::BASIC_FILE, ItemData::File { source })
            }
            Entry::Symlink(target) => (Kind::BASIC_SYMLINK, ItemData::Symlink { target }),
            Entry::BlockDev(rdev) => (Kind::BASIC_BLOCK_DEV, ItemData::BlockDev { rdev }),
            Entry::CharDev(rdev) => (Kind::BASIC_CHAR_DEV, ItemData::CharDev { rdev }),
            Entry::Fifo => (Kind::BASIC_FIFO, ItemData::Fifo),
            Entry::Socket => (Kind::BASIC_SOCKET, ItemData::Socket),
        };

        let default_mode = if kind == Kind::BASIC_DIR {
            MODE_DEFAULT_DIRECTORY
        } else {
            MODE_DEFAULT_FILE
        };
        let mode = if metadata.mode.permissions().is_empty() {
            default_mode
        } else {
            metadata.mode & Mode::PERM_MASK
        };

        self.uid_gids.add(metadata.uid);
        self.uid_gids.add(metadata.gid);

        let ino = (self.items.len() + 1) as u32;
        let mtime = metadata
            .modified_time
            .map(|time| date_time_to_mtime(time, &self.logger))
            .unwrap_or(self.mtime);

        let item_ref = ItemRef(self.items.len());
        self.items.push(Item {
            name: BString::from(name),
            ino,
            mode,
            uid: metadata.uid,
            gid: metadata.gid,
            mtime,
            kind,
            data,
            parent: Some(parent),
            start_block: 0,
            file_size: 0,
            data_blocks: Vec::new(),
            dir_offset: 0,
            dir_body: Vec::new(),
            dir_size: 0,
            dir_index: Vec::new(),
            dir_ref_start: 0,
            dir_ref_offset: 0,
        });
        self.by_path.insert(path.to_string(), item_ref);

        if let ItemData::Dir { children } = &mut self.items[parent.0].data {
            children.push(item_ref);
        }

        Ok(())
    }

    pub fn add_dir(&mut self, path: &str, metadata: Metadata) -> Result<()> {
        self.add(path, metadata, Entry::Dir)
    }

    pub fn add_file<B: Into<Vec<u8>>>(
        &mut self,
        path: &str,
        metadata: Metadata,
        contents: B,
    ) -> Result<()> {
        self.add(
            path,
            metadata,
            Entry::File(FileSource::Bytes(contents.into())),
        )
    }

    pub fn add_symlink<T: Into<BString>>(
        &mut self,
        path: &str,
        metadata: Metadata,
        target: T,
    ) -> Result<()> {
        self.add(path, metadata, Entry::Symlink(target.into()))
    }

    fn anchor_source(&self, source: FileSource) -> FileSource {
        match (&self.source_root, source) {
            (Some(root), FileSource::Path(p)) if p.is_relative() => {
                FileSource::Path(root.join(p))
            }
            (_, source) => source,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Positioned(sink) => {
                sink.write_all_at(self.offset, data)
                    .map_err(|source| ErrorInner::Io { source })?;
            }
            Sink::Buffered { buf, .. } => {
                buf.extend_from_slice(data);
            }
        }
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Chunk every file into data blocks, compress the ones that shrink, and
    /// write them out; records each file's start position and size list
    fn write_file_data(&mut self) -> Result<()> {
        for idx in 0..self.items.len() {
            let source = match &mut self.items[idx].data {
                ItemData::File { source } => {
                    mem::replace(source, FileSource::Bytes(Vec::new()))
                }
                _ => continue,
            };

            let data = match source {
                FileSource::Bytes(bytes) => bytes,
                FileSource::Path(path) => {
                    fs::read(&path).context(UnableToOpenSnafu { path })?
                }
                FileSource::Reader(mut reader) => {
                    let mut bytes = Vec::new();
                    reader
                        .read_to_end(&mut bytes)
                        .map_err(|source| ErrorInner::Io { source })?;
                    bytes
                }
            };

            self.items[idx].file_size = data.len() as u64;
            if data.is_empty() {
                continue;
            }

            self.items[idx].start_block = self.offset;
            let mut blocks = Vec::with_capacity(
                data.len() / self.block_size as usize + 1,
            );
            for block in data.chunks(self.block_size as usize) {
                let compressed = self
                    .codec
                    .compress(block)
                    .map_err(|source| ErrorInner::Io { source })?;
                if compressed.len() < block.len() {
                    self.write(&compressed)?;
                    blocks.push(repr::datablock::Size::new(compressed.len() as u32, false).0);
                } else {
                    self.write(block)?;
                    blocks.push(repr::datablock::Size::new(block.len() as u32, true).0);
                }
            }
            self.items[idx].data_blocks = blocks;
        }
        Ok(())
    }

    /// Sort every directory's children by name, the order the on-disk format
    /// requires
    fn sort_directories(&mut self) {
        for idx in 0..self.items.len() {
            let mut children = match &mut self.items[idx].data {
                ItemData::Dir { children } => mem::take(children),
                _ => continue,
            };
            children.sort_by(|a, b| self.items[a.0].name.cmp(&self.items[b.0].name));
            if let ItemData::Dir { children: slot } = &mut self.items[idx].data {
                *slot = children;
            }
        }
    }

    /// Write the archive: data was buffered per [`add`](Self::add), and this
    /// settles the layout, streams out every table, and commits the
    /// superblock. Consumes the writer; the image is complete when this
    /// returns.
    pub fn finalize(mut self) -> Result<()> {
        self.write_file_data()?;
        self.sort_directories();

        let mut items = mem::take(&mut self.items);
        let plan = layout::build(&mut items, &self.uid_gids, &self.codec)?;
        self.items = items;

        let directory_table_start = self.offset;
        self.write(&plan.dir_table)?;

        let inode_table_start = self.offset;
        self.write(&plan.inode_table)?;

        let (id_data, id_offsets) = self.uid_gids.encode(Some(Arc::clone(&self.codec)))?;
        let id_blocks_start = self.offset;
        self.write(&id_data)?;
        let id_table_start = self.offset;
        for rel in &id_offsets {
            let pointer = id_blocks_start + u64::from(*rel);
            self.write(&pointer.to_le_bytes())?;
        }

        let bytes_used = self.offset;

        let superblock = Superblock {
            magic: repr::superblock::MAGIC,
            inode_count: self.items.len().try_into().expect("too many inodes"),
            modification_time: self.mtime,
            block_size: self.block_size,
            fragment_entry_count: 0,
            compression_id: self.compressor.id(),
            block_log: self.block_size.trailing_zeros() as u16,
            flags: repr::superblock::Flags::empty(),
            id_count: self.uid_gids.len(),
            version_major: repr::superblock::VERSION_MAJOR,
            version_minor: repr::superblock::VERSION_MINOR,
            root_inode_ref: plan.root_ref,
            bytes_used,
            id_table_start,
            xattr_id_table_start: TABLE_ABSENT,
            inode_table_start,
            directory_table_start,
            fragment_table_start: TABLE_ABSENT,
            export_table_start: TABLE_ABSENT,
        };

        info!(self.logger, "finalizing archive";
            "inode_count" => superblock.inode_count,
            "bytes_used" => bytes_used,
            "compression" => %self.compressor,
            "block_size" => self.block_size,
        );

        let header = superblock.to_bytes();
        match &mut self.sink {
            Sink::Positioned(sink) => {
                sink.write_all_at(0, &header)
                    .map_err(|source| ErrorInner::Io { source })?;
                sink.flush().map_err(|source| ErrorInner::Io { source })?;
            }
            Sink::Buffered { out, buf } => {
                buf[..repr::superblock::SIZE].copy_from_slice(&header);
                out.write_all(buf)
                    .map_err(|source| ErrorInner::Io { source })?;
                out.flush().map_err(|source| ErrorInner::Io { source })?;
            }
        }

        Ok(())
    }
}

fn date_time_to_mtime(date_time: DateTime<Utc>, logger: &Logger) -> i32 {
    let seconds = date_time.timestamp();
    if seconds > i64::from(i32::MAX) {
        warn!(logger, "modification time beyond 2038, clamping"; "date" => %date_time);
        i32::MAX
    } else if seconds < 0 {
        warn!(logger, "modification time before the epoch, clamping"; "date" => %date_time);
        0
    } else {
        seconds as i32
    }
}
