//! Inode decoding.
//!
//! An inode record is located by a 64-bit reference (metadata block offset
//! within the inode table + byte offset within the decompressed block), and
//! starts with a 16-byte header shared by all fourteen variants. The decoder
//! dispatches on the type field and fills a variant payload; unknown type
//! values yield an inode with only the header populated, and callers must
//! check the kind before touching payload data.

use bstr::{BStr, BString};
use positioned_io::ReadAt;

use repr::inode::{Kind, FRAGMENT_NONE, SYMLINK_TARGET_MAX, XATTR_NONE};
use repr::Mode;

use crate::errors::{self, ErrorInner, Result};
use crate::read::metastream::MetaReader;
use crate::read::ArchiveInner;

/// A decoded inode
#[derive(Debug, Clone)]
pub struct Inode {
    pub(crate) kind: Kind,
    pub(crate) permissions: Mode,
    pub(crate) uid_idx: u16,
    pub(crate) gid_idx: u16,
    pub(crate) mtime: i32,
    pub(crate) ino: u32,
    pub(crate) data: InodeData,
}

#[derive(Debug, Clone)]
pub(crate) enum InodeData {
    Dir(DirData),
    File(FileData),
    Symlink(SymlinkData),
    Dev(DevData),
    Ipc(IpcData),
    /// Type value outside 1..=14; only the header fields are meaningful
    Unknown,
}

#[derive(Debug, Clone)]
pub(crate) struct DirData {
    /// Metadata block offset within the directory table
    pub start_block: u32,
    pub nlink: u32,
    /// Directory listing byte size, including the 3 virtual bytes
    pub size: u32,
    /// Offset of the listing within its decompressed block
    pub offset: u16,
    pub parent_ino: u32,
    /// Directory index, present only for extended directories
    pub index: Vec<DirIndexEntry>,
    pub xattr_idx: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct DirIndexEntry {
    /// Byte offset of the indexed header within this directory's listing
    pub index: u32,
    /// Metadata block offset within the directory table
    pub start: u32,
    /// Name of the first entry after the indexed header
    pub name: BString,
}

#[derive(Debug, Clone)]
pub(crate) struct FileData {
    /// Absolute offset of the first data block
    pub start_block: u64,
    pub size: u64,
    pub sparse: u64,
    pub nlink: u32,
    /// Fragment table index, [`FRAGMENT_NONE`] when the file has no tail end
    pub frag_block: u32,
    /// Offset of the tail end within its fragment block
    pub frag_offset: u32,
    pub xattr_idx: u32,
    /// Per-block size words. When the file ends in a fragment, a
    /// [`FRAGMENT_SENTINEL`] entry is appended in memory (never on disk) so
    /// the read loop can treat the tail end as one more block.
    pub blocks: Vec<u32>,
    /// Cumulative on-disk offset of each block relative to `start_block`
    pub block_offsets: Vec<u64>,
}

/// In-memory marker for "the end-of-file fragment goes here"
pub(crate) const FRAGMENT_SENTINEL: u32 = !0;

#[derive(Debug, Clone)]
pub(crate) struct SymlinkData {
    pub nlink: u32,
    pub target: BString,
    pub xattr_idx: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct DevData {
    pub nlink: u32,
    pub rdev: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct IpcData {
    pub nlink: u32,
}

impl Inode {
    /// Decode the inode record a reference points at
    pub(crate) fn read_at_ref<R: ReadAt>(
        archive: &ArchiveInner<R>,
        inode_ref: repr::inode::Ref,
    ) -> Result<Inode> {
        let order = archive.order;
        let block_size = archive.superblock.block_size;
        let start = archive.superblock.inode_table_start + u64::from(inode_ref.block_start());
        let mut r = MetaReader::direct(archive, start, usize::from(inode_ref.start_offset()))?;

        let header =
            repr::inode::Header::read_from(&mut r, order).map_err(errors::from_decode_io)?;

        let kind = header.inode_type;
        let data = match kind {
            Kind::BASIC_DIR => {
                let body = repr::inode::BasicDir::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                InodeData::Dir(DirData {
                    start_block: body.block_start,
                    nlink: body.hard_link_count,
                    size: body.file_size.into(),
                    offset: body.block_offset,
                    parent_ino: body.parent_inode_number,
                    index: Vec::new(),
                    xattr_idx: XATTR_NONE,
                })
            }
            Kind::EXT_DIR => {
                let body = repr::inode::ExtendedDir::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                let index = read_dir_index(&mut r, body.index_count, archive)?;
                InodeData::Dir(DirData {
                    start_block: body.block_start,
                    nlink: body.hard_link_count,
                    size: body.file_size,
                    offset: body.block_offset,
                    parent_ino: body.parent_inode_number,
                    index,
                    xattr_idx: body.xattr_idx,
                })
            }
            Kind::BASIC_FILE => {
                let body = repr::inode::BasicFile::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                let (blocks, block_offsets) = read_block_list(
                    &mut r,
                    archive,
                    body.file_size.into(),
                    body.fragment_block_index,
                    block_size,
                )?;
                InodeData::File(FileData {
                    start_block: body.blocks_start.into(),
                    size: body.file_size.into(),
                    sparse: 0,
                    nlink: 1,
                    frag_block: body.fragment_block_index,
                    frag_offset: body.fragment_offset,
                    xattr_idx: XATTR_NONE,
                    blocks,
                    block_offsets,
                })
            }
            Kind::EXT_FILE => {
                let body = repr::inode::ExtendedFile::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                let (blocks, block_offsets) = read_block_list(
                    &mut r,
                    archive,
                    body.file_size,
                    body.fragment_block_index,
                    block_size,
                )?;
                InodeData::File(FileData {
                    start_block: body.blocks_start,
                    size: body.file_size,
                    sparse: body.sparse,
                    nlink: body.hard_link_count,
                    frag_block: body.fragment_block_index,
                    frag_offset: body.fragment_offset,
                    xattr_idx: body.xattr_idx,
                    blocks,
                    block_offsets,
                })
            }
            Kind::BASIC_SYMLINK | Kind::EXT_SYMLINK => {
                let body = repr::inode::Symlink::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                if body.target_size > SYMLINK_TARGET_MAX {
                    return Err(ErrorInner::SymlinkTargetTooLong {
                        actual: body.target_size,
                    }
                    .into());
                }
                let target = r.read_exact_bytes(body.target_size as usize)?;
                let xattr_idx = if kind == Kind::EXT_SYMLINK {
                    order.u32(&mut r).map_err(errors::from_decode_io)?
                } else {
                    XATTR_NONE
                };
                InodeData::Symlink(SymlinkData {
                    nlink: body.hard_link_count,
                    target: BString::from(target),
                    xattr_idx,
                })
            }
            Kind::BASIC_BLOCK_DEV | Kind::BASIC_CHAR_DEV | Kind::EXT_BLOCK_DEV
            | Kind::EXT_CHAR_DEV => {
                let body = repr::inode::Device::read_from(&mut r, order)
                    .map_err(errors::from_decode_io)?;
                if kind.is_extended() {
                    // trailing xattr index, carried nowhere
                    let _ = order.u32(&mut r).map_err(errors::from_decode_io)?;
                }
                InodeData::Dev(DevData {
                    nlink: body.hard_link_count,
                    rdev: body.device,
                })
            }
            Kind::BASIC_FIFO | Kind::BASIC_SOCKET | Kind::EXT_FIFO | Kind::EXT_SOCKET => {
                let body =
                    repr::inode::Ipc::read_from(&mut r, order).map_err(errors::from_decode_io)?;
                if kind.is_extended() {
                    let _ = order.u32(&mut r).map_err(errors::from_decode_io)?;
                }
                InodeData::Ipc(IpcData {
                    nlink: body.hard_link_count,
                })
            }
            _ => InodeData::Unknown,
        };

        Ok(Inode {
            kind,
            permissions: header.permissions & Mode::PERM_MASK,
            uid_idx: header.uid_idx,
            gid_idx: header.gid_idx,
            mtime: header.modified_time,
            ino: header.inode_number,
            data,
        })
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn inode_number(&self) -> u32 {
        self.ino
    }

    /// Permission bits plus the type bits matching the inode kind
    pub fn mode(&self) -> Mode {
        self.permissions | Mode::from_kind(self.kind)
    }

    pub fn permissions(&self) -> Mode {
        self.permissions
    }

    /// Seconds since the epoch; signed 32 bits, good until 2038
    pub fn mtime(&self) -> i32 {
        self.mtime
    }

    pub fn uid_idx(&self) -> u16 {
        self.uid_idx
    }

    pub fn gid_idx(&self) -> u16 {
        self.gid_idx
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

    /// File byte size, directory listing size, or symlink target length
    pub fn size(&self) -> u64 {
        match &self.data {
            InodeData::File(f) => f.size,
            InodeData::Dir(d) => d.size.into(),
            InodeData::Symlink(s) => s.target.len() as u64,
            _ => 0,
        }
    }

    pub fn nlink(&self) -> u32 {
        match &self.data {
            InodeData::File(f) => f.nlink,
            InodeData::Dir(d) => d.nlink,
            InodeData::Symlink(s) => s.nlink,
            InodeData::Dev(d) => d.nlink,
            InodeData::Ipc(i) => i.nlink,
            InodeData::Unknown => 1,
        }
    }

    /// Device number for block/char device inodes
    pub fn rdev(&self) -> Option<u32> {
        match &self.data {
            InodeData::Dev(d) => Some(d.rdev),
            _ => None,
        }
    }

    /// Index into the xattr table, when the inode carries one
    pub fn xattr_index(&self) -> Option<u32> {
        let idx = match &self.data {
            InodeData::Dir(d) => d.xattr_idx,
            InodeData::File(f) => f.xattr_idx,
            InodeData::Symlink(s) => s.xattr_idx,
            _ => XATTR_NONE,
        };
        (idx != XATTR_NONE).then_some(idx)
    }

    /// Bytes an extended file inode saved by omitting zero blocks
    pub fn sparse_bytes(&self) -> u64 {
        match &self.data {
            InodeData::File(f) => f.sparse,
            _ => 0,
        }
    }

    /// Symlink target; fails for non-symlinks
    pub fn readlink(&self) -> Result<&BStr> {
        match &self.data {
            InodeData::Symlink(s) => Ok(s.target.as_ref()),
            _ => Err(ErrorInner::InvalidPath.into()),
        }
    }

    /// Inode number of the parent directory, for directory inodes
    pub fn parent_inode_number(&self) -> Option<u32> {
        match &self.data {
            InodeData::Dir(d) => Some(d.parent_ino),
            _ => None,
        }
    }

    pub(crate) fn dir_data(&self) -> Result<&DirData> {
        match &self.data {
            InodeData::Dir(d) => Ok(d),
            _ => Err(ErrorInner::NotADirectory.into()),
        }
    }
}

/// Decode a file inode's per-block size list and precompute the running
/// on-disk offsets so block lookup in the file reader is O(1)
fn read_block_list<R: ReadAt>(
    r: &mut MetaReader<'_, R>,
    archive: &ArchiveInner<R>,
    file_size: u64,
    frag_block: u32,
    block_size: u32,
) -> Result<(Vec<u32>, Vec<u64>)> {
    let block_size = u64::from(block_size);
    let mut count = file_size / block_size;
    if frag_block == FRAGMENT_NONE && file_size % block_size != 0 {
        count += 1;
    }

    let order = archive.order;
    let mut blocks = Vec::with_capacity(count as usize + 1);
    let mut offsets = Vec::with_capacity(count as usize + 1);
    let mut on_disk = 0u64;
    for _ in 0..count {
        let word = order.u32(r).map_err(errors::from_decode_io)?;
        blocks.push(word);
        offsets.push(on_disk);
        on_disk += u64::from(repr::datablock::Size(word).size());
    }

    if frag_block != FRAGMENT_NONE {
        // the tail end lives in a fragment block
        blocks.push(FRAGMENT_SENTINEL);
        offsets.push(on_disk);
    }

    Ok((blocks, offsets))
}

fn read_dir_index<R: ReadAt>(
    r: &mut MetaReader<'_, R>,
    index_count: u16,
    archive: &ArchiveInner<R>,
) -> Result<Vec<DirIndexEntry>> {
    let order = archive.order;
    let mut index = Vec::with_capacity(usize::from(index_count));
    for _ in 0..index_count {
        let raw = repr::directory::Index::read_from(r, order).map_err(errors::from_decode_io)?;
        let name_len = raw.name_size + 1;
        if name_len > repr::directory::INDEX_NAME_MAX {
            return Err(ErrorInner::DirIndexNameTooLong { actual: name_len }.into());
        }
        let name = r.read_exact_bytes(name_len as usize)?;
        index.push(DirIndexEntry {
            index: raw.index,
            start: raw.start,
            name: BString::from(name),
        });
    }
    Ok(index)
}
