//! Directory iteration and name lookup.
//!
//! A directory's listing is a run of headers, each followed by up to 256
//! entries whose inodes share a metadata block. The listing is bounded by the
//! byte size stored in the directory inode; iteration stops as soon as no
//! more than the 3 virtual bytes remain. Extended directories additionally
//! carry a sorted index used to jump close to a wanted name instead of
//! scanning from the start.

use bstr::{BStr, BString};
use positioned_io::ReadAt;

use repr::directory::VIRTUAL_SIZE;
use repr::inode::Kind;

use crate::errors::{self, ErrorInner, Result};
use crate::read::inode::{DirIndexEntry, Inode};
use crate::read::metastream::MetaReader;
use crate::read::ArchiveInner;

/// One directory entry: a name, the basic kind of the target, and the
/// reference resolving to the target's inode record
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: BString,
    kind: Kind,
    inode_ref: repr::inode::Ref,
    inode_number: u32,
}

impl DirEntry {
    pub fn name(&self) -> &BStr {
        self.name.as_ref()
    }

    /// The basic inode kind recorded in the directory entry
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub(crate) fn inode_ref(&self) -> repr::inode::Ref {
        self.inode_ref
    }
}

/// Streaming iterator over a directory's entries
pub struct ReadDir<'a, R> {
    reader: MetaReader<'a, R>,
    order: repr::Order,
    /// Listing bytes not yet consumed, counting the 3 virtual bytes
    remaining: u64,
    /// Entries left under the current header
    count: u32,
    start_block: u32,
    inode_number: u32,
}

impl<'a, R: ReadAt> ReadDir<'a, R> {
    /// Iterate `inode`'s listing from the beginning
    pub(crate) fn new(archive: &'a ArchiveInner<R>, inode: &Inode) -> Result<Self> {
        let dir = inode.dir_data()?;
        let reader = MetaReader::direct(
            archive,
            archive.superblock.directory_table_start + u64::from(dir.start_block),
            usize::from(dir.offset),
        )?;
        Ok(ReadDir {
            reader,
            order: archive.order,
            remaining: dir.size.into(),
            count: 0,
            start_block: 0,
            inode_number: 0,
        })
    }

    /// Re-anchor iteration at an index hint.
    ///
    /// Decompressed metadata blocks are 8 KiB, so the low 13 bits of the
    /// combined offset give the position within the first block after the
    /// jump; the hint's `index` has already been consumed from the listing.
    pub(crate) fn with_seek(
        archive: &'a ArchiveInner<R>,
        inode: &Inode,
        hint: &DirIndexEntry,
    ) -> Result<Self> {
        let dir = inode.dir_data()?;
        let skip = (usize::from(dir.offset) + hint.index as usize) & 0x1FFF;
        let reader = MetaReader::direct(
            archive,
            archive.superblock.directory_table_start + u64::from(hint.start),
            skip,
        )?;
        Ok(ReadDir {
            reader,
            order: archive.order,
            remaining: u64::from(dir.size).saturating_sub(hint.index.into()),
            count: 0,
            start_block: 0,
            inode_number: 0,
        })
    }

    fn consume(&mut self, bytes: u64) -> Result<()> {
        self.remaining = self
            .remaining
            .checked_sub(bytes)
            .ok_or(ErrorInner::UnexpectedEof)?;
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        // 3 == the smallest possible partial header: end of listing
        if self.remaining <= u64::from(VIRTUAL_SIZE) {
            return Ok(None);
        }

        if self.count == 0 {
            let header = repr::directory::Header::read_from(&mut self.reader, self.order)
                .map_err(errors::from_decode_io)?;
            self.consume(repr::directory::Header::SIZE as u64)?;
            self.count = header.count + 1;
            self.start_block = header.start;
            self.inode_number = header.inode_number;
        }

        // Some producers count listing sizes without the virtual bytes; a
        // header with no room left for an entry ends the listing.
        if self.remaining < repr::directory::Entry::SIZE as u64 {
            return Ok(None);
        }

        let raw = repr::directory::Entry::read_from(&mut self.reader, self.order)
            .map_err(errors::from_decode_io)?;
        let name_len = usize::from(raw.name_size) + 1;
        let name = self.reader.read_exact_bytes(name_len)?;
        self.consume((repr::directory::Entry::SIZE + name_len) as u64)?;
        self.count -= 1;

        Ok(Some(DirEntry {
            name: BString::from(name),
            kind: raw.kind,
            inode_ref: repr::inode::Ref::new(self.start_block, raw.offset),
            inode_number: self.inode_number.wrapping_add_signed(raw.inode_offset.into()),
        }))
    }
}

impl<R: ReadAt> Iterator for ReadDir<'_, R> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// The largest index entry whose name compares `<=` the wanted name, if the
/// directory carries an index
fn seek_hint<'i>(inode: &'i Inode, name: &[u8]) -> Option<&'i DirIndexEntry> {
    let dir = match inode.dir_data() {
        Ok(dir) => dir,
        Err(_) => return None,
    };
    let mut best = None;
    for entry in &dir.index {
        if entry.name.as_slice() <= name {
            best = Some(entry);
        } else {
            break;
        }
    }
    best
}

/// Find `name` in a directory.
///
/// Extended directories are entered through the index and scanned from the
/// hint; since entries are sorted, passing a larger name proves absence.
/// Directories without an index are scanned from the start.
pub(crate) fn lookup<R: ReadAt>(
    archive: &ArchiveInner<R>,
    inode: &Inode,
    name: &[u8],
) -> Result<Option<DirEntry>> {
    match seek_hint(inode, name) {
        Some(hint) => {
            let reader = ReadDir::with_seek(archive, inode, hint)?;
            for entry in reader {
                let entry = entry?;
                if entry.name.as_slice() == name {
                    return Ok(Some(entry));
                }
                if entry.name.as_slice() > name {
                    return Ok(None);
                }
            }
            Ok(None)
        }
        None => {
            let reader = ReadDir::new(archive, inode)?;
            for entry in reader {
                let entry = entry?;
                if entry.name.as_slice() == name {
                    return Ok(Some(entry));
                }
            }
            Ok(None)
        }
    }
}
