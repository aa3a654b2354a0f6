//! File content access.
//!
//! A file's bytes are scattered across full data blocks, sparse holes and
//! possibly a tail-end fragment shared with other files. [`FileContent`]
//! composes them behind a positioned `read_at`; [`File`] adds a cursor on
//! top, giving the familiar `Read` + `Seek` shape.

use snafu::ResultExt;
use std::cmp;
use std::io;
use std::sync::Arc;

use positioned_io::ReadAt;

use repr::datablock::Size;
use repr::inode::FRAGMENT_NONE;

use crate::errors::{self, DecompressSnafu, ErrorInner, Result};
use crate::read::inode::{FileData, Inode, InodeData, FRAGMENT_SENTINEL};
use crate::read::metastream::MetaReader;
use crate::read::{ArchiveInner, FileInfo};

/// Random-access view of one file's contents
pub struct FileContent<R> {
    archive: Arc<ArchiveInner<R>>,
    data: FileData,
    block_size: u32,
}

impl<R: ReadAt> FileContent<R> {
    pub(crate) fn new(archive: Arc<ArchiveInner<R>>, inode: &Inode) -> Self {
        let block_size = archive.superblock.block_size;
        let data = match &inode.data {
            InodeData::File(f) => f.clone(),
            // Non-file inodes read as empty; stat still reflects the inode
            _ => FileData {
                start_block: 0,
                size: 0,
                sparse: 0,
                nlink: 1,
                frag_block: FRAGMENT_NONE,
                frag_offset: 0,
                xattr_idx: repr::inode::XATTR_NONE,
                blocks: Vec::new(),
                block_offsets: Vec::new(),
            },
        };
        FileContent {
            archive,
            data,
            block_size,
        }
    }

    /// Total file size in bytes
    pub fn size(&self) -> u64 {
        self.data.size
    }

    /// Read up to `out.len()` bytes at byte `offset`. Returns 0 only at or
    /// past end of file.
    ///
    /// Reads are pure over the archive bytes: any partition of a range reads
    /// back the same contents.
    pub fn read_at(&self, out: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.data.size {
            return Ok(0);
        }

        let wanted = cmp::min(out.len() as u64, self.data.size - offset) as usize;
        let out = &mut out[..wanted];

        let block_size = u64::from(self.block_size);
        let mut block = (offset / block_size) as usize;
        let mut skip = (offset % block_size) as usize;
        let mut copied = 0;

        while copied < wanted {
            if block >= self.data.blocks.len() {
                // Shorter block list than the size promises
                return Err(ErrorInner::UnexpectedEof.into());
            }
            let buf = self.load_block(block)?;
            if skip > buf.len() {
                return Err(ErrorInner::UnexpectedEof.into());
            }
            let available = &buf[skip..];
            let n = cmp::min(available.len(), wanted - copied);
            out[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;

            if n == 0 {
                return Err(ErrorInner::UnexpectedEof.into());
            }

            block += 1;
            skip = 0;
        }

        Ok(copied)
    }

    /// Decode one block's bytes: a hole, the tail-end fragment, or a regular
    /// data block
    fn load_block(&self, block: usize) -> Result<Vec<u8>> {
        let word = self.data.blocks[block];

        if word == FRAGMENT_SENTINEL {
            return self.load_fragment();
        }

        if Size(word).is_sparse() {
            return Ok(vec![0u8; self.block_size as usize]);
        }

        let size = Size(word);
        let disk_len = size.size() as usize;
        let mut raw = vec![0u8; disk_len];
        let pos = self.data.start_block + self.data.block_offsets[block];
        self.archive.read_exact_at(pos, &mut raw)?;

        if size.uncompressed() {
            Ok(raw)
        } else {
            self.archive
                .codec
                .decompress(&raw, self.block_size as usize)
                .context(DecompressSnafu)
                .map_err(Into::into)
        }
    }

    /// Look up this file's fragment entry and decode the fragment block,
    /// trimmed to start at this file's tail end
    fn load_fragment(&self) -> Result<Vec<u8>> {
        let archive = &*self.archive;
        let order = archive.order;
        let frag_index = self.data.frag_block;

        // Pointer table entry addressing the metadata block that holds this
        // fragment's entry
        let pointer_pos = archive.superblock.fragment_table_start
            + u64::from(frag_index / repr::fragment::ENTRIES_PER_BLOCK) * 8;
        let mut raw = [0u8; 8];
        archive.read_exact_at(pointer_pos, &mut raw)?;
        let block_addr = order.get_u64(&raw);

        let skip =
            (frag_index % repr::fragment::ENTRIES_PER_BLOCK) as usize * repr::fragment::ENTRY_SIZE;
        let mut table = MetaReader::direct(archive, block_addr, skip)?;
        let entry = repr::fragment::Entry::read_from(&mut table, order)
            .map_err(errors::from_decode_io)?;

        let disk_len = entry.size.size() as usize;
        let mut frag = vec![0u8; disk_len];
        archive.read_exact_at(entry.start, &mut frag)?;

        let mut frag = if entry.size.uncompressed() {
            frag
        } else {
            archive
                .codec
                .decompress(&frag, self.block_size as usize)
                .context(DecompressSnafu)?
        };

        let trim = self.data.frag_offset as usize;
        if trim > frag.len() {
            return Err(ErrorInner::UnexpectedEof.into());
        }
        frag.drain(..trim);
        Ok(frag)
    }
}

/// An open regular file: [`FileContent`] plus a seek cursor
pub struct File<R> {
    content: FileContent<R>,
    pos: u64,
    info: FileInfo,
}

impl<R: ReadAt> File<R> {
    pub(crate) fn new(content: FileContent<R>, info: FileInfo) -> Self {
        File {
            content,
            pos: 0,
            info,
        }
    }

    pub fn stat(&self) -> FileInfo {
        self.info.clone()
    }

    pub fn size(&self) -> u64 {
        self.content.size()
    }

    /// Positioned read; does not move the cursor
    pub fn read_at(&self, out: &mut [u8], offset: u64) -> Result<usize> {
        self.content.read_at(out, offset)
    }

    pub fn into_content(self) -> FileContent<R> {
        self.content
    }
}

impl<R: ReadAt> io::Read for File<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self
            .content
            .read_at(out, self.pos)
            .map_err(errors::into_io)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: ReadAt> io::Seek for File<R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(p) => Some(p),
            io::SeekFrom::End(delta) => self.content.size().checked_add_signed(delta),
            io::SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}
