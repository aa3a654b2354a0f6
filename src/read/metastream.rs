//! The metadata-block stream reader.
//!
//! Inode, directory, fragment, id and export tables are chains of compressed
//! metadata blocks ([`repr::metablock`]). This reader presents such a chain
//! as one continuous byte stream, fetching and decompressing blocks as the
//! consumer drains them.

use snafu::ResultExt;
use std::cmp;
use std::io;

use positioned_io::ReadAt;

use crate::errors::{self, DecompressSnafu, ErrorInner, Result};
use crate::read::ArchiveInner;

/// How the next compressed block is located
enum Chain {
    /// Blocks follow each other directly; `next` is the absolute offset of
    /// the next block header
    Direct { next: u64 },
    /// An array of u64 block addresses; `cursor` is the absolute offset of
    /// the next pointer to follow
    Indirect { cursor: u64 },
}

/// A readable byte stream over a chain of metadata blocks
pub(crate) struct MetaReader<'a, R> {
    archive: &'a ArchiveInner<R>,
    chain: Chain,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a, R: ReadAt> MetaReader<'a, R> {
    /// Open a stream whose blocks are stored back to back starting at
    /// `start`. The first `skip` decompressed bytes are discarded, which is
    /// how the offset half of an inode reference is honored.
    pub(crate) fn direct(
        archive: &'a ArchiveInner<R>,
        start: u64,
        skip: usize,
    ) -> Result<Self> {
        Self::new(archive, Chain::Direct { next: start }, skip)
    }

    /// Open a stream addressed through an array of u64 block pointers
    /// starting at `table`
    pub(crate) fn indirect(
        archive: &'a ArchiveInner<R>,
        table: u64,
        skip: usize,
    ) -> Result<Self> {
        Self::new(archive, Chain::Indirect { cursor: table }, skip)
    }

    fn new(archive: &'a ArchiveInner<R>, chain: Chain, skip: usize) -> Result<Self> {
        let mut reader = MetaReader {
            archive,
            chain,
            buf: Vec::new(),
            pos: 0,
        };
        reader.fill()?;
        if skip > 0 {
            // Offsets into a stream always land inside the first block
            if skip > reader.buf.len() {
                return Err(ErrorInner::UnexpectedEof.into());
            }
            reader.pos = skip;
        }
        Ok(reader)
    }

    /// Fetch and decode the next block in the chain
    fn fill(&mut self) -> Result<()> {
        let order = self.archive.order;

        let block_offset = match self.chain {
            Chain::Direct { next } => next,
            Chain::Indirect { cursor } => {
                let mut raw = [0u8; 8];
                self.archive.read_exact_at(cursor, &mut raw)?;
                order.get_u64(&raw)
            }
        };

        let mut raw = [0u8; 2];
        self.archive.read_exact_at(block_offset, &mut raw)?;
        let header = repr::metablock::Header(order.get_u16(&raw));

        let size = usize::from(header.size());
        if size > repr::metablock::SIZE {
            return Err(ErrorInner::HugeMetablock { actual: size }.into());
        }

        let mut data = vec![0u8; size];
        self.archive.read_exact_at(block_offset + 2, &mut data)?;

        let data = if header.compressed() {
            let decoded = self
                .archive
                .codec
                .decompress(&data, repr::metablock::SIZE)
                .context(DecompressSnafu)?;
            if decoded.len() > repr::metablock::SIZE {
                return Err(ErrorInner::HugeMetablock {
                    actual: decoded.len(),
                }
                .into());
            }
            decoded
        } else {
            data
        };

        self.buf = data;
        self.pos = 0;

        match &mut self.chain {
            Chain::Direct { next } => *next = block_offset + 2 + size as u64,
            Chain::Indirect { cursor } => *cursor += 8,
        }

        Ok(())
    }

    /// Copy as many bytes as are available in the current block, fetching the
    /// next block only when the current one is drained
    pub(crate) fn read_some(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buf.len() {
            self.fill()?;
        }
        let n = cmp::min(out.len(), self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    pub(crate) fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read_some(&mut out[filled..])?;
            if n == 0 {
                return Err(ErrorInner::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(out)
    }
}

/// The field decoders in `repr` work over `io::Read`; crate errors tunnel
/// through and are recovered with [`errors::from_decode_io`]
impl<R: ReadAt> io::Read for MetaReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.read_some(out).map_err(errors::into_io)
    }
}
