//! Metadata blocks
//!
//! Inode, directory, fragment, export and id tables are all stored as chains
//! of metadata blocks: up to 8 KiB of data, compressed as a unit, preceded on
//! disk by a u16 header. The highest bit of the header is set if the block is
//! stored uncompressed (this happens when the block grew under compression,
//! or when a superblock flag such as `UNCOMPRESSED_INODES` is set). The lower
//! 15 bits give the size of the block on disk, excluding the header.
//!
//! Neither the size on disk nor the decompressed size may exceed 8 KiB. Every
//! block of a section decompresses to exactly 8 KiB except the last one,
//! which may be shorter.

use std::io;

use crate::{put_u16, Order};

/// Decompressed size limit of a metadata block
pub const SIZE: usize = 8 * 1024;

pub const UNCOMPRESSED_FLAG: u16 = 0x8000;

/// The two-byte length prefix stored before a metadata block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header(pub u16);

impl Header {
    pub fn new(size: u16, compressed: bool) -> Self {
        debug_assert!(usize::from(size) <= SIZE);
        Self(size | (if compressed { 0 } else { UNCOMPRESSED_FLAG }))
    }

    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Self> {
        Ok(Header(order.u16(r)?))
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u16(w, self.0)
    }

    /// Whether the block data must be run through the decompressor
    pub fn compressed(self) -> bool {
        self.0 & UNCOMPRESSED_FLAG == 0
    }

    /// The size in bytes (on disk) of the following block data
    pub fn size(self) -> u16 {
        self.0 & !UNCOMPRESSED_FLAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bits() {
        let h = Header::new(4096, true);
        assert!(h.compressed());
        assert_eq!(h.size(), 4096);

        let h = Header::new(512, false);
        assert!(!h.compressed());
        assert_eq!(h.size(), 512);
        assert_eq!(h.0, 512 | UNCOMPRESSED_FLAG);
    }
}
