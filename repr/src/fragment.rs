//! Fragment Table
//!
//! Tail ends of files smaller than a full data block are combined into
//! fragment blocks of at most `block_size` bytes. This table describes the
//! location and size of those fragment blocks, not the fragments within them.
//!
//! The table is stored in two levels: the fragment block entries live in
//! metadata blocks, and the file offsets of those metadata blocks are stored
//! at `fragment_table_start`. Each metadata block holds 512 entries (16 bytes
//! each), so there are `ceil(fragment_entry_count / 512)` metadata blocks and
//! the same number of u64 pointers.

use std::io;

use crate::datablock;
use crate::{put_u32, put_u64, Order};

/// Entries per fragment metadata block
pub const ENTRIES_PER_BLOCK: u32 = 512;

/// Encoded size of one entry
pub const ENTRY_SIZE: usize = 16;

pub use crate::datablock::Size;

/// Fragment block entry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The offset within the archive where the fragment block starts
    pub start: u64,
    /// Size word of the fragment block; same encoding as a data block size
    pub size: datablock::Size,
    /// Unused on disk
    pub unused: u32,
}

impl Entry {
    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Self> {
        Ok(Entry {
            start: order.u64(r)?,
            size: datablock::Size(order.u32(r)?),
            unused: order.u32(r)?,
        })
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u64(w, self.start)?;
        put_u32(w, self.size.0)?;
        put_u32(w, self.unused)?;
        Ok(())
    }
}
