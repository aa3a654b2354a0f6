use std::io;

use crate::{inode, put_i16, put_u16, put_u32, Order};

/// Maximum number of entries a single directory header may cover
pub const MAX_ENTRIES_PER_HEADER: u32 = 256;

/// Bytes of virtual directory size the format reserves; an empty directory
/// has `file_size == 3` and no stored entries, and a reader stops as soon as
/// no more than this many bytes remain
pub const VIRTUAL_SIZE: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    /// One less than the number of entries following the header
    pub count: u32,
    /// Byte offset from the inode table start to the metadata block holding
    /// the inodes of the entries in this run
    pub start: u32,
    /// An arbitrary reference inode number.
    ///
    /// The entries that follow store their inode number as a difference to
    /// this. Typically inode numbers are allocated in a continuous sequence
    /// for all children of a directory and the header stores the first one.
    pub inode_number: u32,
}

impl Header {
    pub const SIZE: usize = 12;

    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Self> {
        Ok(Header {
            count: order.u32(r)?,
            start: order.u32(r)?,
            inode_number: order.u32(r)?,
        })
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u32(w, self.count)?;
        put_u32(w, self.start)?;
        put_u32(w, self.inode_number)?;
        Ok(())
    }
}

/// A directory entry.
///
/// An entry is followed by its name, `name_size + 1` bytes, no terminator.
///
/// The basic and extended directory inodes both carry a size field storing
/// the uncompressed size of all directory entries (including all headers)
/// belonging to the inode. That field bounds iteration; there is no entry
/// count for the directory as a whole.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Byte offset of the entry's inode within its decompressed metadata
    /// block
    pub offset: u16,
    /// The difference of this entry's inode number from the reference stored
    /// in the header
    pub inode_offset: i16,
    /// The inode kind.
    ///
    /// **For extended inodes, the corresponding basic kind is stored here**
    pub kind: inode::Kind,
    /// One less than the size of the entry name
    pub name_size: u16,
}

impl Entry {
    pub const SIZE: usize = 8;

    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Self> {
        Ok(Entry {
            offset: order.u16(r)?,
            inode_offset: order.i16(r)?,
            kind: inode::Kind(order.u16(r)?),
            name_size: order.u16(r)?,
        })
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u16(w, self.offset)?;
        put_i16(w, self.inode_offset)?;
        put_u16(w, self.kind.0)?;
        put_u16(w, self.name_size)?;
        Ok(())
    }
}

/// Longest index name accepted by the decoder
pub const INDEX_NAME_MAX: u32 = 256;

/// A directory index entry.
///
/// To speed up lookups in directories with many entries, the extended
/// directory inode stores an index table holding the location of each
/// directory header and the name of the first entry after it. The table is
/// sorted by name; the largest entry whose name compares `<=` the wanted name
/// is the seek hint.
///
/// An index entry is followed by its name, `name_size + 1` bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Index {
    /// Byte offset from the first directory header to the indexed header, as
    /// if the uncompressed directory data were laid out contiguously
    pub index: u32,
    /// Byte offset from the directory table start to the metadata block
    /// holding the indexed header
    pub start: u32,
    /// One less than the size of the entry name
    pub name_size: u32,
}

impl Index {
    pub const SIZE: usize = 12;

    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Self> {
        Ok(Index {
            index: order.u32(r)?,
            start: order.u32(r)?,
            name_size: order.u32(r)?,
        })
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u32(w, self.index)?;
        put_u32(w, self.start)?;
        put_u32(w, self.name_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let entry = Entry {
            offset: 96,
            inode_offset: -3,
            kind: inode::Kind::BASIC_SYMLINK,
            name_size: 6,
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Entry::SIZE);
        let decoded = Entry::read_from(&mut &buf[..], Order::Little).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn header_round_trip() {
        let header = Header {
            count: 255,
            start: 8192,
            inode_number: 1000,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Header::SIZE);
        let decoded = Header::read_from(&mut &buf[..], Order::Little).unwrap();
        assert_eq!(decoded, header);
    }
}
