use bitflags::bitflags;
use std::io;

use crate::{compression, inode, put_i32, put_u16, put_u32, put_u64, Order};

/// The magic constant which marks a squashfs archive.
///
/// Stored little endian this reads `hsqs`; a big endian archive reads `sqsh`.
pub const MAGIC: u32 = 0x7371_7368;

/// The supported major version of the squashfs archive metadata
pub const VERSION_MAJOR: u16 = 4;
/// The supported minor version of the squashfs archive metadata
pub const VERSION_MINOR: u16 = 0;

/// Size of the encoded superblock in bytes
pub const SIZE: usize = 96;

/// Offset sentinel for a table which is not present in the archive
pub const TABLE_ABSENT: u64 = !0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Must match [`MAGIC`] (`0x73717368`) to be considered a squashfs archive
    pub magic: u32,
    /// The number of inodes stored in the inode table
    pub inode_count: u32,
    /// The number of seconds (not counting leap seconds) since 00:00, Jan 1
    /// 1970 UTC when the archive was created (or last appended to).
    ///
    /// Signed 32 bits on disk, so the field overflows in 2038. The format
    /// requires it; nothing can be done here.
    pub modification_time: i32,
    /// The size of a data block in bytes. Must be a power of two between 4096
    /// and 1048576 (1 MiB)
    pub block_size: u32,
    /// The number of entries in the fragment table
    pub fragment_entry_count: u32,
    /// The ID of the compression algorithm used
    pub compression_id: compression::Id,
    /// The log2 of block_size. If block_size and block_log do not agree, the
    /// archive is considered corrupt
    pub block_log: u16,
    /// See [`Flags`]
    pub flags: Flags,
    /// The number of entries in the id lookup table
    pub id_count: u16,
    /// The major version of the squashfs file format. Should always equal
    /// [`VERSION_MAJOR`] (4)
    pub version_major: u16,
    /// The minor version of the squashfs file format. Should always equal
    /// [`VERSION_MINOR`] (0)
    pub version_minor: u16,
    /// A reference to the inode of the root directory of the archive
    pub root_inode_ref: inode::Ref,
    /// The number of bytes used by the archive. Because squashfs archives are
    /// often padded to 4KiB, this can be less than the file size
    pub bytes_used: u64,
    /// The byte offset at which the id table starts
    pub id_table_start: u64,
    /// The byte offset at which the xattr id table starts
    pub xattr_id_table_start: u64,
    /// The byte offset at which the inode table starts
    pub inode_table_start: u64,
    /// The byte offset at which the directory table starts
    pub directory_table_start: u64,
    /// The byte offset at which the fragment table starts
    pub fragment_table_start: u64,
    /// The byte offset at which the export table starts
    pub export_table_start: u64,
}

impl Superblock {
    /// Decode a superblock from the 96-byte header.
    ///
    /// The caller chooses the byte order from the raw magic bytes first (see
    /// [`Order`]); this only checks that the decoded magic agrees.
    pub fn read_from<R: io::Read>(r: &mut R, order: Order) -> io::Result<Superblock> {
        Ok(Superblock {
            magic: order.u32(r)?,
            inode_count: order.u32(r)?,
            modification_time: order.i32(r)?,
            block_size: order.u32(r)?,
            fragment_entry_count: order.u32(r)?,
            compression_id: compression::Id(order.u16(r)?),
            block_log: order.u16(r)?,
            flags: Flags::from_bits_truncate(order.u16(r)?),
            id_count: order.u16(r)?,
            version_major: order.u16(r)?,
            version_minor: order.u16(r)?,
            root_inode_ref: inode::Ref(order.u64(r)?),
            bytes_used: order.u64(r)?,
            id_table_start: order.u64(r)?,
            xattr_id_table_start: order.u64(r)?,
            inode_table_start: order.u64(r)?,
            directory_table_start: order.u64(r)?,
            fragment_table_start: order.u64(r)?,
            export_table_start: order.u64(r)?,
        })
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        put_u32(w, self.magic)?;
        put_u32(w, self.inode_count)?;
        put_i32(w, self.modification_time)?;
        put_u32(w, self.block_size)?;
        put_u32(w, self.fragment_entry_count)?;
        put_u16(w, self.compression_id.0)?;
        put_u16(w, self.block_log)?;
        put_u16(w, self.flags.bits())?;
        put_u16(w, self.id_count)?;
        put_u16(w, self.version_major)?;
        put_u16(w, self.version_minor)?;
        put_u64(w, self.root_inode_ref.0)?;
        put_u64(w, self.bytes_used)?;
        put_u64(w, self.id_table_start)?;
        put_u64(w, self.xattr_id_table_start)?;
        put_u64(w, self.inode_table_start)?;
        put_u64(w, self.directory_table_start)?;
        put_u64(w, self.fragment_table_start)?;
        put_u64(w, self.export_table_start)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SIZE);
        self.write_to(&mut buf).expect("vec write cannot fail");
        debug_assert_eq!(buf.len(), SIZE);
        buf
    }
}

bitflags! {
    #[derive(Default)]
    pub struct Flags: u16 {
        /// Inodes are stored uncompressed. For backward compatibility reasons,
        /// UID/GIDs are also stored uncompressed.
        const UNCOMPRESSED_INODES     = 1;
        /// Data is stored uncompressed
        const UNCOMPRESSED_DATA       = 1 << 1;
        /// Unused in squashfs 4+. Should always be unset
        const CHECK                   = 1 << 2;
        /// Fragments are stored uncompressed
        const UNCOMPRESSED_FRAGMENTS  = 1 << 3;
        /// Fragments are not used. Files smaller than the block size are
        /// stored in a full block.
        const NO_FRAGMENTS            = 1 << 4;
        /// If the last block of a file is smaller than the block size, it will
        /// be instead stored as a fragment
        const ALWAYS_FRAGMENTS        = 1 << 5;
        /// Identical files are recognized, and stored only once
        const DUPLICATES              = 1 << 6;
        /// Filesystem has support for export via NFS (the export table is
        /// populated)
        const EXPORTABLE              = 1 << 7;
        /// Xattrs are stored uncompressed
        const UNCOMPRESSED_XATTRS     = 1 << 8;
        /// Xattrs are not stored
        const NO_XATTRS               = 1 << 9;
        /// The compression options section is present
        const COMPRESSOR_OPTIONS      = 1 << 10;
        /// UID/GIDs are stored uncompressed.
        ///
        /// Note that the UNCOMPRESSED_INODES flag also has this effect.
        /// If that flag is set, this flag has no effect.
        const UNCOMPRESSED_IDS        = 1 << 11;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            magic: MAGIC,
            inode_count: 7,
            modification_time: 1_700_000_000,
            block_size: 131_072,
            fragment_entry_count: 0,
            compression_id: compression::Id::GZIP,
            block_log: 17,
            flags: Flags::empty(),
            id_count: 1,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            root_inode_ref: inode::Ref::new(0, 0),
            bytes_used: 4096,
            id_table_start: 4000,
            xattr_id_table_start: TABLE_ABSENT,
            inode_table_start: 96,
            directory_table_start: 2048,
            fragment_table_start: TABLE_ABSENT,
            export_table_start: TABLE_ABSENT,
        }
    }

    #[test]
    fn encoded_size_is_96() {
        assert_eq!(sample().to_bytes().len(), SIZE);
    }

    #[test]
    fn round_trip_little_endian() {
        let sb = sample();
        let bytes = sb.to_bytes();
        assert_eq!(&bytes[..4], b"hsqs");
        let decoded = Superblock::read_from(&mut &bytes[..], Order::Little).unwrap();
        assert_eq!(decoded, sb);
    }
}
