//! Compression algorithm identifiers

use std::fmt;

/// The compression algorithm id stored in the superblock
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Id(pub u16);

impl Id {
    pub const GZIP: Id = Id(1);
    pub const LZMA: Id = Id(2);
    pub const LZO: Id = Id(3);
    pub const XZ: Id = Id(4);
    pub const LZ4: Id = Id(5);
    pub const ZSTD: Id = Id(6);

    pub const MAX: Id = Id::ZSTD;
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Id::GZIP => f.write_str("gzip"),
            Id::LZMA => f.write_str("lzma"),
            Id::LZO => f.write_str("lzo"),
            Id::XZ => f.write_str("xz"),
            Id::LZ4 => f.write_str("lz4"),
            Id::ZSTD => f.write_str("zstd"),
            Id(other) => write!(f, "compression({})", other),
        }
    }
}
