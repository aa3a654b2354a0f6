//! On-disk representation of a SquashFS 4.0 archive.
//!
//! A squashfs filesystem consists of a maximum of nine parts, packed together
//! on a byte alignment:
//!
//! * [Superblock](superblock/index.html)
//! * Compression Options
//! * Datablocks & Fragments
//! * [Inode Table](inode/index.html)
//! * [Directory Table](directory/index.html)
//! * [Fragment Table](fragment/index.html)
//! * Export Table
//! * [UID/GID Lookup Table](uid_gid/index.html)
//! * Xattr Table
//!
//! All multi-byte fields are stored in the byte order selected by the
//! superblock magic (`hsqs` = little endian, `sqsh` = big endian). Decoding
//! therefore threads an [`Order`] through every table reader; encoding always
//! emits little endian, which is what every squashfs 4.0 producer writes.

use bitflags::bitflags;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use std::fmt;
use std::fmt::Write as _;
use std::io;

pub mod compression;
pub mod datablock;
pub mod directory;
pub mod fragment;
pub mod inode;
pub mod metablock;
pub mod superblock;
pub mod uid_gid;

pub const BLOCK_LOG_MIN: u16 = 12;
pub const BLOCK_LOG_MAX: u16 = 20;
pub const BLOCK_LOG_DEFAULT: u16 = 17;

pub const BLOCK_SIZE_MIN: u32 = 1 << BLOCK_LOG_MIN as u32;
pub const BLOCK_SIZE_MAX: u32 = 1 << BLOCK_LOG_MAX as u32;
pub const BLOCK_SIZE_DEFAULT: u32 = 1 << BLOCK_LOG_DEFAULT as u32;

/// Byte order of an archive, selected by the superblock magic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Order {
    Little,
    Big,
}

impl Default for Order {
    fn default() -> Self {
        Order::Little
    }
}

impl Order {
    pub fn u16<R: io::Read>(self, r: &mut R) -> io::Result<u16> {
        match self {
            Order::Little => r.read_u16::<LittleEndian>(),
            Order::Big => r.read_u16::<BigEndian>(),
        }
    }

    pub fn i16<R: io::Read>(self, r: &mut R) -> io::Result<i16> {
        match self {
            Order::Little => r.read_i16::<LittleEndian>(),
            Order::Big => r.read_i16::<BigEndian>(),
        }
    }

    pub fn u32<R: io::Read>(self, r: &mut R) -> io::Result<u32> {
        match self {
            Order::Little => r.read_u32::<LittleEndian>(),
            Order::Big => r.read_u32::<BigEndian>(),
        }
    }

    pub fn i32<R: io::Read>(self, r: &mut R) -> io::Result<i32> {
        match self {
            Order::Little => r.read_i32::<LittleEndian>(),
            Order::Big => r.read_i32::<BigEndian>(),
        }
    }

    pub fn u64<R: io::Read>(self, r: &mut R) -> io::Result<u64> {
        match self {
            Order::Little => r.read_u64::<LittleEndian>(),
            Order::Big => r.read_u64::<BigEndian>(),
        }
    }

    /// Decode a u16 from the start of a byte slice.
    pub fn get_u16(self, buf: &[u8]) -> u16 {
        match self {
            Order::Little => u16::from_le_bytes([buf[0], buf[1]]),
            Order::Big => u16::from_be_bytes([buf[0], buf[1]]),
        }
    }

    /// Decode a u64 from the start of a byte slice.
    pub fn get_u64(self, buf: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        match self {
            Order::Little => u64::from_le_bytes(raw),
            Order::Big => u64::from_be_bytes(raw),
        }
    }
}

// Encoding helpers. Archives are always produced little endian.
pub(crate) fn put_u16<W: io::Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<LittleEndian>(v)
}

pub(crate) fn put_i16<W: io::Write>(w: &mut W, v: i16) -> io::Result<()> {
    w.write_i16::<LittleEndian>(v)
}

pub(crate) fn put_u32<W: io::Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v)
}

pub(crate) fn put_i32<W: io::Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_i32::<LittleEndian>(v)
}

pub(crate) fn put_u64<W: io::Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

bitflags! {
    #[derive(Default)]
    pub struct Mode: u16 {
        const OTHER_EXEC =  0o000_001;
        const OTHER_WRITE = 0o000_002;
        const OTHER_READ =  0o000_004;
        const GROUP_EXEC =  0o000_010;
        const GROUP_WRITE = 0o000_020;
        const GROUP_READ =  0o000_040;
        const USER_EXEC =   0o000_100;
        const USER_WRITE =  0o000_200;
        const USER_READ =   0o000_400;
        const BIT_STICKY =  0o001_000;
        const BIT_SGID =    0o002_000;
        const BIT_SUID =    0o004_000;

        const TYPE_FIFO =   0o010_000;
        const TYPE_CHAR =   0o020_000;
        const TYPE_DIR  =   0o040_000;
        const TYPE_BLOCK =  0o060_000;
        const TYPE_FILE =   0o100_000;
        const TYPE_LINK =   0o120_000;
        const TYPE_SOCKET = 0o140_000;
    }
}

impl Mode {
    pub const O777: Mode = Mode { bits: 0o000_777 };
    pub const O755: Mode = Mode { bits: 0o000_755 };
    pub const O644: Mode = Mode { bits: 0o000_644 };
    pub const PERM_MASK: Mode = Mode { bits: 0o007_777 };
    pub const TYPE_MASK: Mode = Mode { bits: 0o170_000 };
    pub const NONE: Mode = Mode { bits: 0 };

    /// The permission and special bits, without the file type.
    pub fn permissions(self) -> Mode {
        self & Mode::PERM_MASK
    }

    /// The type bits matching an inode kind.
    pub fn from_kind(kind: inode::Kind) -> Mode {
        match kind.to_basic() {
            inode::Kind::BASIC_DIR => Mode::TYPE_DIR,
            inode::Kind::BASIC_FILE => Mode::TYPE_FILE,
            inode::Kind::BASIC_SYMLINK => Mode::TYPE_LINK,
            inode::Kind::BASIC_BLOCK_DEV => Mode::TYPE_BLOCK,
            inode::Kind::BASIC_CHAR_DEV => Mode::TYPE_CHAR,
            inode::Kind::BASIC_FIFO => Mode::TYPE_FIFO,
            inode::Kind::BASIC_SOCKET => Mode::TYPE_SOCKET,
            _ => Mode::NONE,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let type_char = match *self & Mode::TYPE_MASK {
            Mode::TYPE_DIR => 'd',
            Mode::TYPE_CHAR => 'c',
            Mode::TYPE_BLOCK => 'b',
            Mode::TYPE_FILE => '-',
            Mode::TYPE_LINK => 'l',
            Mode::TYPE_SOCKET => 's',
            Mode::TYPE_FIFO => 'p',
            _ => '?',
        };
        let user_r = if self.contains(Mode::USER_READ) {
            'r'
        } else {
            '-'
        };
        let user_w = if self.contains(Mode::USER_WRITE) {
            'w'
        } else {
            '-'
        };
        let user_x = match *self & (Mode::USER_EXEC | Mode::BIT_SUID) {
            Mode::NONE => '-',
            Mode::USER_EXEC => 'x',
            Mode::BIT_SUID => 'S',
            // Both
            _ => 's',
        };

        let group_r = if self.contains(Mode::GROUP_READ) {
            'r'
        } else {
            '-'
        };
        let group_w = if self.contains(Mode::GROUP_WRITE) {
            'w'
        } else {
            '-'
        };
        let group_x = match *self & (Mode::GROUP_EXEC | Mode::BIT_SGID) {
            Mode::NONE => '-',
            Mode::GROUP_EXEC => 'x',
            Mode::BIT_SGID => 'S',
            // Both
            _ => 's',
        };

        let other_r = if self.contains(Mode::OTHER_READ) {
            'r'
        } else {
            '-'
        };
        let other_w = if self.contains(Mode::OTHER_WRITE) {
            'w'
        } else {
            '-'
        };
        let other_x = match *self & (Mode::OTHER_EXEC | Mode::BIT_STICKY) {
            Mode::NONE => '-',
            Mode::OTHER_EXEC => 'x',
            Mode::BIT_STICKY => 'T',
            // Both
            _ => 't',
        };

        f.write_char(type_char)?;
        f.write_char(user_r)?;
        f.write_char(user_w)?;
        f.write_char(user_x)?;
        f.write_char(group_r)?;
        f.write_char(group_w)?;
        f.write_char(group_x)?;
        f.write_char(other_r)?;
        f.write_char(other_w)?;
        f.write_char(other_x)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_display() {
        let mode = Mode { bits: 0o754 } | Mode::TYPE_FILE;
        assert_eq!(&format!("{}", mode), "-rwxr-xr--");
        let mode = mode | Mode::BIT_STICKY;
        assert_eq!(&format!("{}", mode), "-rwxr-xr-T");
        let mode = Mode::O755 | Mode::TYPE_DIR;
        assert_eq!(&format!("{}", mode), "drwxr-xr-x");
    }

    #[test]
    fn order_round_trip() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 0x7371_7368).unwrap();
        put_u16(&mut buf, 0xCAFE).unwrap();
        assert_eq!(&buf[..4], b"hsqs");

        let mut r = &buf[..];
        assert_eq!(Order::Little.u32(&mut r).unwrap(), 0x7371_7368);
        assert_eq!(Order::Little.u16(&mut r).unwrap(), 0xCAFE);

        let mut r = &buf[..];
        assert_eq!(Order::Big.u32(&mut r).unwrap(), 0x6873_7173);
    }
}
