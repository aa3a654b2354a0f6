//! User/Group IDs
//!
//! The archive stores every distinct UID and GID once, in a dense array of
//! u32s reached through a pointer table at `id_table_start`. Each metadata
//! block holds up to 2048 ids. Inodes refer to ids by 16-bit index.

/// UID/GIDs are both stored as u32s, and both are treated simply as ids
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u32);

/// The index of an id in the uid/gid table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Idx(pub u16);

/// Ids per metadata block (8192 / 4)
pub const IDS_PER_BLOCK: u32 = 2048;
