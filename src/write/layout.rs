//! Metadata layout: the multi-pass planner that turns the in-memory tree
//! into inode and directory tables whose cross-references agree.
//!
//! The two tables depend on each other:
//!
//! * a directory entry stores the compressed block position and intra-block
//!   offset of its target's inode record;
//! * a directory inode stores the compressed block position and intra-block
//!   offset of its own listing, and (when extended) index entries pointing at
//!   listing positions;
//! * an extended directory's index entry count changes that inode's
//!   serialized size, which can push later inodes into a different metadata
//!   block, which redraws the listing chunk boundaries that produced the
//!   index in the first place.
//!
//! The planner therefore runs two nested fixed-point loops: first inode
//! positions within the uncompressed table (index counts feed back into
//! record sizes), then compressed block positions (listing contents feed back
//! into compressed sizes). Each loop runs at most [`MAX_PASSES`] times before
//! the layout is declared divergent. Directory listing sizes must not change
//! once the first loop has settled; that is asserted on every rebuild.

use std::convert::TryInto;
use std::sync::Arc;

use crate::compression::Codec;
use crate::errors::{ErrorInner, Result};
use crate::write::metablock_writer::MetablockWriter;
use crate::write::uid_gid;
use crate::write::{Item, ItemData};

/// Iteration budget for each fixed-point loop
pub(crate) const MAX_PASSES: usize = 10;

/// Largest run of entries one directory header may cover
const ENTRIES_PER_CHUNK: usize = repr::directory::MAX_ENTRIES_PER_HEADER as usize;

/// The settled layout: encoded tables ready to be written out
pub(crate) struct Layout {
    /// Encoded directory table (concatenated compressed blocks)
    pub dir_table: Vec<u8>,
    /// Encoded inode table
    pub inode_table: Vec<u8>,
    /// Reference to the root directory's inode record
    pub root_ref: repr::inode::Ref,
}

/// Per-item position in the uncompressed inode table:
/// (8 KiB block number, offset within that block)
type InodePos = (u32, u16);

pub(crate) fn build(
    items: &mut Vec<Item>,
    ids: &uid_gid::Table,
    codec: &Arc<dyn Codec>,
) -> Result<Layout> {
    // Loop 1: inode positions. Directory chunking depends on the positions,
    // index counts depend on the chunking, record sizes depend on the index
    // counts, and the positions depend on the record sizes.
    let mut inode_pos: Vec<InodePos> = vec![(0, 0); items.len()];
    let mut settled = false;
    for iteration in 0..MAX_PASSES {
        simulate_directories(items, &inode_pos)?;
        let new_pos = compute_inode_positions(items, ids)?;
        if iteration > 0 && new_pos == inode_pos {
            settled = true;
            break;
        }
        inode_pos = new_pos;
    }
    if !settled {
        return Err(ErrorInner::LayoutDiverged {
            what: "inode positions",
            iterations: MAX_PASSES,
        }
        .into());
    }

    // Initial listings, before any compressed block positions are known
    build_dir_bodies(items, &inode_pos, None, false)?;

    // Loop 2: compressed block positions. Listing contents reference inode
    // block positions; compressed sizes depend on listing contents.
    let mut inode_block_positions: Vec<u32> = Vec::new();
    let mut tables = None;
    for iteration in 0..MAX_PASSES {
        let dir_table = encode_dir_table(items, codec)?;
        let (inode_table, new_positions) = encode_inode_table(items, ids, codec)?;
        if iteration > 0 && new_positions == inode_block_positions {
            inode_block_positions = new_positions;
            tables = Some((dir_table, inode_table));
            break;
        }
        inode_block_positions = new_positions;
        build_dir_bodies(items, &inode_pos, Some(&inode_block_positions), true)?;
    }
    let Some((dir_table, inode_table)) = tables else {
        return Err(ErrorInner::LayoutDiverged {
            what: "metadata block positions",
            iterations: MAX_PASSES,
        }
        .into());
    };

    let root_pos = inode_pos[0];
    let root_ref = repr::inode::Ref::new(
        inode_block_positions[root_pos.0 as usize],
        root_pos.1,
    );

    Ok(Layout {
        dir_table,
        inode_table,
        root_ref,
    })
}

/// A run of children sharing one directory header
struct Chunk {
    start: usize,
    len: usize,
}

/// Partition a directory's (sorted) children into header runs: at most 256
/// entries, all of whose inodes start in the same metadata block, with inode
/// numbers within i16 of the first entry
fn chunk_children(items: &[Item], children: &[usize], inode_pos: &[InodePos]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut start = 0;
    while start < children.len() {
        let first_block = inode_pos[children[start]].0;
        let first_ino = items[children[start]].ino;
        let mut len = 0;
        while start + len < children.len() && len < ENTRIES_PER_CHUNK {
            let child = children[start + len];
            if inode_pos[child].0 != first_block {
                break;
            }
            let delta = i64::from(items[child].ino) - i64::from(first_ino);
            if i16::try_from(delta).is_err() {
                break;
            }
            len += 1;
        }
        chunks.push(Chunk { start, len });
        start += len;
    }
    chunks
}

fn encoded_name_len(name: &[u8]) -> usize {
    repr::directory::Entry::SIZE + name.len()
}

/// Recompute every directory's chunking, listing size and (for extended
/// directories) index skeleton from the current inode positions, promoting
/// directories whose listing no longer fits the basic shape
fn simulate_directories(items: &mut Vec<Item>, inode_pos: &[InodePos]) -> Result<()> {
    for i in 0..items.len() {
        let children: Vec<usize> = match &items[i].data {
            ItemData::Dir { children } => children.iter().map(|child| child.0).collect(),
            _ => continue,
        };

        let chunks = chunk_children(items, &children, inode_pos);
        let mut body_size = 0usize;
        let mut index = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            index.push(crate::write::IndexEntry {
                index: body_size as u32,
                start: 0,
                name: items[children[chunk.start]].name.clone(),
            });
            body_size += repr::directory::Header::SIZE;
            for &child in &children[chunk.start..chunk.start + chunk.len] {
                body_size += encoded_name_len(&items[child].name);
            }
        }

        let listing_size = body_size as u32 + repr::directory::VIRTUAL_SIZE;
        let item = &mut items[i];
        if item.kind == repr::inode::Kind::BASIC_DIR
            && (children.len() > ENTRIES_PER_CHUNK || listing_size > u16::MAX.into())
        {
            item.kind = repr::inode::Kind::EXT_DIR;
        }
        item.dir_size = listing_size;
        item.dir_index = if item.kind == repr::inode::Kind::EXT_DIR {
            index
        } else {
            Vec::new()
        };
    }
    Ok(())
}

/// Serialize every inode record and pack them into 8 KiB blocks, returning
/// each record's (block number, offset) position
fn compute_inode_positions(items: &[Item], ids: &uid_gid::Table) -> Result<Vec<InodePos>> {
    let mut positions = Vec::with_capacity(items.len());
    let mut offset = 0usize;
    for i in 0..items.len() {
        positions.push((
            (offset / repr::metablock::SIZE) as u32,
            (offset % repr::metablock::SIZE) as u16,
        ));
        offset += serialize_inode(items, i, ids)?.len();
    }
    Ok(positions)
}

/// Build every directory's listing bytes.
///
/// `inode_block_positions` maps uncompressed inode block numbers to their
/// compressed offsets; until the first compression pass it is unknown and
/// header start fields are written as zero. Once `check_sizes` is set, a
/// listing changing size between passes is a layout error.
fn build_dir_bodies(
    items: &mut Vec<Item>,
    inode_pos: &[InodePos],
    inode_block_positions: Option<&[u32]>,
    check_sizes: bool,
) -> Result<()> {
    let mut global_offset = 0u32;
    for i in 0..items.len() {
        let children: Vec<usize> = match &items[i].data {
            ItemData::Dir { children } => children.iter().map(|child| child.0).collect(),
            _ => continue,
        };

        let chunks = chunk_children(items, &children, inode_pos);
        let mut body = Vec::new();
        let mut index = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let first = children[chunk.start];
            index.push(crate::write::IndexEntry {
                index: body.len() as u32,
                start: 0,
                name: items[first].name.clone(),
            });

            let first_block = inode_pos[first].0;
            let start = inode_block_positions
                .map(|positions| positions.get(first_block as usize).copied().unwrap_or(0))
                .unwrap_or(0);
            let header = repr::directory::Header {
                count: (chunk.len - 1) as u32,
                start,
                inode_number: items[first].ino,
            };
            header.write_to(&mut body).expect("vec write cannot fail");

            for &child in &children[chunk.start..chunk.start + chunk.len] {
                let target = &items[child];
                let delta = i64::from(target.ino) - i64::from(items[first].ino);
                let entry = repr::directory::Entry {
                    offset: inode_pos[child].1,
                    inode_offset: delta.try_into().expect("chunking bounds the delta"),
                    kind: target.kind.to_basic(),
                    name_size: (target.name.len() - 1)
                        .try_into()
                        .expect("name longer than 65536 bytes"),
                };
                entry.write_to(&mut body).expect("vec write cannot fail");
                body.extend_from_slice(&target.name);
            }
        }

        let listing_size = body.len() as u32 + repr::directory::VIRTUAL_SIZE;
        let item = &mut items[i];
        if check_sizes && item.dir_size != 0 && item.dir_size != listing_size {
            return Err(ErrorInner::DirectorySizeChanged {
                inode_number: item.ino,
                old: item.dir_size,
                new: listing_size,
            }
            .into());
        }

        item.dir_offset = global_offset;
        item.dir_size = listing_size;
        item.dir_body = body;
        item.dir_index = if item.kind == repr::inode::Kind::EXT_DIR {
            index
        } else {
            Vec::new()
        };
        global_offset += item.dir_size - repr::directory::VIRTUAL_SIZE;
    }
    Ok(())
}

/// Compress the concatenated listings into the directory table, then point
/// every directory inode (and every index entry) at its compressed block
fn encode_dir_table(items: &mut Vec<Item>, codec: &Arc<dyn Codec>) -> Result<Vec<u8>> {
    let mut writer = MetablockWriter::new(Some(Arc::clone(codec)));
    for item in items.iter() {
        if matches!(item.data, ItemData::Dir { .. }) && !item.dir_body.is_empty() {
            writer.write(&item.dir_body)?;
        }
    }
    let (table, block_offsets) = writer.finish()?;

    let block_offset_at = |byte_offset: u32| -> u32 {
        let idx = (byte_offset as usize) / repr::metablock::SIZE;
        block_offsets
            .get(idx)
            .copied()
            .unwrap_or_else(|| block_offsets.last().copied().unwrap_or(0))
    };

    for item in items.iter_mut() {
        if !matches!(item.data, ItemData::Dir { .. }) {
            continue;
        }
        item.dir_ref_start = block_offset_at(item.dir_offset);
        item.dir_ref_offset = (item.dir_offset as usize % repr::metablock::SIZE) as u16;
        for entry in &mut item.dir_index {
            entry.start = block_offset_at(item.dir_offset + entry.index);
        }
    }

    Ok(table)
}

/// Compress the serialized inode records into the inode table, returning it
/// together with the compressed offset of each 8 KiB block
fn encode_inode_table(
    items: &[Item],
    ids: &uid_gid::Table,
    codec: &Arc<dyn Codec>,
) -> Result<(Vec<u8>, Vec<u32>)> {
    let mut writer = MetablockWriter::new(Some(Arc::clone(codec)));
    for i in 0..items.len() {
        writer.write(&serialize_inode(items, i, ids)?)?;
    }
    writer.finish()
}

/// Serialize one inode record with the current layout state
pub(crate) fn serialize_inode(
    items: &[Item],
    idx: usize,
    ids: &uid_gid::Table,
) -> Result<Vec<u8>> {
    let item = &items[idx];
    let parent_ino = item.parent.map(|p| items[p.0].ino).unwrap_or(1);

    let mut out = Vec::with_capacity(64);
    let header = repr::inode::Header {
        inode_type: serialized_kind(item),
        permissions: item.mode & repr::Mode::PERM_MASK,
        uid_idx: ids.get(item.uid),
        gid_idx: ids.get(item.gid),
        modified_time: item.mtime,
        inode_number: item.ino,
    };
    header.write_to(&mut out).expect("vec write cannot fail");

    match &item.data {
        ItemData::Dir { children } => {
            let nlink = repr::inode::dir_hardlink_count(children.len() as u32);
            if item.kind == repr::inode::Kind::EXT_DIR {
                let body = repr::inode::ExtendedDir {
                    hard_link_count: nlink,
                    file_size: item.dir_size,
                    block_start: item.dir_ref_start,
                    parent_inode_number: parent_ino,
                    index_count: item
                        .dir_index
                        .len()
                        .try_into()
                        .expect("more than 65536 index entries"),
                    block_offset: item.dir_ref_offset,
                    xattr_idx: repr::inode::XATTR_NONE,
                };
                body.write_to(&mut out).expect("vec write cannot fail");
                for entry in &item.dir_index {
                    let raw = repr::directory::Index {
                        index: entry.index,
                        start: entry.start,
                        name_size: (entry.name.len() - 1) as u32,
                    };
                    raw.write_to(&mut out).expect("vec write cannot fail");
                    out.extend_from_slice(&entry.name);
                }
            } else {
                let body = repr::inode::BasicDir {
                    block_start: item.dir_ref_start,
                    hard_link_count: nlink,
                    file_size: item.dir_size as u16,
                    block_offset: item.dir_ref_offset,
                    parent_inode_number: parent_ino,
                };
                body.write_to(&mut out).expect("vec write cannot fail");
            }
        }
        ItemData::File { .. } => {
            if file_needs_ext(item) {
                let body = repr::inode::ExtendedFile {
                    blocks_start: item.start_block,
                    file_size: item.file_size,
                    sparse: 0,
                    hard_link_count: 1,
                    fragment_block_index: repr::inode::FRAGMENT_NONE,
                    fragment_offset: 0,
                    xattr_idx: repr::inode::XATTR_NONE,
                };
                body.write_to(&mut out).expect("vec write cannot fail");
            } else {
                let body = repr::inode::BasicFile {
                    blocks_start: item.start_block as u32,
                    fragment_block_index: repr::inode::FRAGMENT_NONE,
                    fragment_offset: 0,
                    file_size: item.file_size as u32,
                };
                body.write_to(&mut out).expect("vec write cannot fail");
            }
            for &word in &item.data_blocks {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
        ItemData::Symlink { target } => {
            let body = repr::inode::Symlink {
                hard_link_count: 1,
                target_size: target.len() as u32,
            };
            body.write_to(&mut out).expect("vec write cannot fail");
            out.extend_from_slice(target);
        }
        ItemData::BlockDev { rdev } | ItemData::CharDev { rdev } => {
            let body = repr::inode::Device {
                hard_link_count: 1,
                device: *rdev,
            };
            body.write_to(&mut out).expect("vec write cannot fail");
        }
        ItemData::Fifo | ItemData::Socket => {
            let body = repr::inode::Ipc {
                hard_link_count: 1,
            };
            body.write_to(&mut out).expect("vec write cannot fail");
        }
    }

    Ok(out)
}

fn file_needs_ext(item: &Item) -> bool {
    item.start_block > u64::from(u32::MAX) || item.file_size > u64::from(u32::MAX)
}

fn serialized_kind(item: &Item) -> repr::inode::Kind {
    match &item.data {
        ItemData::Dir { .. } => item.kind,
        ItemData::File { .. } => {
            if file_needs_ext(item) {
                repr::inode::Kind::EXT_FILE
            } else {
                repr::inode::Kind::BASIC_FILE
            }
        }
        _ => item.kind,
    }
}
