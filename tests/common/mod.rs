#![allow(dead_code)]

use std::sync::Arc;

use sqfs::read::Archive;
use sqfs::write::{Writer, WriterBuilder};
use sqfs::MemBuffer;

/// Build an image in memory and re-open it as an archive
pub fn build_archive<F>(block_size: u32, populate: F) -> Archive<MemBuffer>
where
    F: FnOnce(&mut Writer),
{
    let sink = Arc::new(MemBuffer::new());
    let mut builder = WriterBuilder::new();
    builder.set_block_size(block_size);
    let mut writer = builder
        .build(Box::new(Arc::clone(&sink)))
        .expect("create writer");
    populate(&mut writer);
    writer.finalize().expect("finalize image");

    Archive::new(MemBuffer::from_vec(sink.to_vec())).expect("re-open image")
}

/// Same, but hand back the raw image bytes too
pub fn build_image<F>(block_size: u32, populate: F) -> Vec<u8>
where
    F: FnOnce(&mut Writer),
{
    let sink = Arc::new(MemBuffer::new());
    let mut builder = WriterBuilder::new();
    builder.set_block_size(block_size);
    let mut writer = builder
        .build(Box::new(Arc::clone(&sink)))
        .expect("create writer");
    populate(&mut writer);
    writer.finalize().expect("finalize image");
    sink.to_vec()
}
