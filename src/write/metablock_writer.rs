//! Packing serialized records into compressed metadata blocks.

use std::convert::TryInto;
use std::mem;
use std::sync::Arc;

use crate::compression::Codec;
use crate::errors::{ErrorInner, Result};

/// Where a record landed: the compressed byte offset of its metadata block
/// within the table, plus its byte offset within the decompressed block.
/// This is exactly the pair an inode reference packs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ItemPosition {
    pub block_start: u32,
    pub uncompressed_offset: u16,
}

/// Accumulates records into 8 KiB blocks, compressing each block as it fills.
///
/// Records may span block boundaries; [`ItemPosition`] always refers to where
/// a record starts.
pub(crate) struct MetablockWriter {
    codec: Option<Arc<dyn Codec>>,
    output: Vec<u8>,
    block_offsets: Vec<u32>,
    current_block: Vec<u8>,
}

impl MetablockWriter {
    /// `codec: None` stores every block uncompressed
    pub(crate) fn new(codec: Option<Arc<dyn Codec>>) -> Self {
        Self {
            codec,
            output: Vec::new(),
            block_offsets: Vec::new(),
            current_block: Vec::with_capacity(repr::metablock::SIZE),
        }
    }

    /// Where the next record written will start
    pub(crate) fn position(&self) -> ItemPosition {
        ItemPosition {
            block_start: self.output.len().try_into().expect("table exceeds u32"),
            uncompressed_offset: self
                .current_block
                .len()
                .try_into()
                .expect("block offset exceeds u16"),
        }
    }

    pub(crate) fn write(&mut self, item: &[u8]) -> Result<ItemPosition> {
        let position = self.position();
        let mut item = item;
        loop {
            let remaining = repr::metablock::SIZE - self.current_block.len();
            if item.len() <= remaining {
                self.current_block.extend_from_slice(item);
                break;
            }
            let (head, tail) = item.split_at(remaining);
            self.current_block.extend_from_slice(head);
            self.flush()?;
            item = tail;
        }
        Ok(position)
    }

    /// Flush the trailing partial block and return the encoded table along
    /// with the compressed offset of each block
    pub(crate) fn finish(mut self) -> Result<(Vec<u8>, Vec<u32>)> {
        if !self.current_block.is_empty() {
            self.flush()?;
        }
        Ok((mem::take(&mut self.output), mem::take(&mut self.block_offsets)))
    }

    fn flush(&mut self) -> Result<()> {
        let block_start = self.output.len().try_into().expect("table exceeds u32");
        let data = mem::replace(
            &mut self.current_block,
            Vec::with_capacity(repr::metablock::SIZE),
        );
        let encoded = encode_metablock(self.codec.as_deref(), &data)?;
        self.block_offsets.push(block_start);
        self.output.extend_from_slice(&encoded);
        Ok(())
    }
}

/// Encode one metadata block: 2-byte header plus the payload, compressed iff
/// that makes it strictly smaller
pub(crate) fn encode_metablock(codec: Option<&dyn Codec>, data: &[u8]) -> Result<Vec<u8>> {
    debug_assert!(data.len() <= repr::metablock::SIZE);

    let compressed = match codec {
        Some(codec) => {
            let out = codec
                .compress(data)
                .map_err(|source| ErrorInner::Io { source })?;
            if out.len() < data.len() {
                Some(out)
            } else {
                None
            }
        }
        None => None,
    };

    let (payload, is_compressed): (&[u8], bool) = match &compressed {
        Some(out) => (out, true),
        None => (data, false),
    };

    let mut encoded = Vec::with_capacity(2 + payload.len());
    let header = repr::metablock::Header::new(payload.len() as u16, is_compressed);
    header
        .write_to(&mut encoded)
        .expect("vec write cannot fail");
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::gzip::Gzip;

    fn pos(position: ItemPosition) -> (u32, u16) {
        (position.block_start, position.uncompressed_offset)
    }

    #[test]
    fn positions_track_block_boundaries() {
        let codec: Arc<dyn Codec> = Arc::new(Gzip::default());
        let mut writer = MetablockWriter::new(Some(codec));

        let item = [0u8; 1000];
        // Write 9 * 1000 bytes so the next record starts in the second block
        for i in 0..9u16 {
            let position = writer.write(&item).unwrap();
            assert_eq!(pos(position), (0, i * 1000));
        }

        // This one starts in the second metablock; the first compresses well
        let position = writer.write(&item).unwrap();
        assert!((1u32..400).contains(&position.block_start));
        assert_eq!(
            usize::from(position.uncompressed_offset),
            (9 * 1000) % repr::metablock::SIZE
        );

        let (output, offsets) = writer.finish().unwrap();
        assert!(!output.is_empty());
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], position.block_start);
    }

    #[test]
    fn uncompressed_when_codec_absent() {
        let mut writer = MetablockWriter::new(None);
        writer.write(b"hello").unwrap();
        let (output, offsets) = writer.finish().unwrap();
        assert_eq!(offsets, vec![0]);
        let header = repr::metablock::Header(u16::from_le_bytes([output[0], output[1]]));
        assert!(!header.compressed());
        assert_eq!(usize::from(header.size()), 5);
        assert_eq!(&output[2..], b"hello");
    }
}
