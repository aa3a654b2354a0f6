//! Two-level tables: fixed-size records packed into metadata blocks, reached
//! through an array of u64 block pointers. The id table is stored this way
//! (as are the fragment and export tables, which this writer does not emit).

use std::sync::Arc;

use crate::compression::Codec;
use crate::errors::Result;
use crate::write::metablock_writer::MetablockWriter;

pub(crate) struct Table {
    data_writer: MetablockWriter,
}

impl Table {
    pub(crate) fn new(codec: Option<Arc<dyn Codec>>) -> Self {
        Self {
            data_writer: MetablockWriter::new(codec),
        }
    }

    pub(crate) fn write(&mut self, record: &[u8]) -> Result<()> {
        debug_assert!(record.len() < repr::metablock::SIZE);
        debug_assert_eq!(repr::metablock::SIZE % record.len(), 0);
        self.data_writer.write(record)?;
        Ok(())
    }

    /// The encoded blocks plus the relative offset of each block within
    /// them. The caller turns those into absolute u64 pointers once it knows
    /// where the blocks land in the archive.
    pub(crate) fn finish(self) -> Result<(Vec<u8>, Vec<u32>)> {
        self.data_writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pointer_per_block() {
        let mut table = Table::new(None);
        // 3000 u32 records span two 8 KiB blocks
        for i in 0..3000u32 {
            table.write(&i.to_le_bytes()).unwrap();
        }
        let (data, offsets) = table.finish().unwrap();
        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[0], 0);
        // First block holds 2048 records plus its 2-byte header
        assert_eq!(offsets[1], 2 + 8192);
        assert!(!data.is_empty());
    }
}
