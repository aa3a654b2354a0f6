//! UID/GID deduplication and the on-disk id table.

use indexmap::IndexSet;
use std::convert::TryInto;
use std::sync::Arc;

use crate::compression::Codec;
use crate::errors::Result;
use crate::write::two_level;

/// Distinct ids in first-seen order; inodes store indexes into this set
#[derive(Debug, Default)]
pub(crate) struct Table {
    ids: IndexSet<u32>,
}

impl Table {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, id: u32) -> u16 {
        let (idx, _) = self.ids.insert_full(id);
        idx.try_into().expect("more than 65536 distinct ids")
    }

    pub(crate) fn get(&self, id: u32) -> u16 {
        let idx = self.ids.get_index_of(&id).expect("id was never added");
        idx.try_into().expect("more than 65536 distinct ids")
    }

    pub(crate) fn len(&self) -> u16 {
        self.ids.len().try_into().expect("more than 65536 distinct ids")
    }

    /// Encode the table body and its relative block offsets
    pub(crate) fn encode(&self, codec: Option<Arc<dyn Codec>>) -> Result<(Vec<u8>, Vec<u32>)> {
        let mut table = two_level::Table::new(codec);
        for &id in &self.ids {
            table.write(&id.to_le_bytes())?;
        }
        table.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_seen_order_is_stable() {
        let mut table = Table::new();
        assert_eq!(table.add(1000), 0);
        assert_eq!(table.add(0), 1);
        assert_eq!(table.add(1000), 0);
        assert_eq!(table.get(0), 1);
        assert_eq!(table.len(), 2);
    }
}
