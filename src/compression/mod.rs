//! Compression codecs and the registry the archive engines consume.
//!
//! The on-disk format names its algorithm by id ([`repr::compression::Id`]).
//! The engines never call a compressor directly; they look the id up in a
//! [`Registry`] and use whatever [`Codec`] is installed there. Gzip is built
//! in (feature `gzip`, on by default); any other algorithm can be plugged in
//! by registering a codec under its id.

use repr::compression::Id as CompressionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::{fmt, io};

#[cfg(feature = "gzip")]
pub mod gzip;

/// A compression algorithm implementation.
///
/// `compress` may return output no smaller than the input; callers compare
/// lengths and store the raw bytes when compression does not help.
/// `decompress` must fail if the output would exceed `max_size`.
pub trait Codec: Send + Sync + fmt::Debug {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
    fn decompress(&self, data: &[u8], max_size: usize) -> io::Result<Vec<u8>>;
}

/// The algorithm a writer can be configured with.
///
/// A kind names an algorithm, not an implementation; whether it is actually
/// usable depends on what the [`Registry`] has installed under its id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Gzip
    }
}

impl Kind {
    /// The id recorded in the superblock for this algorithm
    pub fn id(self) -> CompressionId {
        match self {
            Kind::Gzip => CompressionId::GZIP,
            Kind::Lzma => CompressionId::LZMA,
            Kind::Lzo => CompressionId::LZO,
            Kind::Xz => CompressionId::XZ,
            Kind::Lz4 => CompressionId::LZ4,
            Kind::Zstd => CompressionId::ZSTD,
        }
    }
}

// The algorithm name table lives with the on-disk id; render through it
impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.id(), f)
    }
}

/// Codec lookup by compression id.
///
/// `Registry::default()` carries the built-in codecs; a host wanting zstd or
/// xz registers its own implementations before opening the archive.
#[derive(Debug, Clone)]
pub struct Registry {
    codecs: HashMap<CompressionId, Arc<dyn Codec>>,
}

impl Default for Registry {
    fn default() -> Self {
        #[cfg_attr(not(feature = "gzip"), allow(unused_mut))]
        let mut registry = Registry {
            codecs: HashMap::new(),
        };
        #[cfg(feature = "gzip")]
        registry.register(CompressionId::GZIP, Arc::new(gzip::Gzip::default()));
        registry
    }
}

impl Registry {
    /// A registry with nothing installed, not even the defaults
    pub fn empty() -> Self {
        Registry {
            codecs: HashMap::new(),
        }
    }

    /// Install (or replace) the codec for an id
    pub fn register(&mut self, id: CompressionId, codec: Arc<dyn Codec>) {
        self.codecs.insert(id, codec);
    }

    pub fn get(&self, id: CompressionId) -> Option<Arc<dyn Codec>> {
        self.codecs.get(&id).cloned()
    }

    pub fn supports(&self, id: CompressionId) -> bool {
        self.codecs.contains_key(&id)
    }
}
