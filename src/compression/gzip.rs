use flate2::{FlushCompress, FlushDecompress};
use std::cell::{RefCell, RefMut};
use std::io;

const DEFAULT_LEVEL: u32 = 9;

#[derive(Debug)]
struct State {
    decompressor: flate2::Decompress,
    compressor: flate2::Compress,
}

/// The built-in zlib codec.
///
/// (De)compressor state is cached per thread so independent readers sharing
/// one archive never contend on it.
#[derive(Debug)]
pub struct Gzip {
    level: u32,
    state: thread_local::ThreadLocal<RefCell<State>>,
}

impl Default for Gzip {
    fn default() -> Self {
        Gzip::new(DEFAULT_LEVEL)
    }
}

impl Gzip {
    /// `level` is the deflate level, 1-9
    pub fn new(level: u32) -> Self {
        Gzip {
            level,
            state: thread_local::ThreadLocal::new(),
        }
    }

    fn state(&self) -> &RefCell<State> {
        self.state.get_or(|| RefCell::new(State::new(self.level)))
    }

    fn decompressor(&self) -> RefMut<flate2::Decompress> {
        let state = self.state().borrow_mut();
        let mut decompressor = RefMut::map(state, |s| &mut s.decompressor);
        decompressor.reset(true);
        decompressor
    }

    fn compressor(&self) -> RefMut<flate2::Compress> {
        let state = self.state().borrow_mut();
        let mut compressor = RefMut::map(state, |s| &mut s.compressor);
        compressor.reset();
        compressor
    }
}

impl super::Codec for Gzip {
    fn compress(&self, src: &[u8]) -> io::Result<Vec<u8>> {
        // Worst-case zlib expansion plus slack; if even this overflows the
        // input was incompressible and the raw bytes are the answer.
        let mut dst = vec![0u8; src.len() + src.len() / 1000 + 64];
        let mut compressor = self.compressor();
        loop {
            let in_offset = min_mem(compressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(compressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];

            let status = compressor.compress(input, output, FlushCompress::Finish)?;
            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => return Ok(src.to_vec()),
                flate2::Status::StreamEnd => break,
            }
        }
        let produced = compressor.total_out() as usize;
        dst.truncate(produced);
        Ok(dst)
    }

    fn decompress(&self, src: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
        let mut dst = vec![0u8; max_size];
        let mut decompressor = self.decompressor();
        loop {
            let in_offset = min_mem(decompressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(decompressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];

            let status = decompressor.decompress(input, output, FlushDecompress::Finish)?;
            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "decompressed block exceeds its size limit",
                    ));
                }
                flate2::Status::StreamEnd => break,
            }
        }
        let produced = decompressor.total_out() as usize;
        dst.truncate(produced);
        Ok(dst)
    }
}

impl State {
    fn new(level: u32) -> Self {
        let compression = flate2::Compression::new(level);
        Self {
            decompressor: flate2::Decompress::new(true),
            compressor: flate2::Compress::new(compression, true),
        }
    }
}

fn min_mem(stream_count: u64, mem_size: usize) -> usize {
    if stream_count < mem_size as u64 {
        stream_count as usize
    } else {
        mem_size
    }
}
