//! Write-side positioned output.
//!
//! The writer streams tables at a cursor it manages itself and comes back
//! exactly once, at commit time, to lay the superblock over the placeholder
//! at offset 0. [`ImageSink`] is that contract: whole-buffer writes at an
//! absolute position, through a shared reference so the finished image can
//! be re-read without tearing the sink down first. Sequential-only sinks
//! don't implement this; the writer buffers for them instead.
//!
//! [`MemBuffer`] is the in-memory implementation, readable and writable at
//! any position, used to build an image and re-open it as an archive without
//! touching the filesystem.

use parking_lot::Mutex;
use positioned_io::{RandomAccessFile, ReadAt};
use std::io;
use std::sync::Arc;

/// An output the archive writer can address by absolute byte position
pub trait ImageSink: Send + Sync {
    /// Write all of `data` at byte `pos`, extending the sink if needed
    fn write_all_at(&self, pos: u64, data: &[u8]) -> io::Result<()>;

    /// Make everything written so far durable
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

impl ImageSink for RandomAccessFile {
    fn write_all_at(&self, pos: u64, data: &[u8]) -> io::Result<()> {
        // positioned-io exposes writes on `&RandomAccessFile`, which is what
        // lets a shared handle serve reads and writes at once
        let mut file = &*self;
        positioned_io::WriteAt::write_all_at(&mut file, pos, data)
    }

    fn flush(&self) -> io::Result<()> {
        let mut file = &*self;
        positioned_io::WriteAt::flush(&mut file)
    }
}

impl<S: ImageSink + ?Sized> ImageSink for Arc<S> {
    fn write_all_at(&self, pos: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_all_at(pos, data)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }
}

/// A growable in-memory byte image, readable and writable at any position
#[derive(Debug, Default)]
pub struct MemBuffer {
    data: Mutex<Vec<u8>>,
}

impl MemBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemBuffer {
            data: Mutex::new(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl ReadAt for MemBuffer {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let pos = pos as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }
}

impl ImageSink for MemBuffer {
    fn write_all_at(&self, pos: u64, data: &[u8]) -> io::Result<()> {
        let mut image = self.data.lock();
        let end = pos as usize + data.len();
        if image.len() < end {
            image.resize(end, 0);
        }
        image[pos as usize..end].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_buffer_read_write() {
        let buf = MemBuffer::new();
        buf.write_all_at(6, b"world").unwrap();
        buf.write_all_at(0, b"hello ").unwrap();
        assert_eq!(buf.len(), 11);

        let mut out = [0u8; 5];
        assert_eq!(buf.read_at(6, &mut out).unwrap(), 5);
        assert_eq!(&out, b"world");

        // Reads past the end are a clean EOF
        assert_eq!(buf.read_at(100, &mut out).unwrap(), 0);
    }

    #[test]
    fn placeholder_patching() {
        // The writer's commit pattern: reserve a header region, stream the
        // body, then come back to offset 0
        let buf = MemBuffer::new();
        buf.write_all_at(0, &[0u8; 8]).unwrap();
        buf.write_all_at(8, b"body").unwrap();
        buf.write_all_at(0, b"header!!").unwrap();
        assert_eq!(buf.to_vec(), b"header!!body");
    }

    #[test]
    fn shared_handles_see_each_other() {
        let sink = Arc::new(MemBuffer::new());
        let writer: &dyn ImageSink = &Arc::clone(&sink);
        writer.write_all_at(0, b"shared").unwrap();
        assert_eq!(sink.to_vec(), b"shared");
    }
}
