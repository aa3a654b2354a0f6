//! Read and write SquashFS 4.0 archives.
//!
//! The read side parses an archive through any positioned reader and exposes
//! filesystem-shaped operations:
//!
//! ```no_run
//! use sqfs::read::Archive;
//!
//! fn demo() -> sqfs::Result<()> {
//!     let archive = Archive::open("rootfs.squashfs")?;
//!     for entry in archive.read_dir("etc")? {
//!         println!("{}", entry?.name());
//!     }
//!     let hosts = archive.read_file("etc/hosts")?;
//!     println!("{} bytes", hosts.len());
//!     Ok(())
//! }
//! ```
//!
//! The write side builds an image from an in-memory tree:
//!
//! ```no_run
//! use sqfs::write::{Entry, FileSource, Metadata, WriterBuilder};
//!
//! fn demo() -> sqfs::Result<()> {
//!     let mut writer = WriterBuilder::new().build_path("out.squashfs")?;
//!     writer.add_dir("etc", Metadata::dir())?;
//!     writer.add_file("etc/hosts", Metadata::file(), &b"127.0.0.1 localhost\n"[..])?;
//!     writer.finalize()
//! }
//! ```
//!
//! Compression back-ends are pluggable through
//! [`compression::Registry`]; gzip ships built in.

use slog::Drain;

pub mod compression;
pub mod read;
pub mod write;

mod errors;
mod sink;

pub use errors::{Error, ErrorKind, Result};
pub use repr::Mode;
pub use sink::{ImageSink, MemBuffer};

fn default_logger() -> slog::Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}
