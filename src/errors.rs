use snafu::Snafu;
use std::io;
use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`], stable across releases.
///
/// Every error the crate produces maps to exactly one kind; callers branch on
/// [`Error::kind`] rather than matching message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The bytes are not a squashfs 4.0 archive, or violate a structural
    /// invariant of the format
    Format,
    /// The archive is recognizably squashfs but its contents are damaged
    Corruption,
    /// A path or inode lookup failed
    Lookup,
    /// The archive needs a capability this build or image does not provide
    Capability,
    /// An error from the underlying positioned reader or writer
    Io,
}

/// The error type for every fallible operation in this crate
#[derive(Debug, Snafu)]
pub struct Error(ErrorInner);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// True for "not found" lookup failures specifically
    pub fn is_not_found(&self) -> bool {
        match &self.0 {
            ErrorInner::NotFound => true,
            ErrorInner::Op { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error(ErrorInner::Io { source: e })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum ErrorInner {
    // Format
    #[snafu(display(
        "magic mismatch: expected {:#x}, got {:#x}",
        repr::superblock::MAGIC,
        magic
    ))]
    BadMagic { magic: u32 },

    #[snafu(display(
        "invalid archive version {}.{}: sqfs only supports version 4.0",
        major,
        minor
    ))]
    BadVersion { major: u16, minor: u16 },

    #[snafu(display("block size ({}) out of range", actual))]
    OutOfRangeBlockSize { actual: u32 },

    #[snafu(display("block log {} does not match block size {}", block_log, block_size))]
    CorruptBlockSizes { block_log: u16, block_size: u32 },

    #[snafu(display("symlink target too long ({} bytes)", actual))]
    SymlinkTargetTooLong { actual: u32 },

    #[snafu(display("directory index name too long ({} bytes)", actual))]
    DirIndexNameTooLong { actual: u32 },

    // Corruption
    #[snafu(display("corrupt compressed block: {}", source))]
    Decompress { source: io::Error },

    #[snafu(display("unexpected end of file in metadata stream"))]
    UnexpectedEof,

    #[snafu(display("metadata block size too large: {} (max {})", actual, repr::metablock::SIZE))]
    HugeMetablock { actual: usize },

    #[snafu(display(
        "directory size changed from {} to {} during layout of inode {}",
        old,
        new,
        inode_number
    ))]
    DirectorySizeChanged { inode_number: u32, old: u32, new: u32 },

    #[snafu(display("{} failed to converge after {} iterations", what, iterations))]
    LayoutDiverged {
        what: &'static str,
        iterations: usize,
    },

    // Lookup
    #[snafu(display("not found"))]
    NotFound,

    #[snafu(display("not a directory"))]
    NotADirectory,

    #[snafu(display("too many levels of symbolic links"))]
    TooManySymlinks,

    #[snafu(display("invalid path"))]
    InvalidPath,

    #[snafu(display("parent directory missing for {:?}", path))]
    ParentNotFound { path: String },

    // Capability
    #[snafu(display("unsupported compression: {}", id))]
    UnsupportedCompression { id: repr::compression::Id },

    #[snafu(display("unknown squashfs inode {} and no NFS export table", inode_number))]
    InodeNotExported { inode_number: u32 },

    // I/O
    #[snafu(display("unable to open {}: {}", path.display(), source))]
    UnableToOpen { path: PathBuf, source: io::Error },

    #[snafu(display("I/O error: {}", source))]
    Io { source: io::Error },

    // Facade wrapper carrying the operation and path that failed
    #[snafu(display("{} {}: {}", op, path, source))]
    Op {
        op: &'static str,
        path: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}

impl ErrorInner {
    fn kind(&self) -> ErrorKind {
        use ErrorInner::*;
        match self {
            BadMagic { .. }
            | BadVersion { .. }
            | OutOfRangeBlockSize { .. }
            | CorruptBlockSizes { .. }
            | SymlinkTargetTooLong { .. }
            | DirIndexNameTooLong { .. } => ErrorKind::Format,

            Decompress { .. }
            | UnexpectedEof
            | HugeMetablock { .. }
            | DirectorySizeChanged { .. }
            | LayoutDiverged { .. } => ErrorKind::Corruption,

            NotFound
            | NotADirectory
            | TooManySymlinks
            | InvalidPath
            | ParentNotFound { .. } => ErrorKind::Lookup,

            UnsupportedCompression { .. } | InodeNotExported { .. } => ErrorKind::Capability,

            UnableToOpen { .. } | Io { .. } => ErrorKind::Io,

            Op { source, .. } => source.kind(),
        }
    }
}

/// Attach a facade operation and path to an error.
pub(crate) fn with_op<T>(result: Result<T>, op: &'static str, path: &str) -> Result<T> {
    result.map_err(|source| {
        Error(ErrorInner::Op {
            op,
            path: path.to_string(),
            source: Box::new(source),
        })
    })
}

/// Recover a crate error that crossed an `io::Read` boundary.
///
/// The metadata stream implements `io::Read` for the field decoders; its own
/// failures travel wrapped inside `io::Error`. Anything else coming out of a
/// decode is a short read (corruption) or a real I/O failure.
pub(crate) fn from_decode_io(e: io::Error) -> Error {
    if e.get_ref().map_or(false, |inner| inner.is::<Error>()) {
        if let Ok(inner) = e.into_inner().expect("checked above").downcast::<Error>() {
            return *inner;
        }
        unreachable!("downcast after type check");
    }
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error(ErrorInner::UnexpectedEof),
        _ => Error(ErrorInner::Io { source: e }),
    }
}

/// Wrap a crate error so it can cross an `io::Read` boundary and be recovered
/// by [`from_decode_io`].
pub(crate) fn into_io(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let e = Error(ErrorInner::BadMagic { magic: 0 });
        assert_eq!(e.kind(), ErrorKind::Format);
        let e = Error(ErrorInner::NotADirectory);
        assert_eq!(e.kind(), ErrorKind::Lookup);
        let e = Error(ErrorInner::UnexpectedEof);
        assert_eq!(e.kind(), ErrorKind::Corruption);
    }

    #[test]
    fn op_wrapper_keeps_kind_and_context() {
        let inner = Error(ErrorInner::NotADirectory);
        let wrapped = with_op::<()>(Err(inner), "open", "pkgconfig/zlib.pc/foo").unwrap_err();
        assert_eq!(wrapped.kind(), ErrorKind::Lookup);
        let msg = wrapped.to_string();
        assert!(msg.contains("open pkgconfig/zlib.pc/foo"), "{}", msg);
        assert!(msg.contains("not a directory"), "{}", msg);
    }

    #[test]
    fn io_round_trip() {
        let original = Error(ErrorInner::TooManySymlinks);
        let io_err = into_io(original);
        let recovered = from_decode_io(io_err);
        assert_eq!(recovered.kind(), ErrorKind::Lookup);
    }
}
