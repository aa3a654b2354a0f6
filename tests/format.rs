//! Decoding of hand-assembled images exercising format corners the writer
//! never produces: tail-end fragments, sparse blocks, and big-endian
//! archives.

use sqfs::read::Archive;
use sqfs::MemBuffer;

#[derive(Copy, Clone)]
enum ByteOrder {
    Le,
    Be,
}

struct ImageBuilder {
    buf: Vec<u8>,
    order: ByteOrder,
}

impl ImageBuilder {
    fn new(order: ByteOrder) -> Self {
        ImageBuilder {
            // superblock placeholder
            buf: vec![0u8; 96],
            order,
        }
    }

    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    fn u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::Le => self.buf.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Be => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    fn u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Le => self.buf.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Be => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }

    fn u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Le => self.buf.extend_from_slice(&v.to_le_bytes()),
            ByteOrder::Be => self.buf.extend_from_slice(&v.to_be_bytes()),
        }
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Metadata block stored uncompressed
    fn metablock_header(&mut self, content_len: u16) {
        self.u16(content_len | 0x8000);
    }

    fn inode_header(&mut self, kind: u16, perm: u16, ino: u32) {
        self.u16(kind);
        self.u16(perm);
        self.u16(0); // uid idx
        self.u16(0); // gid idx
        self.i32(1_600_000_000);
        self.u32(ino);
    }
}

const BLOCK_SIZE: u32 = 4096;
const FRAG_FILE_SIZE: u32 = 5000; // one full block + 904-byte tail
const SPARSE_FILE_SIZE: u32 = 4106; // one hole block + 10 stored bytes
const FRAG_PAD: u32 = 100; // other files' tails preceding ours in the fragment block

fn frag_block_data() -> Vec<u8> {
    (0..4096u32).map(|i| (i % 13) as u8).collect()
}

fn frag_tail() -> Vec<u8> {
    (0..904u32).map(|i| (i % 7 + 1) as u8).collect()
}

fn sparse_tail() -> Vec<u8> {
    vec![0x5A; 10]
}

/// A two-file archive, every block stored uncompressed:
///
/// * `frag.bin` - 5000 bytes; a full data block plus a tail end stored at
///   offset 100 of a shared fragment block
/// * `sparse.bin` - 4106 bytes; a hole block followed by 10 stored bytes
fn build_image(order: ByteOrder) -> Vec<u8> {
    let mut img = ImageBuilder::new(order);

    // data block for frag.bin
    let data_start = img.pos();
    img.bytes(&frag_block_data());

    // the shared fragment block: 100 bytes of other tails, then ours
    let frag_block_start = img.pos();
    img.bytes(&vec![0xEE; FRAG_PAD as usize]);
    img.bytes(&frag_tail());
    let frag_block_len = (FRAG_PAD + 904) as u32;

    // sparse.bin's one stored block
    let sparse_data_start = img.pos();
    img.bytes(&sparse_tail());

    // inode table: root dir, frag.bin, sparse.bin
    let dir_body_len: u16 = 12 + (8 + 8) + (8 + 10);
    let inode_table_start = img.pos();
    img.metablock_header(32 + 36 + 40);
    // root directory, inode 1, record offset 0
    img.inode_header(1, 0o755, 1);
    img.u32(0); // dir table block start
    img.u32(2); // nlink
    img.u16(dir_body_len + 3);
    img.u16(0); // offset in block
    img.u32(1); // parent
    // frag.bin, inode 2, record offset 32
    img.inode_header(2, 0o644, 2);
    img.u32(data_start as u32);
    img.u32(0); // fragment table index
    img.u32(FRAG_PAD); // offset of our tail within the fragment block
    img.u32(FRAG_FILE_SIZE);
    img.u32(4096 | 0x0100_0000); // one full block, stored uncompressed
    // sparse.bin, inode 3, record offset 68
    img.inode_header(2, 0o644, 3);
    img.u32(sparse_data_start as u32);
    img.u32(!0); // no fragment
    img.u32(0);
    img.u32(SPARSE_FILE_SIZE);
    img.u32(0); // hole
    img.u32(10 | 0x0100_0000);

    // directory table
    let directory_table_start = img.pos();
    img.metablock_header(dir_body_len);
    img.u32(1); // entry count - 1
    img.u32(0); // inode block start
    img.u32(2); // reference inode number
    img.u16(32); // frag.bin record offset
    img.u16(0); // inode delta
    img.u16(2); // basic file
    img.u16(7); // name length - 1
    img.bytes(b"frag.bin");
    img.u16(68);
    img.u16(1);
    img.u16(2);
    img.u16(9);
    img.bytes(b"sparse.bin");

    // fragment table: one entry, one metadata block, one pointer
    let frag_entries_start = img.pos();
    img.metablock_header(16);
    img.u64(frag_block_start);
    img.u32(frag_block_len | 0x0100_0000);
    img.u32(0);
    let fragment_table_start = img.pos();
    img.u64(frag_entries_start);

    // id table: a single id, block plus pointer
    let id_entries_start = img.pos();
    img.metablock_header(4);
    img.u32(0);
    let id_table_start = img.pos();
    img.u64(id_entries_start);

    let bytes_used = img.pos();

    // superblock over the placeholder
    let mut sb = ImageBuilder::new(order);
    sb.buf.clear();
    sb.u32(0x7371_7368);
    sb.u32(3); // inodes
    sb.i32(1_600_000_000);
    sb.u32(BLOCK_SIZE);
    sb.u32(1); // fragment entries
    sb.u16(1); // gzip
    sb.u16(12); // block log
    sb.u16(0); // flags
    sb.u16(1); // id count
    sb.u16(4);
    sb.u16(0);
    sb.u64(0); // root inode ref: block 0, offset 0
    sb.u64(bytes_used);
    sb.u64(id_table_start);
    sb.u64(!0); // xattrs
    sb.u64(inode_table_start);
    sb.u64(directory_table_start);
    sb.u64(fragment_table_start);
    sb.u64(!0); // exports
    assert_eq!(sb.buf.len(), 96);

    let mut image = img.buf;
    image[..96].copy_from_slice(&sb.buf);
    image
}

fn expected_frag_contents() -> Vec<u8> {
    let mut all = frag_block_data();
    all.extend_from_slice(&frag_tail());
    assert_eq!(all.len(), FRAG_FILE_SIZE as usize);
    all
}

fn expected_sparse_contents() -> Vec<u8> {
    let mut all = vec![0u8; 4096];
    all.extend_from_slice(&sparse_tail());
    assert_eq!(all.len(), SPARSE_FILE_SIZE as usize);
    all
}

fn check_image(order: ByteOrder) {
    let archive = Archive::new(MemBuffer::from_vec(build_image(order))).unwrap();

    assert_eq!(archive.superblock().block_size, BLOCK_SIZE);
    assert_eq!(archive.superblock().fragment_entry_count, 1);

    let names: Vec<String> = archive
        .read_dir(".")
        .unwrap()
        .map(|e| e.unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["frag.bin", "sparse.bin"]);

    // whole-file reads
    assert_eq!(archive.read_file("frag.bin").unwrap(), expected_frag_contents());
    assert_eq!(
        archive.read_file("sparse.bin").unwrap(),
        expected_sparse_contents()
    );

    // reads crossing the block/fragment boundary
    let node = archive.open("frag.bin").unwrap();
    let file = node.into_file().unwrap();
    let mut span = [0u8; 64];
    let mut filled = 0;
    while filled < span.len() {
        let n = file.read_at(&mut span[filled..], 4096 - 32 + filled as u64).unwrap();
        assert!(n > 0);
        filled += n;
    }
    assert_eq!(&span[..], &expected_frag_contents()[4096 - 32..4096 + 32]);

    // reads strictly past the end
    let mut buf = [0u8; 8];
    assert_eq!(file.read_at(&mut buf, FRAG_FILE_SIZE.into()).unwrap(), 0);

    // stat sizes
    assert_eq!(archive.stat("frag.bin").unwrap().size(), FRAG_FILE_SIZE.into());
    assert_eq!(
        archive.stat("sparse.bin").unwrap().size(),
        SPARSE_FILE_SIZE.into()
    );
}

#[test]
fn fragments_and_sparse_blocks_little_endian() {
    check_image(ByteOrder::Le);
}

#[test]
fn fragments_and_sparse_blocks_big_endian() {
    check_image(ByteOrder::Be);
}

#[test]
fn bad_magic_is_a_format_error() {
    let mut image = build_image(ByteOrder::Le);
    image[0] = b'X';
    let err = Archive::new(MemBuffer::from_vec(image)).unwrap_err();
    assert_eq!(err.kind(), sqfs::ErrorKind::Format);
}

#[test]
fn bad_version_is_a_format_error() {
    let mut image = build_image(ByteOrder::Le);
    // version major lives at offset 28
    image[28] = 3;
    let err = Archive::new(MemBuffer::from_vec(image)).unwrap_err();
    assert_eq!(err.kind(), sqfs::ErrorKind::Format);
}

#[test]
fn mismatched_block_log_is_a_format_error() {
    let mut image = build_image(ByteOrder::Le);
    // block log lives at offset 22
    image[22] = 13;
    let err = Archive::new(MemBuffer::from_vec(image)).unwrap_err();
    assert_eq!(err.kind(), sqfs::ErrorKind::Format);
}

#[test]
fn truncated_image_is_corrupt() {
    let image = build_image(ByteOrder::Le);
    // Cut inside the inode table so root decoding hits a short read
    let err = Archive::new(MemBuffer::from_vec(image[..1000].to_vec())).unwrap_err();
    assert_eq!(err.kind(), sqfs::ErrorKind::Corruption);
}
