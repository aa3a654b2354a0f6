//! Build images with the writer and read them back through the archive
//! facade.

mod common;

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use sqfs::read::Archive;
use sqfs::write::{Entry, FileSource, Metadata, WriterBuilder};
use sqfs::MemBuffer;

use common::{build_archive, build_image};

#[test]
fn hello_world_file() {
    let archive = build_archive(131_072, |w| {
        w.add_file("file1.txt", Metadata::file(), &b"hello world"[..])
            .unwrap();
    });

    assert_eq!(archive.read_file("file1.txt").unwrap(), b"hello world");
    let info = archive.stat("file1.txt").unwrap();
    assert_eq!(info.size(), 11);
    assert!(info.is_file());

    let root = archive.stat(".").unwrap();
    assert!(root.is_dir());
}

#[test]
fn image_superblock_is_sane() {
    let image = build_image(131_072, |w| {
        w.add_file("a.txt", Metadata::file(), &b"contents"[..]).unwrap();
    });

    // magic, little endian
    assert_eq!(&image[..4], b"hsqs");

    let archive = Archive::new(MemBuffer::from_vec(image.clone())).unwrap();
    let sb = archive.superblock();
    assert_eq!(sb.bytes_used, image.len() as u64);
    assert_eq!(sb.inode_count, 2);
    for start in [
        sb.id_table_start,
        sb.inode_table_start,
        sb.directory_table_start,
    ] {
        assert!(start < sb.bytes_used, "table offset {} out of range", start);
    }
    assert_eq!(sb.fragment_table_start, u64::MAX);
    assert_eq!(sb.export_table_start, u64::MAX);
}

#[test]
fn deterministic_output() {
    let populate = |w: &mut sqfs::write::Writer| {
        w.add_dir("d", Metadata::dir()).unwrap();
        for i in 0..30 {
            w.add_file(
                &format!("d/file{:02}.txt", i),
                Metadata::file(),
                format!("contents {}", i).into_bytes(),
            )
            .unwrap();
        }
    };
    let first = build_image_with_epoch(populate);
    let second = build_image_with_epoch(populate);
    assert_eq!(first, second);
}

fn build_image_with_epoch<F>(populate: F) -> Vec<u8>
where
    F: FnOnce(&mut sqfs::write::Writer),
{
    let sink = Arc::new(MemBuffer::new());
    let mut builder = WriterBuilder::new();
    builder.set_modification_time(chrono::DateTime::from_timestamp(1_600_000_000, 0).unwrap());
    let mut writer = builder.build(Box::new(Arc::clone(&sink))).unwrap();
    populate(&mut writer);
    writer.finalize().unwrap();
    sink.to_vec()
}

#[test]
fn empty_file() {
    let archive = build_archive(131_072, |w| {
        w.add_file("empty", Metadata::file(), Vec::new()).unwrap();
    });

    assert_eq!(archive.stat("empty").unwrap().size(), 0);
    assert_eq!(archive.read_file("empty").unwrap(), Vec::<u8>::new());

    let node = archive.open("empty").unwrap();
    let mut file = node.into_file().unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(file.read_at(&mut buf, 0).unwrap(), 0);
    assert_eq!(std::io::Read::read(&mut file, &mut buf).unwrap(), 0);
}

#[test]
fn multi_block_file_reads_compose() {
    // 4 KiB blocks, ~2.5 blocks of patterned data
    let data: Vec<u8> = (0..10_500u32).map(|i| (i % 251) as u8).collect();
    let archive = build_archive(4096, |w| {
        w.add_file("blob.bin", Metadata::file(), data.clone()).unwrap();
    });

    let whole = archive.read_file("blob.bin").unwrap();
    assert_eq!(whole, data);

    let node = archive.open("blob.bin").unwrap();
    let file = node.into_file().unwrap();

    // Any partition of the range must concatenate to the same bytes
    for splits in [
        vec![0usize, 10_500],
        vec![0, 1, 10_500],
        vec![0, 4096, 8192, 10_500],
        vec![0, 4095, 4097, 9000, 10_500],
        vec![0, 2048, 6000, 8191, 8193, 10_500],
    ] {
        let mut collected = Vec::new();
        for pair in splits.windows(2) {
            let mut chunk = vec![0u8; pair[1] - pair[0]];
            let mut filled = 0;
            while filled < chunk.len() {
                let n = file
                    .read_at(&mut chunk[filled..], (pair[0] + filled) as u64)
                    .unwrap();
                assert!(n > 0);
                filled += n;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, data, "partition {:?}", splits);
    }

    // Reading past the end is a clean EOF
    let mut buf = [0u8; 8];
    assert_eq!(file.read_at(&mut buf, 10_500).unwrap(), 0);
    assert_eq!(file.read_at(&mut buf, 1u64 << 30).unwrap(), 0);
}

#[test]
fn file_handle_seeks() {
    let data = b"0123456789abcdef".to_vec();
    let archive = build_archive(4096, |w| {
        w.add_file("f", Metadata::file(), data.clone()).unwrap();
    });

    let mut file = archive.open("f").unwrap().into_file().unwrap();
    file.seek(SeekFrom::End(-6)).unwrap();
    let mut out = String::new();
    file.read_to_string(&mut out).unwrap();
    assert_eq!(out, "abcdef");

    file.seek(SeekFrom::Start(2)).unwrap();
    let mut two = [0u8; 2];
    file.read_exact(&mut two).unwrap();
    assert_eq!(&two, b"23");
}

#[test]
fn thousand_entry_directory() {
    let archive = build_archive(131_072, |w| {
        w.add_dir("bigdir", Metadata::dir()).unwrap();
        for i in 0..1000 {
            w.add_file(
                &format!("bigdir/{:04}.txt", i),
                Metadata::file(),
                format!("entry {}", i).into_bytes(),
            )
            .unwrap();
        }
    });

    let entries: Vec<_> = archive
        .read_dir("bigdir")
        .unwrap()
        .collect::<sqfs::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 1000);

    // Directory entries come back sorted by name
    let names: Vec<String> = entries.iter().map(|e| e.name().to_string()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    // A middle entry resolves and reads
    assert_eq!(
        archive.read_file("bigdir/0500.txt").unwrap(),
        b"entry 500"
    );
    assert_eq!(archive.stat("bigdir/0999.txt").unwrap().size(), 9);
}

#[test]
fn directory_kind_boundary_at_256_children() {
    use repr::inode::Kind;

    let archive = build_archive(131_072, |w| {
        w.add_dir("exact", Metadata::dir()).unwrap();
        for i in 0..256 {
            w.add_file(&format!("exact/{:03}", i), Metadata::file(), Vec::new())
                .unwrap();
        }
        w.add_dir("over", Metadata::dir()).unwrap();
        for i in 0..257 {
            w.add_file(&format!("over/{:03}", i), Metadata::file(), Vec::new())
                .unwrap();
        }
    });

    let exact = archive.find_inode("exact", true).unwrap();
    assert_eq!(exact.kind(), Kind::BASIC_DIR);

    let over = archive.find_inode("over", true).unwrap();
    assert_eq!(over.kind(), Kind::EXT_DIR);

    // Both extremes of the indexed directory resolve
    assert!(archive.stat("over/000").unwrap().is_file());
    assert!(archive.stat("over/256").unwrap().is_file());
    assert!(archive.stat("over/257").is_err());

    assert_eq!(archive.read_dir("over").unwrap().count(), 257);
    assert_eq!(archive.read_dir("exact").unwrap().count(), 256);
}

#[test]
fn indexed_lookup_in_wide_directory() {
    use repr::inode::Kind;

    let archive = build_archive(131_072, |w| {
        w.add_dir("wide", Metadata::dir()).unwrap();
        for i in 0..5000 {
            w.add_file(
                &format!("wide/{:05}.txt", i),
                Metadata::file(),
                format!("{}", i).into_bytes(),
            )
            .unwrap();
        }
    });

    let wide = archive.find_inode("wide", true).unwrap();
    assert_eq!(wide.kind(), Kind::EXT_DIR);

    // Lookups land all over the index
    assert_eq!(archive.read_file("wide/00000.txt").unwrap(), b"0");
    assert_eq!(archive.read_file("wide/02500.txt").unwrap(), b"2500");
    assert_eq!(archive.read_file("wide/04999.txt").unwrap(), b"4999");
    assert!(archive.read_file("wide/05000.txt").is_err());
    assert!(archive.stat("wide/0").is_err());
}

#[test]
fn deep_nesting() {
    let depth = 25;
    let mut path = String::new();
    let archive = build_archive(131_072, |w| {
        let mut dir = String::new();
        for level in 0..depth {
            if !dir.is_empty() {
                dir.push('/');
            }
            dir.push_str(&format!("level{:02}", level));
            w.add_dir(&dir, Metadata::dir()).unwrap();
        }
        w.add_file(
            &format!("{}/deepest.txt", dir),
            Metadata::file(),
            &b"deepest file"[..],
        )
        .unwrap();
    });

    for level in 0..depth {
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(&format!("level{:02}", level));
        let info = archive.stat(&path).unwrap();
        assert!(info.is_dir(), "{} should be a directory", path);
        assert_eq!(archive.read_dir(&path).unwrap().count(), 1);
    }

    assert_eq!(
        archive.read_file(&format!("{}/deepest.txt", path)).unwrap(),
        b"deepest file"
    );
}

#[test]
fn metadata_round_trips() {
    use sqfs::Mode;

    let mtime = chrono::DateTime::from_timestamp(1_234_567_890, 0).unwrap();
    let archive = build_archive(131_072, |w| {
        let meta = Metadata {
            mode: Mode::from_bits_truncate(0o640),
            uid: 1000,
            gid: 100,
            modified_time: Some(mtime),
        };
        w.add_file("owned.txt", meta, &b"data"[..]).unwrap();
    });

    let info = archive.stat("owned.txt").unwrap();
    assert_eq!(info.uid(), 1000);
    assert_eq!(info.gid(), 100);
    assert_eq!(info.mtime(), 1_234_567_890);
    assert_eq!(info.mode().permissions().bits(), 0o640);
    assert_eq!(format!("{}", info.mode()), "-rw-r-----");
}

#[test]
fn special_inodes_round_trip() {
    let archive = build_archive(131_072, |w| {
        w.add("fifo", Metadata::with_mode(sqfs::Mode::O644), Entry::Fifo)
            .unwrap();
        w.add("sock", Metadata::with_mode(sqfs::Mode::O644), Entry::Socket)
            .unwrap();
        w.add(
            "dev/null0",
            Metadata::with_mode(sqfs::Mode::O644),
            Entry::CharDev(0),
        )
        .unwrap_err();
        w.add_dir("dev", Metadata::dir()).unwrap();
        w.add(
            "dev/null0",
            Metadata::with_mode(sqfs::Mode::O644),
            Entry::CharDev(0),
        )
        .unwrap();
        w.add(
            "dev/loop0",
            Metadata::with_mode(sqfs::Mode::O644),
            Entry::BlockDev(0),
        )
        .unwrap();
    });

    use repr::inode::Kind;
    assert_eq!(
        archive.find_inode("fifo", false).unwrap().kind(),
        Kind::BASIC_FIFO
    );
    assert_eq!(
        archive.find_inode("sock", false).unwrap().kind(),
        Kind::BASIC_SOCKET
    );
    let dev = archive.find_inode("dev/null0", false).unwrap();
    assert_eq!(dev.kind(), Kind::BASIC_CHAR_DEV);
    assert_eq!(dev.rdev(), Some(0));
    assert_eq!(
        archive.find_inode("dev/loop0", false).unwrap().kind(),
        Kind::BASIC_BLOCK_DEV
    );
}

#[test]
fn file_from_reader_source() {
    let archive = build_archive(131_072, |w| {
        let reader = std::io::Cursor::new(b"streamed contents".to_vec());
        w.add(
            "streamed.txt",
            Metadata::file(),
            Entry::File(FileSource::Reader(Box::new(reader))),
        )
        .unwrap();
    });

    assert_eq!(
        archive.read_file("streamed.txt").unwrap(),
        b"streamed contents"
    );
}

#[test]
fn decoding_is_stable() {
    let archive = build_archive(131_072, |w| {
        w.add_dir("d", Metadata::dir()).unwrap();
        w.add_file("d/x", Metadata::file(), &b"x"[..]).unwrap();
    });

    let first = archive.find_inode("d/x", true).unwrap();
    let second = archive.find_inode("d/x", true).unwrap();
    assert_eq!(first.inode_number(), second.inode_number());
    assert_eq!(first.kind(), second.kind());
    assert_eq!(first.size(), second.size());
    assert_eq!(first.mode(), second.mode());
    assert_eq!(first.mtime(), second.mtime());
}
