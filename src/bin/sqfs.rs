//! `sqfs` - inspect squashfs archives from the command line.

use std::io::Write as _;
use std::process::ExitCode;

use sqfs::read::Archive;

const USAGE: &str = "sqfs - SquashFS CLI tool

Usage:
  sqfs ls <squashfs_file> [<path>]          List files in a SquashFS archive
  sqfs cat <squashfs_file> <file>           Print the contents of a file
  sqfs info <squashfs_file>                 Show information about an archive
  sqfs help                                 Show this help message

Examples:
  sqfs ls archive.squashfs                  List files at the root of archive.squashfs
  sqfs ls archive.squashfs lib              List files in the lib directory
  sqfs cat archive.squashfs dir/file.txt    Print file.txt from archive.squashfs
  sqfs info archive.squashfs                Show metadata about archive.squashfs
";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    let result = match args[1].as_str() {
        "ls" => {
            if args.len() < 3 {
                eprintln!("Error: missing SquashFS file path");
                println!("{}", USAGE);
                return ExitCode::FAILURE;
            }
            let path = args.get(3).map(String::as_str).unwrap_or(".");
            list_files(&args[2], path)
        }
        "cat" => {
            if args.len() < 4 {
                eprintln!("Error: missing SquashFS file path or target file");
                println!("{}", USAGE);
                return ExitCode::FAILURE;
            }
            cat_file(&args[2], &args[3])
        }
        "info" => {
            if args.len() < 3 {
                eprintln!("Error: missing SquashFS file path");
                println!("{}", USAGE);
                return ExitCode::FAILURE;
            }
            show_info(&args[2])
        }
        "help" => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        other => {
            eprintln!("Error: unknown command '{}'", other);
            println!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn list_files(image: &str, dir: &str) -> sqfs::Result<()> {
    let archive = Archive::open(image)?;

    for entry in archive.read_dir(dir)? {
        let entry = entry?;
        let display = if dir == "." {
            entry.name().to_string()
        } else {
            format!("{}/{}", dir, entry.name())
        };
        match archive.entry_info(&entry) {
            Ok(info) => {
                let size = if info.is_dir() {
                    "       -".to_string()
                } else {
                    format!("{:8}", info.size())
                };
                println!("{} {} {}", info.mode(), size, display);
            }
            Err(err) => {
                eprintln!("Warning: failed to stat '{}': {}", display, err);
            }
        }
    }
    Ok(())
}

fn cat_file(image: &str, path: &str) -> sqfs::Result<()> {
    let archive = Archive::open(image)?;
    let data = archive.read_file(path)?;
    std::io::stdout()
        .write_all(&data)
        .map_err(sqfs::Error::from)?;
    Ok(())
}

fn show_info(image: &str) -> sqfs::Result<()> {
    let archive = Archive::open(image)?;
    let sb = archive.superblock();

    println!("SquashFS Archive Information");
    println!("===========================");
    println!("Version:          {}.{}", sb.version_major, sb.version_minor);
    println!("Creation time:    {} (unix)", sb.modification_time);
    println!("Block size:       {} bytes", sb.block_size);
    println!("Compression:      {}", sb.compression_id);
    println!("Flags:            {:?}", sb.flags);
    println!("Total size:       {} bytes", sb.bytes_used);
    println!("Inode count:      {}", sb.inode_count);
    println!("Fragment count:   {}", sb.fragment_entry_count);
    println!("ID count:         {}", sb.id_count);

    let mut files = 0u64;
    let mut dirs = 0u64;
    let mut symlinks = 0u64;
    census(&archive, ".", &mut files, &mut dirs, &mut symlinks);

    println!();
    println!("Content Summary");
    println!("--------------");
    println!("Directories:      {}", dirs);
    println!("Regular files:    {}", files);
    println!("Symlinks:         {}", symlinks);

    Ok(())
}

fn census(
    archive: &Archive<positioned_io::RandomAccessFile>,
    dir: &str,
    files: &mut u64,
    dirs: &mut u64,
    symlinks: &mut u64,
) {
    let entries = match archive.read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    let mut subdirs = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        if entry.is_dir() {
            *dirs += 1;
            let sub = if dir == "." {
                entry.name().to_string()
            } else {
                format!("{}/{}", dir, entry.name())
            };
            subdirs.push(sub);
        } else if entry.is_symlink() {
            *symlinks += 1;
        } else {
            *files += 1;
        }
    }
    for sub in subdirs {
        census(archive, &sub, files, dirs, symlinks);
    }
}
