//! Archive and release-index fixtures.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::path::Path;
use tar::{EntryType, Header};

/// One entry of an in-memory tar.gz.
#[derive(Debug, Clone)]
pub enum Entry {
    File {
        name: &'static str,
        mode: u32,
        data: Vec<u8>,
    },
    Dir {
        name: &'static str,
    },
    Symlink {
        name: &'static str,
        target: &'static str,
    },
}

pub fn file(name: &'static str, mode: u32, data: &[u8]) -> Entry {
    Entry::File {
        name,
        mode,
        data: data.to_vec(),
    }
}

/// Raw GNU header so names like `../../etc/passwd` survive as written.
fn header(name: &str, entry_type: EntryType, size: u64, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(1_700_000_000);
    {
        let gnu = header.as_gnu_mut().unwrap();
        let bytes = name.as_bytes();
        assert!(bytes.len() < gnu.name.len(), "fixture name too long: {name}");
        gnu.name[..bytes.len()].copy_from_slice(bytes);
    }
    header
}

pub fn tar_gz(entries: &[Entry]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for entry in entries {
        match entry {
            Entry::File { name, mode, data } => {
                let mut h = header(name, EntryType::Regular, data.len() as u64, *mode);
                h.set_cksum();
                builder.append(&h, data.as_slice()).unwrap();
            }
            Entry::Dir { name } => {
                let mut h = header(name, EntryType::Directory, 0, 0o755);
                h.set_cksum();
                builder.append(&h, std::io::empty()).unwrap();
            }
            Entry::Symlink { name, target } => {
                let mut h = header(name, EntryType::Symlink, 0, 0o777);
                {
                    let gnu = h.as_gnu_mut().unwrap();
                    gnu.linkname[..target.len()].copy_from_slice(target.as_bytes());
                }
                h.set_cksum();
                builder.append(&h, std::io::empty()).unwrap();
            }
        }
    }

    builder.into_inner().unwrap().finish().unwrap()
}

pub fn write_tar_gz(path: &Path, entries: &[Entry]) {
    std::fs::write(path, tar_gz(entries)).unwrap();
}

pub fn release(tag: &str, published_at: Option<&str>, prerelease: bool) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "name": tag,
        "published_at": published_at,
        "prerelease": prerelease,
        "assets": [],
    })
}

/// Deterministic non-repeating payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

/// Sorted file names directly under `dir`.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
