//! Builders for test payloads.

use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

enum ZipEntry {
    Directory { name: String, mode: Option<u32> },
    File {
        name: String,
        content: Vec<u8>,
        mode: Option<u32>,
    },
}

/// In-memory description of a ZIP archive.
///
/// Entry names are written verbatim, so hostile names such as
/// `../escape.txt` can be produced for extraction tests.
#[derive(Default)]
pub struct ZipFixture {
    entries: Vec<ZipEntry>,
}

impl ZipFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.entries.push(ZipEntry::Directory {
            name: name.to_string(),
            mode: None,
        });
        self
    }

    pub fn directory_with_mode(mut self, name: &str, mode: u32) -> Self {
        self.entries.push(ZipEntry::Directory {
            name: name.to_string(),
            mode: Some(mode),
        });
        self
    }

    pub fn file(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        self.entries.push(ZipEntry::File {
            name: name.to_string(),
            content: content.as_ref().to_vec(),
            mode: None,
        });
        self
    }

    pub fn file_with_mode(mut self, name: &str, content: impl AsRef<[u8]>, mode: u32) -> Self {
        self.entries.push(ZipEntry::File {
            name: name.to_string(),
            content: content.as_ref().to_vec(),
            mode: Some(mode),
        });
        self
    }

    /// Add a `changes.json` with the given lists.
    pub fn manifest(self, added: &[&str], modified: &[&str], deleted: &[&str]) -> Self {
        let json = serde_json::json!({
            "added": added,
            "modified": modified,
            "deleted": deleted,
        });
        self.file(crate::constants::CHANGES_MANIFEST, json.to_string())
    }

    /// The archive bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            match entry {
                ZipEntry::Directory { name, mode } => {
                    let mut options = SimpleFileOptions::default();
                    if let Some(mode) = mode {
                        options = options.unix_permissions(*mode);
                    }
                    writer.add_directory(name.as_str(), options).unwrap();
                }
                ZipEntry::File {
                    name,
                    content,
                    mode,
                } => {
                    let mut options = SimpleFileOptions::default();
                    if let Some(mode) = mode {
                        options = options.unix_permissions(*mode);
                    }
                    writer.start_file(name.as_str(), options).unwrap();
                    writer.write_all(content).unwrap();
                }
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// Write the archive to `path` and return `path`.
    pub fn write_to(&self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, self.build()).unwrap();
        path.to_path_buf()
    }
}

/// Deterministic, non-repeating-looking bytes of length `len`.
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from((i * 31 + i / 251) % 251).unwrap())
        .collect()
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
