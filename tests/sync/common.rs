// Shared fixtures for sync tests

use bucketsync::fs::{index_records, list_local, LocalIndex, MemoryStore};
use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::TempDir;

/// A fixed point in time, `offset` seconds after 2024-01-01.
pub fn at(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset)
}

/// Temporary build directory with controllable mtimes.
pub struct BuildDir {
    dir: TempDir,
}

impl BuildDir {
    pub fn new() -> Self {
        Self { dir: TempDir::new().unwrap() }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `key` with the given content and modification time.
    pub fn file(&self, key: &str, content: &[u8], modified: DateTime<Utc>) -> PathBuf {
        let path = self.dir.path().join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::from(modified)).unwrap();
        path
    }

    /// Write a real gzip-compressed `key`, returning the compressed bytes.
    pub fn gzip(&self, key: &str, content: &[u8], modified: DateTime<Utc>) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        let compressed = encoder.finish().unwrap();
        self.file(key, &compressed, modified);
        compressed
    }

    pub fn index(&self) -> LocalIndex {
        index_records(list_local(self.path()).unwrap())
    }
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn keys<'a>(set: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
    set.into_iter().map(String::as_str).collect()
}
