//! Artifact sink collaborator interface.
//!
//! Local disk and remote object storage are abstracted identically; paths are
//! sink-relative keys.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;

/// Byte-level artifact storage.
pub trait ArtifactSink: Send + Sync {
    fn write(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()>;

    /// Append to an existing artifact (creating it when absent); the merge
    /// step uses this to stream one chunk at a time.
    fn append(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()>;

    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    fn delete(&self, path: &str) -> anyhow::Result<()>;
}

/// In-memory sink for tests/dev.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactSink {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored path, sorted; handy for asserting cleanup.
    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl ArtifactSink for InMemoryArtifactSink {
    fn write(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.files
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .with_context(|| format!("artifact not found: {path}"))
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Filesystem sink rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            anyhow::bail!("artifact path escapes the sink root: {path}");
        }
        Ok(self.root.join(relative))
    }

    fn ensure_parent(full: &Path) -> anyhow::Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(())
    }
}

impl ArtifactSink for FsArtifactSink {
    fn write(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        fs::write(&full, bytes).with_context(|| format!("writing {path}"))
    }

    fn append(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        Self::ensure_parent(&full)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .with_context(|| format!("opening {path}"))?;
        file.write_all(bytes)
            .with_context(|| format!("appending to {path}"))
    }

    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).with_context(|| format!("reading {path}"))
    }

    fn delete(&self, path: &str) -> anyhow::Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).with_context(|| format!("deleting {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let sink = InMemoryArtifactSink::new();

        sink.write("exports/a.csv", b"id\n").unwrap();
        sink.append("exports/a.csv", b"1\n").unwrap();
        assert_eq!(sink.read("exports/a.csv").unwrap(), b"id\n1\n");

        sink.delete("exports/a.csv").unwrap();
        assert!(sink.read("exports/a.csv").is_err());
        assert!(sink.paths().is_empty());
    }

    #[test]
    fn fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path());

        sink.write("exports/job/a.csv", b"id\n").unwrap();
        sink.append("exports/job/a.csv", b"1\n").unwrap();
        assert_eq!(sink.read("exports/job/a.csv").unwrap(), b"id\n1\n");

        sink.delete("exports/job/a.csv").unwrap();
        assert!(sink.read("exports/job/a.csv").is_err());
    }

    #[test]
    fn fs_append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path());

        sink.append("fresh.csv", b"row\n").unwrap();
        assert_eq!(sink.read("fresh.csv").unwrap(), b"row\n");
    }

    #[test]
    fn fs_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsArtifactSink::new(dir.path());

        assert!(sink.write("../outside.csv", b"x").is_err());
        assert!(sink.write("/etc/hostname", b"x").is_err());
    }
}
