//! JSON document persistence for tracker state.
//!
//! Documents are rewritten in full: the payload goes to a temp file in the
//! target directory which is then renamed over the destination, so readers
//! never observe a half-written file.
//!
//! Writes are not fsynced. Trackers persist on every state change while
//! holding their lock, and a crash at worst loses the latest updates.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CollabError, CollabResult};

/// A JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    path: PathBuf,
}

impl JsonDocument {
    /// Document at `dir/file_name`.
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing file yields `None`.
    pub fn load<T: DeserializeOwned>(&self) -> CollabResult<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Replace the document atomically.
    pub fn store<T: Serialize>(&self, value: &T) -> CollabResult<()> {
        write_json_atomic(&self.path, value)
    }
}

/// Serialize `value` as pretty JSON and move it into place with a rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> CollabResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    temp.write_all(b"\n")?;
    temp.persist(path)
        .map_err(|e| CollabError::Io(e.error))?;
    Ok(())
}
