use std::path::{Path, PathBuf};

use pbi_error::{ErrorCode, Failure};

/// Reads pack documents from addressable storage.
///
/// Modeled as an abstract capability so sealing and verification run
/// unchanged whether the pack lives on a filesystem, is embedded in a
/// test fixture, or (for a future host) sits in an object store.
pub trait ByteSource {
    /// Read the full contents of `path`, relative to the pack root.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidStructure`] if `path` cannot be read.
    fn read(&self, path: &str) -> Result<Vec<u8>, Failure>;

    /// List the entries directly inside `dir` (relative to the pack
    /// root), as bare file-stem ids with their extensions stripped,
    /// sorted in ascending lexicographic ASCII order. This is the pack's
    /// canonical receipt and Merkle-leaf order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InvalidStructure`] if `dir` cannot be listed.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>, Failure>;
}

/// A [`ByteSource`] backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsByteSource {
    root: PathBuf,
}

impl FsByteSource {
    /// Build a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(Path::new(path))
    }
}

impl ByteSource for FsByteSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, Failure> {
        std::fs::read(self.resolve(path))
            .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, format!("{path}: {e}")))
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>, Failure> {
        let entries = std::fs::read_dir(self.resolve(dir))
            .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, format!("{dir}: {e}")))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, format!("{dir}: {e}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let stem = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "unreadable file name"))?;
            ids.push(stem);
        }
        ids.sort();
        Ok(ids)
    }
}
