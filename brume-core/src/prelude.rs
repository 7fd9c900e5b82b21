//! Bundled prelude sources.
//!
//! Every `.brm` file under the prelude root is compiled ahead of the unit into
//! a shared `prelude` module scope.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreludeFile {
    /// Relative to the prelude root.
    pub path: PathBuf,
    pub contents: String,
}

pub fn default_prelude_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../prelude")
}

/// Reads every `.brm` file below `root`, sorted by relative path.
pub fn load_prelude_files(root: impl AsRef<Path>) -> Result<Vec<PreludeFile>, CoreError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(CoreError::MissingPrelude(root.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "brm") {
            let contents = fs::read_to_string(path)?;
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            files.push(PreludeFile {
                path: relative,
                contents,
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = files.len(), "loaded prelude");
    Ok(files)
}
