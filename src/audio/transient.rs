use anyhow::{Context, Result};
use std::{fs, path::Path};
use tempfile::TempPath;

use super::NoiseKind;

/// A rendered audio file that exists only as long as this guard does.
/// Dropping the guard deletes the file, on success and failure paths alike.
#[derive(Debug)]
pub struct TransientAudio {
    path: TempPath,
}

impl TransientAudio {
    /// Reserves an empty, uniquely named `<kind>-*.wav` in `dir` for a
    /// renderer to overwrite.
    pub fn new_in(dir: &Path, kind: NoiseKind) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create audio work dir {}", dir.display()))?;
        let path = tempfile::Builder::new()
            .prefix(&format!("{}-", kind.slug()))
            .suffix(".wav")
            .tempfile_in(dir)
            .with_context(|| format!("failed to reserve a {kind} file in {}", dir.display()))?
            .into_temp_path();
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0)
    }
}
