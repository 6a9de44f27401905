use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of a corpus run:
///
/// ```text
/// <root>/current/<qualified>        post-change content
/// <root>/original/<qualified>       reconstructed pre-change content
/// <root>/patch/<qualified>.diff     patch text
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the three storage areas.
    pub fn prepare(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.root.join("current"))?;
        fs::create_dir_all(self.root.join("original"))?;
        fs::create_dir_all(self.root.join("patch"))?;
        Ok(())
    }

    pub fn current_path(&self, qualified: &str) -> PathBuf {
        self.root.join("current").join(qualified)
    }

    pub fn original_path(&self, qualified: &str) -> PathBuf {
        self.root.join("original").join(qualified)
    }

    pub fn patch_path(&self, qualified: &str) -> PathBuf {
        self.root.join("patch").join(format!("{qualified}.diff"))
    }

    pub fn write_current(&self, qualified: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.current_path(qualified);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Write the patch text, terminated by a newline as patch tools require.
    pub fn write_patch(&self, qualified: &str, patch: &str) -> std::io::Result<PathBuf> {
        let path = self.patch_path(qualified);
        if patch.ends_with('\n') {
            fs::write(&path, patch)?;
        } else {
            fs::write(&path, format!("{patch}\n"))?;
        }
        Ok(path)
    }

    /// Seed the original area with the post-change content; the reverse patch
    /// then rewrites it in place.
    pub fn seed_original(&self, qualified: &str) -> std::io::Result<PathBuf> {
        let path = self.original_path(qualified);
        fs::copy(self.current_path(qualified), &path)?;
        Ok(path)
    }

    /// Drop a stale reconstruction left over from an earlier run.
    pub fn discard_original(&self, qualified: &str) -> std::io::Result<()> {
        remove_if_present(&self.original_path(qualified))
    }

    /// Drop a stale patch left over from an earlier run.
    pub fn discard_patch(&self, qualified: &str) -> std::io::Result<()> {
        remove_if_present(&self.patch_path(qualified))
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
