use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use uuid::Uuid;

/// A uniquely named scratch directory, removed when dropped
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;

        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("exec-{}-", id.simple()))
            .tempdir_in(root)
            .context("Failed to create workspace directory")?;

        log::debug!("Created workspace {}", dir.path().display());
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Copies every regular file of `other` into this workspace, permissions included
    pub fn copy_from(&self, other: &Workspace) -> Result<()> {
        for entry in fs::read_dir(other.path())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), self.path().join(entry.file_name()))
                    .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            }
        }
        Ok(())
    }

    /// Removes the directory now, reporting failures instead of ignoring them
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove workspace {}", path.display()))
    }
}
