//! Local scratch payloads for uploads and download targets.

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Write `<6 random hex chars><file_name>` into `dir`, containing `content`
/// repeated `size` times, and return its path.
pub async fn create_temp_file(
    dir: &Path,
    size: usize,
    file_name: &str,
    content: impl Display,
) -> io::Result<PathBuf> {
    let mut name = Uuid::new_v4().simple().to_string();
    name.truncate(6);
    name.push_str(file_name);
    let path = dir.join(name);
    fs::write(&path, content.to_string().repeat(size)).await?;
    Ok(path)
}

/// A scratch directory that remembers the files written into it and removes
/// them when dropped, unless told to keep them. Directories left empty by the
/// cleanup go too, including the scratch root if this space created it.
pub struct ScratchSpace {
    dir: PathBuf,
    files: Vec<PathBuf>,
    keep: bool,
    created_dir: bool,
}

impl ScratchSpace {
    pub async fn new(dir: impl Into<PathBuf>, keep: bool) -> io::Result<Self> {
        let dir = dir.into();
        let created_dir = !fs::try_exists(&dir).await?;
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            files: Vec::new(),
            keep,
            created_dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// [`create_temp_file`] inside this scratch space.
    pub async fn create_file(
        &mut self,
        size: usize,
        file_name: &str,
        content: impl Display,
    ) -> io::Result<PathBuf> {
        let path = create_temp_file(&self.dir, size, file_name, content).await?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Reserve `<scratch>/<relative>` for a file someone else will write.
    pub fn track(&mut self, relative: impl AsRef<Path>) -> PathBuf {
        let path = self.dir.join(relative);
        self.files.push(path.clone());
        path
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let files: Vec<PathBuf> = self.files.drain(..).collect();
        for file in &files {
            if let Err(err) = std::fs::remove_file(file) {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!("could not remove scratch file {}: {}", file.display(), err);
                }
            }
        }
        for file in &files {
            if let Some(parent) = file.parent() {
                self.prune_empty_dirs(parent);
            }
        }
        if self.created_dir {
            self.prune_empty_dirs(&self.dir);
        }
    }
}

impl ScratchSpace {
    /// Remove `start` and its parents while they are empty, stopping at the
    /// scratch root unless this space created it.
    fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start;
        while current.starts_with(&self.dir) {
            if current == self.dir && !self.created_dir {
                break;
            }
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            debug!("removed empty scratch directory {}", current.display());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
}
