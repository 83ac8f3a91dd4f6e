//! The engine's sandboxed filesystem.
//!
//! Paths are guest paths: absolute, `/`-separated, interpreted inside the
//! sandbox. Two backends are provided:
//!
//! - [`MemFs`]: a purely in-memory tree.
//! - [`HostDirFs`]: a host directory standing in for the guest root, which
//!   is what a WASI runtime preopens.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::FsError;

/// Filesystem operations the worker needs from the engine's sandbox.
#[async_trait]
pub trait VirtualFs: Send + Sync {
    /// Create directory `name` inside `parent`. An existing directory is not
    /// an error. Returns the created path.
    async fn create_path(&self, parent: &str, name: &str) -> Result<String, FsError>;

    /// Create or replace a file. The parent directory must exist.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Delete a file.
    async fn unlink(&self, path: &str) -> Result<(), FsError>;
}

/// Split a guest path into normalized components.
///
/// `.` and empty segments vanish; `..` pops and may not climb above `/`.
pub fn components(path: &str) -> Result<Vec<&str>, FsError> {
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::Escape(path.to_string()));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts)
}

/// Normalize a guest path to its absolute form.
pub fn canonical(path: &str) -> Result<String, FsError> {
    Ok(format!("/{}", components(path)?.join("/")))
}

/// Join a child name onto a directory path.
pub fn join(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name)
}

/// Create every directory along `path`, starting at the root.
pub async fn ensure_path<F: VirtualFs + ?Sized>(fs: &F, path: &str) -> Result<(), FsError> {
    let mut current = "/".to_string();
    for part in components(path)? {
        current = fs.create_path(&current, part).await?;
    }
    Ok(())
}

fn parent_of(canonical: &str) -> &str {
    match canonical.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &canonical[..i],
    }
}

#[derive(Debug)]
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

/// In-memory filesystem.
#[derive(Debug)]
pub struct MemFs {
    tree: Mutex<Tree>,
}

impl MemFs {
    /// An empty filesystem containing only `/`.
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            tree: Mutex::new(Tree {
                dirs,
                files: BTreeMap::new(),
            }),
        }
    }

    fn tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        canonical(path).is_ok_and(|p| self.tree().dirs.contains(&p))
    }

    pub fn is_file(&self, path: &str) -> bool {
        canonical(path).is_ok_and(|p| self.tree().files.contains_key(&p))
    }

    /// All file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        self.tree().files.keys().cloned().collect()
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    fn require_dir(&self, path: &str) -> Result<(), FsError> {
        if self.dirs.contains(path) {
            Ok(())
        } else if self.files.contains_key(path) {
            Err(FsError::NotADirectory(path.to_string()))
        } else {
            Err(FsError::NotFound(path.to_string()))
        }
    }
}

#[async_trait]
impl VirtualFs for MemFs {
    async fn create_path(&self, parent: &str, name: &str) -> Result<String, FsError> {
        let parent = canonical(parent)?;
        let target = canonical(&join(&parent, name))?;
        let mut tree = self.tree();
        tree.require_dir(&parent)?;
        if tree.files.contains_key(&target) {
            return Err(FsError::NotADirectory(target));
        }
        tree.dirs.insert(target.clone());
        Ok(target)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let path = canonical(path)?;
        let mut tree = self.tree();
        if tree.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        tree.require_dir(parent_of(&path))?;
        tree.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = canonical(path)?;
        let tree = self.tree();
        if tree.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        tree.files.get(&path).cloned().ok_or(FsError::NotFound(path))
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let path = canonical(path)?;
        let mut tree = self.tree();
        if tree.dirs.contains(&path) {
            return Err(FsError::IsADirectory(path));
        }
        match tree.files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path)),
        }
    }
}

/// Filesystem rooted in a host directory.
///
/// Guest `/` maps to `root`; guest paths can never resolve outside it.
#[derive(Debug, Clone)]
pub struct HostDirFs {
    root: PathBuf,
}

impl HostDirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Host location of a guest path.
    pub fn host_path(&self, guest: &str) -> Result<PathBuf, FsError> {
        let mut path = self.root.clone();
        for part in components(guest)? {
            path.push(part);
        }
        Ok(path)
    }
}

fn io_error(path: &str, source: std::io::Error) -> FsError {
    match source.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        _ => FsError::Io {
            path: path.to_string(),
            source,
        },
    }
}

#[async_trait]
impl VirtualFs for HostDirFs {
    async fn create_path(&self, parent: &str, name: &str) -> Result<String, FsError> {
        let target = canonical(&join(parent, name))?;
        let host = self.host_path(&target)?;
        match tokio::fs::create_dir(&host).await {
            Ok(()) => Ok(target),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let meta = tokio::fs::metadata(&host)
                    .await
                    .map_err(|e| io_error(&target, e))?;
                if meta.is_dir() {
                    Ok(target)
                } else {
                    Err(FsError::NotADirectory(target))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(FsError::NotFound(canonical(parent)?))
            }
            Err(e) => Err(io_error(&target, e)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let host = self.host_path(path)?;
        if let Ok(meta) = tokio::fs::metadata(&host).await {
            if meta.is_dir() {
                return Err(FsError::IsADirectory(canonical(path)?));
            }
        }
        tokio::fs::write(&host, data)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let host = self.host_path(path)?;
        tokio::fs::read(&host).await.map_err(|e| io_error(path, e))
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let host = self.host_path(path)?;
        tokio::fs::remove_file(&host)
            .await
            .map_err(|e| io_error(path, e))
    }
}
