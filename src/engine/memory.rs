use super::EngineFs;
use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Ephemeral in-memory filesystem with explicit directories.
#[derive(Debug)]
pub struct MemoryFs {
    inner: Mutex<Tree>,
}

#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut tree = Tree::default();
        tree.dirs.insert("/".to_string());
        Self {
            inner: Mutex::new(tree),
        }
    }

    /// Every file path currently present, sorted.
    pub fn files(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

impl EngineFs for MemoryFs {
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        if !tree.dirs.contains(parent(&path)) {
            bail!("write {path}: no such directory");
        }
        if tree.dirs.contains(&path) {
            bail!("write {path}: is a directory");
        }
        tree.files.insert(path, bytes.to_vec());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        self.lock()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| anyhow!("read {path}: no such file"))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let dir = normalize(path);
        let tree = self.lock();
        if !tree.dirs.contains(&dir) {
            bail!("list {dir}: no such directory");
        }
        let names = tree
            .dirs
            .iter()
            .chain(tree.files.keys())
            .filter(|p| p.as_str() != dir && parent(p) == dir)
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect();
        Ok(names)
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        if tree.dirs.contains(&path) || tree.files.contains_key(&path) {
            bail!("mkdir {path}: already exists");
        }
        if !tree.dirs.contains(parent(&path)) {
            bail!("mkdir {path}: no such parent directory");
        }
        tree.dirs.insert(path);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        self.lock()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unlink {path}: no such file"))
    }
}
