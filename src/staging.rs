//! Conventions for moving documents in and out of the engine's filesystem.
//!
//! Every invocation stages its input under [`STAGING_DIR`], lets the engine
//! write outputs, reads them back and removes everything it touched. The
//! [`Staging`] guard performs that removal on drop, so early returns and
//! failed invocations clean up the same way as successful ones.

use crate::engine::EngineFs;
use anyhow::{Context, Result};
use tracing::debug;

pub const STAGING_DIR: &str = "/tmp";
pub const OUTPUT_DIR: &str = "/tmp/output";
pub const INPUT_PATH: &str = "/tmp/input.pdf";
pub const ANALYZE_PATH: &str = "/tmp/analyze.pdf";
pub const OPTIMIZED_PATH: &str = "/tmp/output.pdf";

pub const PAGE_PREFIX: &str = "page-";
pub const PAGE_EXT: &str = ".png";

/// `-sOutputFile` template; the engine substitutes the page number for `%d`.
pub fn page_output_template() -> String {
    format!("{OUTPUT_DIR}/{PAGE_PREFIX}%d{PAGE_EXT}")
}

/// Create-or-ignore: an existing directory is not an error.
pub fn ensure_dirs(fs: &dyn EngineFs, dirs: &[&str]) {
    for dir in dirs {
        if let Err(err) = fs.make_dir(dir) {
            debug!("mkdir {dir} ignored: {err:#}");
        }
    }
}

/// Numeric id of a page output (`page-12.png` → 12).
pub fn page_id(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(PAGE_PREFIX)?.strip_suffix(PAGE_EXT)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Page outputs in ascending numeric order. Lexical order would put
/// `page-10` before `page-2`.
pub fn sort_page_outputs(names: &[String]) -> Vec<(u32, String)> {
    let mut pages: Vec<(u32, String)> = names
        .iter()
        .filter_map(|n| page_id(n).map(|id| (id, n.clone())))
        .collect();
    pages.sort_by_key(|(id, _)| *id);
    pages
}

/// Tracks staged paths for one invocation and removes them on drop.
pub struct Staging<'a> {
    fs: &'a dyn EngineFs,
    files: Vec<String>,
    sweep: Vec<String>,
}

impl<'a> Staging<'a> {
    pub fn new(fs: &'a dyn EngineFs) -> Self {
        Self {
            fs,
            files: Vec::new(),
            sweep: Vec::new(),
        }
    }

    /// Writes the input document and schedules it for removal.
    pub fn stage_input(&mut self, path: &str, document: &[u8]) -> Result<()> {
        self.files.push(path.to_string());
        self.fs
            .write(path, document)
            .with_context(|| format!("staging input {path}"))
    }

    /// Schedules an output path the engine is expected to create.
    pub fn expect_output(&mut self, path: &str) {
        self.files.push(path.to_string());
    }

    /// Empties `dir` now and again at cleanup time. Outputs left behind by an
    /// earlier invocation never reach the next result.
    pub fn sweep_dir(&mut self, dir: &str) {
        self.clear_dir(dir);
        self.sweep.push(dir.to_string());
    }

    fn clear_dir(&self, dir: &str) {
        if let Ok(names) = self.fs.list(dir) {
            for name in names {
                let _ = self.fs.remove(&format!("{dir}/{name}"));
            }
        }
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.fs
            .read(path)
            .with_context(|| format!("reading staged output {path}"))
    }

    /// Reads page outputs from `dir`, ordered by page number.
    pub fn collect_pages(&self, dir: &str) -> Result<Vec<Vec<u8>>> {
        let names = self
            .fs
            .list(dir)
            .with_context(|| format!("listing {dir}"))?;
        sort_page_outputs(&names)
            .into_iter()
            .map(|(_, name)| self.read(&format!("{dir}/{name}")))
            .collect()
    }

    fn cleanup(&mut self) {
        for path in self.files.drain(..) {
            let _ = self.fs.remove(&path);
        }
        for dir in std::mem::take(&mut self.sweep) {
            self.clear_dir(&dir);
        }
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
