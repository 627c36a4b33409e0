pub mod memory;
pub mod process;

use anyhow::Result;
use std::sync::Arc;

pub use memory::MemoryFs;
pub use process::ProcessLoader;

/// Receives one line of diagnostic text from the engine.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Maps an asset name (e.g. the engine binary) to a location the loader can use.
pub type LocateFile = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The engine's private filesystem. Paths are virtual (`/tmp/input.pdf`).
pub trait EngineFs: Send + Sync {
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn list(&self, path: &str) -> Result<Vec<String>>;
    fn make_dir(&self, path: &str) -> Result<()>;
    fn remove(&self, path: &str) -> Result<()>;
}

/// One loaded engine instance. `run_main` blocks until the engine returns.
/// Instances are created on the caller side of the boundary and moved onto its thread.
pub trait Engine: Send {
    /// `Err` means the engine could not be run at all; a failed run is a non-zero code.
    fn run_main(&mut self, argv: &[String]) -> Result<i32>;
    fn fs(&self) -> Arc<dyn EngineFs>;
}

pub struct LoadConfig {
    pub locate_file: LocateFile,
    pub on_line: LineSink,
    pub on_error_line: Option<LineSink>,
}

/// Bootstrap that turns an engine artifact into a callable instance.
pub trait EngineLoader: Send + Sync {
    fn load(&self, config: LoadConfig) -> Result<Box<dyn Engine>>;
}
