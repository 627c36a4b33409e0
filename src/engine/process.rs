use super::{Engine, EngineFs, EngineLoader, LineSink, LoadConfig};
use crate::config::Config;
use crate::util::ensure_dir;
use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static ROOT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Loads a native engine executable and gives it a private host directory
/// that plays the role of its virtual filesystem.
pub struct ProcessLoader {
    binary: String,
    staging_root: Option<PathBuf>,
}

impl ProcessLoader {
    pub fn new(cfg: &Config) -> Self {
        let staging_root = if cfg.engine.staging_root.is_empty() {
            None
        } else {
            Some(PathBuf::from(&cfg.engine.staging_root))
        };
        Self {
            binary: cfg.engine.binary.clone(),
            staging_root,
        }
    }
}

impl ProcessLoader {
    /// Fresh host directory for one load, under the configured root or the
    /// system temp dir. Never shared between engine instances.
    fn allocate_root(&self) -> Result<PathBuf> {
        let parent = self
            .staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let seq = ROOT_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = parent.join(format!("gs-worker-{}-{}", std::process::id(), seq));
        ensure_dir(&root)?;
        Ok(root)
    }
}

impl EngineLoader for ProcessLoader {
    fn load(&self, config: LoadConfig) -> Result<Box<dyn Engine>> {
        let name = resolve_engine_exe(&self.binary);
        let exe = PathBuf::from((config.locate_file)(&name));

        let probe = Command::new(&exe)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning engine: {}", exe.display()))?;
        if !probe.status.success() {
            bail!(
                "engine probe failed: {} --version exited with {}",
                exe.display(),
                probe.status
            );
        }
        let version = String::from_utf8_lossy(&probe.stdout).trim().to_string();
        debug!("engine {} version {}", exe.display(), version);

        let root = self.allocate_root()?;

        Ok(Box::new(ProcessEngine {
            exe,
            fs: Arc::new(HostFs { root }),
            on_line: config.on_line,
            on_error_line: config.on_error_line,
        }))
    }
}

fn resolve_engine_exe(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("GS_WORKER_ENGINE") {
            if !env_val.trim().is_empty() {
                return env_val.trim().to_string();
            }
        }
        return "gs".to_string();
    }
    raw.to_string()
}

pub struct ProcessEngine {
    exe: PathBuf,
    fs: Arc<HostFs>,
    on_line: LineSink,
    on_error_line: Option<LineSink>,
}

impl ProcessEngine {
    /// Rewrites virtual paths (bare or as `-sName=/path` values) onto the host root.
    fn map_arg(&self, arg: &str) -> String {
        if arg.starts_with('/') {
            return self.fs.host_path(arg).display().to_string();
        }
        if let Some((flag, value)) = arg.split_once('=') {
            if flag.starts_with("-s") && value.starts_with('/') {
                return format!("{flag}={}", self.fs.host_path(value).display());
            }
        }
        arg.to_string()
    }
}

impl Engine for ProcessEngine {
    fn run_main(&mut self, argv: &[String]) -> Result<i32> {
        let args: Vec<String> = argv.iter().map(|a| self.map_arg(a)).collect();
        debug!("engine run {} {:?}", self.exe.display(), args);

        let mut child = Command::new(&self.exe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning engine: {}", self.exe.display()))?;

        // stderr is drained concurrently; a full pipe would stall the child.
        let stderr = child.stderr.take();
        let err_sink = self.on_error_line.clone();
        let stderr_thread = std::thread::spawn(move || -> Result<()> {
            if let Some(err) = stderr {
                for_each_line(err, |line| {
                    if let Some(sink) = &err_sink {
                        sink(line);
                    }
                })
                .with_context(|| "read engine stderr")?;
            }
            Ok(())
        });

        let drained = match child.stdout.take() {
            Some(out) => {
                let sink = self.on_line.clone();
                for_each_line(out, |line| sink(line))
            }
            None => Ok(()),
        };
        if let Err(err) = drained {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_thread.join();
            return Err(err).with_context(|| "read engine stdout");
        }

        let status = child.wait().with_context(|| "waiting for engine")?;
        stderr_thread
            .join()
            .map_err(|_| anyhow!("stderr reader thread panicked"))??;

        match status.code() {
            Some(code) => Ok(code),
            None => {
                warn!("engine terminated by signal: {status}");
                Ok(-1)
            }
        }
    }

    fn fs(&self) -> Arc<dyn EngineFs> {
        self.fs.clone()
    }
}

fn for_each_line<R: Read>(reader: R, mut f: impl FnMut(&str)) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        f(text.trim_end_matches(['\r', '\n']));
    }
}

/// Host directory addressed with the engine's virtual paths.
struct HostFs {
    root: PathBuf,
}

impl HostFs {
    fn host_path(&self, virtual_path: &str) -> PathBuf {
        self.root.join(virtual_path.trim_start_matches('/'))
    }
}

impl Drop for HostFs {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            debug!("removing {} failed: {err}", self.root.display());
        }
    }
}

impl EngineFs for HostFs {
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let p = self.host_path(path);
        std::fs::write(&p, bytes).with_context(|| format!("write {}", p.display()))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let p = self.host_path(path);
        std::fs::read(&p).with_context(|| format!("read {}", p.display()))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let p = self.host_path(path);
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&p).with_context(|| format!("list {}", p.display()))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        let p = self.host_path(path);
        std::fs::create_dir(&p).with_context(|| format!("mkdir {}", p.display()))
    }

    fn remove(&self, path: &str) -> Result<()> {
        let p = self.host_path(path);
        std::fs::remove_file(&p).with_context(|| format!("unlink {}", p.display()))
    }
}
