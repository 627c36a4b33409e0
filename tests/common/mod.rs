#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use gs_worker::config::Config;
use gs_worker::engine::{Engine, EngineFs, EngineLoader, LineSink, LoadConfig, MemoryFs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour knobs for the scripted engine.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub delay: Duration,
    /// Emit no diagnostic lines at all.
    pub silent: bool,
    /// Emit a bare page-count line during analysis instead of a page range.
    pub count_line_only: bool,
    /// Exit cleanly without writing any output file.
    pub skip_outputs: bool,
    /// Panic inside `run_main`, taking the boundary thread down.
    pub panic_on_run: bool,
}

#[derive(Debug, Default)]
pub struct Probe {
    pub loads: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub invocations: Mutex<Vec<Vec<String>>>,
}

impl Probe {
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }
}

/// Loader for an engine that fakes the native binary over a `MemoryFs`.
/// Documents are plain text `pages=N`.
pub struct ScriptedLoader {
    pub script: Script,
    pub probe: Arc<Probe>,
    pub fs: Arc<MemoryFs>,
    pub failing_loads: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            probe: Arc::new(Probe::default()),
            fs: Arc::new(MemoryFs::new()),
            failing_loads: AtomicUsize::new(0),
        })
    }

    pub fn failing(script: Script, failures: usize) -> Arc<Self> {
        let loader = Self::new(script);
        loader.failing_loads.store(failures, Ordering::SeqCst);
        loader
    }
}

impl EngineLoader for ScriptedLoader {
    fn load(&self, config: LoadConfig) -> Result<Box<dyn Engine>> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_loads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_loads.store(remaining - 1, Ordering::SeqCst);
            bail!("engine artifact could not be instantiated");
        }
        Ok(Box::new(ScriptedEngine {
            script: self.script.clone(),
            probe: self.probe.clone(),
            fs: self.fs.clone(),
            on_line: config.on_line,
        }))
    }
}

pub struct ScriptedEngine {
    script: Script,
    probe: Arc<Probe>,
    fs: Arc<MemoryFs>,
    on_line: LineSink,
}

fn flag<'a>(argv: &'a [String], prefix: &str) -> Option<&'a str> {
    argv.iter().find_map(|a| a.strip_prefix(prefix))
}

pub fn document(pages: u32) -> Vec<u8> {
    format!("pages={pages}").into_bytes()
}

impl ScriptedEngine {
    fn say(&self, line: &str) {
        if !self.script.silent {
            (self.on_line)(line);
        }
    }

    fn run(&self, argv: &[String]) -> Result<i32> {
        let input = argv.last().ok_or_else(|| anyhow!("no input"))?;
        let doc = String::from_utf8(self.fs.read(input)?)?;
        let pages: u32 = doc
            .strip_prefix("pages=")
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(1);
        let device = flag(argv, "-sDEVICE=").ok_or_else(|| anyhow!("no device"))?;

        self.say("GPL Ghostscript 10.02.1 (2023-11-01)");
        self.say("Copyright (C) 2023 Artifex Software, Inc.  All rights reserved.");

        match device {
            "nullpage" => {
                if self.script.count_line_only {
                    self.say(&pages.to_string());
                } else {
                    self.say(&format!("Processing pages 1 through {pages}."));
                    for p in 1..=pages {
                        self.say(&format!("Page {p}"));
                    }
                }
            }
            "png16m" | "pnggray" => {
                let first: u32 = flag(argv, "-dFirstPage=").map_or(Ok(1), str::parse)?;
                let last: u32 = flag(argv, "-dLastPage=").map_or(Ok(pages), str::parse)?;
                let last = last.min(pages);
                let template = flag(argv, "-sOutputFile=").ok_or_else(|| anyhow!("no output"))?;
                self.say(&format!("Processing pages {first} through {last}."));
                for (i, p) in (first..=last).enumerate() {
                    self.say(&format!("Page {p}"));
                    self.say("Loading NimbusSans-Regular font from %rom%Resource/Font/...");
                    let path = template.replace("%d", &(i + 1).to_string());
                    if !self.script.skip_outputs {
                        self.fs.write(&path, format!("{device}:{p}").as_bytes())?;
                    }
                    if self.script.exit_code != 0 {
                        return Ok(self.script.exit_code);
                    }
                }
            }
            "pdfwrite" => {
                let profile = flag(argv, "-dPDFSETTINGS=").unwrap_or("");
                let output = flag(argv, "-sOutputFile=").ok_or_else(|| anyhow!("no output"))?;
                self.say(&format!("Processing pages 1 through {pages}."));
                for p in 1..=pages {
                    self.say(&format!("Page {p}"));
                }
                if !self.script.skip_outputs {
                    self.fs.write(output, format!("%PDF-1.4 {profile}").as_bytes())?;
                }
            }
            other => bail!("unknown device {other}"),
        }
        Ok(self.script.exit_code)
    }
}

impl Engine for ScriptedEngine {
    fn run_main(&mut self, argv: &[String]) -> Result<i32> {
        self.probe.invocations.lock().unwrap().push(argv.to_vec());
        let now = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.script.delay.is_zero() {
            std::thread::sleep(self.script.delay);
        }
        if self.script.panic_on_run {
            panic!("engine aborted");
        }
        let result = self.run(argv);
        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn fs(&self) -> Arc<dyn EngineFs> {
        self.fs.clone()
    }
}

pub fn quiet_config() -> Config {
    let mut cfg = Config::default();
    cfg.engine.echo_diagnostics = false;
    cfg
}
