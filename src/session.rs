//! One loaded engine instance plus the staging and progress plumbing
//! around each invocation.

use crate::config::Config;
use crate::engine::{Engine, EngineLoader, LineSink, LoadConfig, LocateFile};
use crate::error::SessionError;
use crate::protocol::{
    ColorMode, Command, ConvertOutput, ConvertRequest, Envelope, Event, OperationId,
    OperationKind, OptimizeRequest,
};
use crate::scanner::{ProgressScanner, ScanEvent, ScanMode};
use crate::staging::{
    self, ensure_dirs, Staging, ANALYZE_PATH, INPUT_PATH, OPTIMIZED_PATH, OUTPUT_DIR, STAGING_DIR,
};
use crate::util::short_digest;
use anyhow::Result;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Ordered event channel out of the boundary.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: UnboundedSender<Envelope<Event>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<Envelope<Event>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, id: Option<OperationId>, event: Event) {
        let name = event.name();
        if self.tx.send(Envelope { id, message: event }).is_err() {
            debug!("event receiver gone; dropped {name}");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub text_alpha_bits: u32,
    pub graphics_alpha_bits: u32,
    pub default_profile: String,
    pub compatibility_level: String,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            text_alpha_bits: cfg.render.text_alpha_bits,
            graphics_alpha_bits: cfg.render.graphics_alpha_bits,
            default_profile: cfg.optimize.default_profile.clone(),
            compatibility_level: cfg.optimize.compatibility_level.clone(),
        }
    }
}

/// Routes engine diagnostic lines into the scanner of the running operation.
struct DiagnosticTap {
    state: Mutex<TapState>,
    events: EventSink,
    echo: bool,
}

struct TapState {
    scanner: ProgressScanner,
    op: Option<OperationId>,
}

impl DiagnosticTap {
    fn new(events: EventSink, echo: bool) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(TapState {
                scanner: ProgressScanner::new()?,
                op: None,
            }),
            events,
            echo,
        })
    }

    fn lock(&self) -> MutexGuard<'_, TapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_line(&self, line: &str) {
        if self.echo {
            debug!(target: "gs_worker::engine", "{line}");
        }
        let mut st = self.lock();
        let Some(id) = st.op else {
            return;
        };
        let mode = st.scanner.mode();
        for ev in st.scanner.scan(line) {
            match ev {
                ScanEvent::Progress(p) if mode == ScanMode::Analyze => {
                    self.events.emit(Some(id), Event::AnalyzeProgress(p))
                }
                ScanEvent::Progress(p) => self.events.emit(Some(id), Event::Progress(p)),
                ScanEvent::PageCount(n) => debug!("{id} page count line: {n}"),
            }
        }
    }

    fn on_error_line(&self, line: &str) {
        if self.echo {
            warn!(target: "gs_worker::engine", "{line}");
        }
    }

    fn open(&self, id: OperationId, mode: ScanMode) -> TapWindow<'_> {
        let mut st = self.lock();
        st.scanner.reset(mode);
        st.op = Some(id);
        TapWindow { tap: self }
    }
}

/// Lines are attributed to an operation only while its window is open.
struct TapWindow<'a> {
    tap: &'a DiagnosticTap,
}

impl TapWindow<'_> {
    fn page_count(&self) -> u32 {
        self.tap.lock().scanner.page_count()
    }
}

impl Drop for TapWindow<'_> {
    fn drop(&mut self) {
        self.tap.lock().op = None;
    }
}

pub struct EngineSession {
    engine: Box<dyn Engine>,
    tap: Arc<DiagnosticTap>,
    settings: SessionSettings,
}

impl EngineSession {
    pub fn load(loader: &dyn EngineLoader, cfg: &Config, events: EventSink) -> Result<Self> {
        let tap = Arc::new(DiagnosticTap::new(events, cfg.engine.echo_diagnostics)?);

        let on_line: LineSink = {
            let tap = tap.clone();
            Arc::new(move |line: &str| tap.on_line(line))
        };
        let on_error_line: LineSink = {
            let tap = tap.clone();
            Arc::new(move |line: &str| tap.on_error_line(line))
        };
        let asset_dir = cfg.engine.asset_dir.clone();
        let locate_file: LocateFile = Arc::new(move |name: &str| locate(&asset_dir, name));

        let engine = loader.load(LoadConfig {
            locate_file,
            on_line,
            on_error_line: Some(on_error_line),
        })?;

        Ok(Self {
            engine,
            tap,
            settings: SessionSettings::from_config(cfg),
        })
    }

    /// Runs one operation command to its terminal event.
    pub fn execute(&mut self, id: OperationId, command: Command) -> Event {
        let kind = command.kind();
        let result = match command {
            Command::Init => Ok(Event::Ready),
            Command::Analyze { document } => self
                .analyze(id, &document)
                .map(|page_count| Event::Analyzed { page_count }),
            Command::Convert(req) => self.convert(id, &req).map(Event::Complete),
            Command::Optimize(req) => self
                .optimize(id, &req)
                .map(|document| Event::Optimized { document }),
        };
        match result {
            Ok(event) => event,
            Err(err) => {
                warn!("{id} {kind} failed: {err}");
                Event::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    pub fn analyze(&mut self, id: OperationId, document: &[u8]) -> Result<u32, SessionError> {
        debug!(
            "{id} analyze bytes={} digest={}",
            document.len(),
            short_digest(document)
        );
        let fs = self.engine.fs();
        ensure_dirs(fs.as_ref(), &[STAGING_DIR]);
        let mut staging = Staging::new(fs.as_ref());
        staging
            .stage_input(ANALYZE_PATH, document)
            .map_err(SessionError::staging)?;

        let argv = to_argv(&[
            "-dNOPAUSE",
            "-dBATCH",
            "-dSAFER",
            "-sDEVICE=nullpage",
            ANALYZE_PATH,
        ]);

        let tap = self.tap.clone();
        let window = tap.open(id, ScanMode::Analyze);
        self.invoke(OperationKind::Analyze, &argv)?;
        let page_count = window.page_count();

        info!("{id} analyzed page_count={page_count}");
        Ok(page_count)
    }

    pub fn convert(
        &mut self,
        id: OperationId,
        req: &ConvertRequest,
    ) -> Result<ConvertOutput, SessionError> {
        let first = req.first_page.filter(|p| *p > 0);
        let last = req.last_page.filter(|p| *p > 0);
        debug!(
            "{id} convert bytes={} digest={} dpi={} grayscale={} range={:?}..{:?}",
            req.document.len(),
            short_digest(&req.document),
            req.dpi.value(),
            req.grayscale,
            first,
            last
        );

        let fs = self.engine.fs();
        ensure_dirs(fs.as_ref(), &[STAGING_DIR, OUTPUT_DIR]);
        let mut staging = Staging::new(fs.as_ref());
        staging.sweep_dir(OUTPUT_DIR);
        staging
            .stage_input(INPUT_PATH, &req.document)
            .map_err(SessionError::staging)?;

        let mut argv = to_argv(&["-dNOPAUSE", "-dBATCH", "-dSAFER"]);
        argv.push(format!(
            "-sDEVICE={}",
            ColorMode::from_grayscale(req.grayscale).device()
        ));
        argv.push(format!("-r{}", req.dpi.value()));
        argv.push(format!("-dTextAlphaBits={}", self.settings.text_alpha_bits));
        argv.push(format!(
            "-dGraphicsAlphaBits={}",
            self.settings.graphics_alpha_bits
        ));
        if let Some(p) = first {
            argv.push(format!("-dFirstPage={p}"));
        }
        if let Some(p) = last {
            argv.push(format!("-dLastPage={p}"));
        }
        argv.push(format!("-sOutputFile={}", staging::page_output_template()));
        argv.push(INPUT_PATH.to_string());

        let tap = self.tap.clone();
        let _window = tap.open(id, ScanMode::Render);
        self.invoke(OperationKind::Convert, &argv)?;

        let images = staging
            .collect_pages(OUTPUT_DIR)
            .map_err(SessionError::staging)?;
        let first_page = first.unwrap_or(1);
        let last_page = last.unwrap_or_else(|| implied_last_page(first_page, images.len()));

        info!(
            "{id} converted pages={} range={first_page}-{last_page}",
            images.len()
        );
        Ok(ConvertOutput {
            images,
            first_page,
            last_page,
        })
    }

    pub fn optimize(
        &mut self,
        id: OperationId,
        req: &OptimizeRequest,
    ) -> Result<Vec<u8>, SessionError> {
        let profile = req
            .quality_profile
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(self.settings.default_profile.as_str())
            .to_string();
        debug!(
            "{id} optimize bytes={} digest={} profile={profile}",
            req.document.len(),
            short_digest(&req.document)
        );

        let fs = self.engine.fs();
        ensure_dirs(fs.as_ref(), &[STAGING_DIR]);
        let mut staging = Staging::new(fs.as_ref());
        staging.expect_output(OPTIMIZED_PATH);
        staging
            .stage_input(INPUT_PATH, &req.document)
            .map_err(SessionError::staging)?;

        let argv = vec![
            "-sDEVICE=pdfwrite".to_string(),
            format!("-dCompatibilityLevel={}", self.settings.compatibility_level),
            format!("-dPDFSETTINGS={profile}"),
            "-dNOPAUSE".to_string(),
            "-dBATCH".to_string(),
            format!("-sOutputFile={OPTIMIZED_PATH}"),
            INPUT_PATH.to_string(),
        ];

        let tap = self.tap.clone();
        let _window = tap.open(id, ScanMode::Render);
        self.invoke(OperationKind::Optimize, &argv)?;

        let document = staging
            .read(OPTIMIZED_PATH)
            .map_err(SessionError::staging)?;
        info!(
            "{id} optimized {} -> {} bytes",
            req.document.len(),
            document.len()
        );
        Ok(document)
    }

    fn invoke(&mut self, kind: OperationKind, argv: &[String]) -> Result<(), SessionError> {
        let code = self
            .engine
            .run_main(argv)
            .map_err(SessionError::invocation)?;
        if code != 0 {
            return Err(SessionError::EngineExit { kind, code });
        }
        Ok(())
    }
}

/// Last page covered by `images` rendered from `first_page` onward.
fn implied_last_page(first_page: u32, images: usize) -> u32 {
    match u32::try_from(images) {
        Ok(0) => first_page.saturating_sub(1),
        Ok(n) => first_page.saturating_add(n - 1),
        Err(_) => u32::MAX,
    }
}

fn to_argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn locate(asset_dir: &str, name: &str) -> String {
    if asset_dir.is_empty() || Path::new(name).is_absolute() {
        return name.to_string();
    }
    Path::new(asset_dir).join(name).display().to_string()
}
