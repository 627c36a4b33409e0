//! Caller-facing façade: turns the boundary's event stream into awaitable
//! operations.
//!
//! The boundary runs one command at a time and cannot service a second one
//! while the engine is busy, so non-init operations pass through a single
//! gate: with [`BusyPolicy::Queue`] later calls wait their turn, with
//! [`BusyPolicy::Reject`] they fail with [`WorkerError::Busy`]. Init is
//! shared: concurrent callers join the in-flight attempt instead of spawning
//! a second boundary.

use crate::boundary::Boundary;
use crate::config::{BusyPolicy, Config};
use crate::engine::{EngineLoader, ProcessLoader};
use crate::error::WorkerError;
use crate::protocol::{
    Command, ConvertOutput, ConvertRequest, Dpi, Envelope, Event, OperationId, OperationKind,
    OptimizeRequest, Progress,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ConvertOptions {
    pub dpi: Dpi,
    pub grayscale: bool,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
    pub on_progress: Option<ProgressCallback>,
}

#[derive(Clone, Default)]
pub struct OptimizeOptions {
    /// Falls back to the configured profile (`/ebook`) when absent.
    pub quality_profile: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

type Settle<T> = oneshot::Sender<Result<T, WorkerError>>;

struct Pending {
    kind: OperationKind,
    settle: Settle<Event>,
    on_progress: Option<ProgressCallback>,
}

struct Link {
    boundary: Boundary,
    pump: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct Shared {
    lifecycle: Lifecycle,
    init_id: Option<OperationId>,
    init_waiters: Vec<Settle<()>>,
    pending: HashMap<OperationId, Pending>,
    link: Option<Link>,
    /// Bumped whenever the link is replaced; events from older links are ignored.
    generation: u64,
}

impl Shared {
    fn settle_init(&mut self, result: Result<(), WorkerError>) {
        self.init_id = None;
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn fail_all(&mut self, err: impl Fn(OperationKind) -> WorkerError) {
        self.lifecycle = Lifecycle::Uninitialized;
        self.settle_init(Err(err(OperationKind::Init)));
        for (id, p) in self.pending.drain() {
            debug!("{id} {} settled by teardown", p.kind);
            let _ = p.settle.send(Err(err(p.kind)));
        }
    }
}

struct Inner {
    loader: Arc<dyn EngineLoader>,
    cfg: Config,
    shared: Mutex<Shared>,
    gate: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> OperationId {
        OperationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn dispatch(&self, generation: u64, env: Envelope<Event>) {
        let mut sh = self.lock();
        if sh.generation != generation {
            debug!("ignoring {} from a discarded boundary", env.message.name());
            return;
        }
        let Envelope { id, message } = env;
        match message {
            Event::Ready => {
                sh.lifecycle = Lifecycle::Ready;
                sh.settle_init(Ok(()));
                info!("engine ready");
            }
            Event::Progress(p) | Event::AnalyzeProgress(p) => {
                let callback = id
                    .and_then(|id| sh.pending.get(&id))
                    .and_then(|pending| pending.on_progress.clone());
                drop(sh);
                if let Some(callback) = callback {
                    callback(p);
                }
            }
            Event::Error { message } => match id {
                Some(id) if sh.init_id == Some(id) => {
                    warn!("{id} init failed: {message}");
                    sh.lifecycle = Lifecycle::Uninitialized;
                    sh.settle_init(Err(WorkerError::Initialization(message)));
                }
                Some(id) => match sh.pending.remove(&id) {
                    Some(p) => {
                        let _ = p.settle.send(Err(WorkerError::Operation {
                            kind: p.kind,
                            message,
                        }));
                    }
                    None => warn!("{id} error for unknown operation: {message}"),
                },
                None => {
                    warn!("unattributed boundary error: {message}");
                    sh.fail_all(|kind| WorkerError::Operation {
                        kind,
                        message: message.clone(),
                    });
                }
            },
            terminal => match id.and_then(|id| sh.pending.remove(&id)) {
                Some(p) => {
                    let _ = p.settle.send(Ok(terminal));
                }
                None => warn!("{} event for unknown operation {:?}", terminal.name(), id),
            },
        }
    }

    fn boundary_lost(&self, generation: u64) {
        let mut sh = self.lock();
        if sh.generation != generation {
            return;
        }
        warn!("boundary event channel closed");
        sh.link = None;
        sh.fail_all(|_| WorkerError::BoundaryGone);
    }
}

async fn pump(inner: Weak<Inner>, mut events: UnboundedReceiver<Envelope<Event>>, generation: u64) {
    while let Some(env) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.dispatch(generation, env);
    }
    if let Some(inner) = inner.upgrade() {
        inner.boundary_lost(generation);
    }
}

/// Request multiplexer over one boundary. Cheap to clone; clones share the
/// boundary and its bookkeeping. Must be used inside a tokio runtime.
#[derive(Clone)]
pub struct WorkerClient {
    inner: Arc<Inner>,
}

impl WorkerClient {
    pub fn new(loader: Arc<dyn EngineLoader>, cfg: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                cfg: cfg.clone(),
                shared: Mutex::new(Shared {
                    lifecycle: Lifecycle::Uninitialized,
                    init_id: None,
                    init_waiters: Vec::new(),
                    pending: HashMap::new(),
                    link: None,
                    generation: 0,
                }),
                gate: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Client backed by the native engine executable named in `cfg.engine`.
    pub fn with_process_engine(cfg: &Config) -> Self {
        Self::new(Arc::new(ProcessLoader::new(cfg)), cfg)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    /// Loads the engine. Resolves immediately when ready and joins an
    /// attempt already in flight.
    pub async fn init(&self) -> Result<(), WorkerError> {
        let rx = {
            let mut sh = self.inner.lock();
            let (tx, rx) = oneshot::channel();
            match sh.lifecycle {
                Lifecycle::Ready => return Ok(()),
                Lifecycle::Initializing => {
                    debug!("joining in-flight init");
                    sh.init_waiters.push(tx);
                }
                Lifecycle::Uninitialized => {
                    if sh.link.is_none() {
                        let link = self.spawn_link(&mut sh)?;
                        sh.link = Some(link);
                    }
                    let id = self.inner.next_id();
                    let sent = match sh.link.as_ref() {
                        Some(link) => link.boundary.send(id, Command::Init),
                        None => Err(WorkerError::BoundaryGone),
                    };
                    if let Err(err) = sent {
                        sh.link = None;
                        return Err(err);
                    }
                    sh.lifecycle = Lifecycle::Initializing;
                    sh.init_id = Some(id);
                    sh.init_waiters.push(tx);
                    debug!("{id} init sent");
                }
            }
            rx
        };
        rx.await.unwrap_or(Err(WorkerError::Terminated))
    }

    fn spawn_link(&self, sh: &mut Shared) -> Result<Link, WorkerError> {
        let (boundary, events) = Boundary::spawn(self.inner.loader.clone(), &self.inner.cfg)
            .map_err(|e| WorkerError::Initialization(format!("{e:#}")))?;
        sh.generation += 1;
        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), events, sh.generation));
        Ok(Link { boundary, pump })
    }

    /// Page count of `document`; 0 when the engine reported none.
    pub async fn analyze(
        &self,
        document: Vec<u8>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<u32, WorkerError> {
        match self.run(Command::Analyze { document }, on_progress).await? {
            Event::Analyzed { page_count } => Ok(page_count),
            other => Err(WorkerError::UnexpectedEvent {
                kind: OperationKind::Analyze,
                event: other.name(),
            }),
        }
    }

    pub async fn convert(
        &self,
        document: Vec<u8>,
        options: ConvertOptions,
    ) -> Result<ConvertOutput, WorkerError> {
        let command = Command::Convert(ConvertRequest {
            document,
            dpi: options.dpi,
            grayscale: options.grayscale,
            first_page: options.first_page,
            last_page: options.last_page,
        });
        match self.run(command, options.on_progress).await? {
            Event::Complete(output) => Ok(output),
            other => Err(WorkerError::UnexpectedEvent {
                kind: OperationKind::Convert,
                event: other.name(),
            }),
        }
    }

    pub async fn optimize(
        &self,
        document: Vec<u8>,
        options: OptimizeOptions,
    ) -> Result<Vec<u8>, WorkerError> {
        let command = Command::Optimize(OptimizeRequest {
            document,
            quality_profile: options.quality_profile,
        });
        match self.run(command, options.on_progress).await? {
            Event::Optimized { document } => Ok(document),
            other => Err(WorkerError::UnexpectedEvent {
                kind: OperationKind::Optimize,
                event: other.name(),
            }),
        }
    }

    async fn run(
        &self,
        command: Command,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Event, WorkerError> {
        let kind = command.kind();
        if self.inner.cfg.client.auto_init {
            self.init().await?;
        } else if !self.is_ready() {
            return Err(WorkerError::NotReady);
        }

        let _turn = match self.inner.cfg.client.busy_policy {
            BusyPolicy::Queue => self.inner.gate.lock().await,
            BusyPolicy::Reject => self
                .inner
                .gate
                .try_lock()
                .map_err(|_| WorkerError::Busy(kind))?,
        };

        let rx = {
            let mut sh = self.inner.lock();
            if sh.lifecycle != Lifecycle::Ready {
                return Err(WorkerError::NotReady);
            }
            let id = self.inner.next_id();
            let (tx, rx) = oneshot::channel();
            match sh.link.as_ref() {
                Some(link) => link.boundary.send(id, command)?,
                None => return Err(WorkerError::NotReady),
            }
            sh.pending.insert(
                id,
                Pending {
                    kind,
                    settle: tx,
                    on_progress,
                },
            );
            debug!("{id} {kind} sent");
            rx
        };
        rx.await.unwrap_or(Err(WorkerError::Terminated))
    }

    /// Discards the boundary. Every outstanding operation and init waiter
    /// settles with [`WorkerError::Terminated`]; the next call starts over.
    pub fn terminate(&self) {
        let mut sh = self.inner.lock();
        if sh.link.take().is_some() {
            info!("boundary terminated");
        }
        sh.generation += 1;
        sh.fail_all(|_| WorkerError::Terminated);
    }
}
