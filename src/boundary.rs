//! Hosts one engine session on a dedicated thread, reachable only through
//! ordered command/event channels.

use crate::config::Config;
use crate::engine::EngineLoader;
use crate::error::WorkerError;
use crate::protocol::{Command, Envelope, Event, OperationId};
use crate::session::{EngineSession, EventSink};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    Uninitialized,
    Initializing,
    Ready,
    /// Last init attempt failed; a later `init` retries.
    Failed,
}

/// Caller-side handle. Dropping it closes the command channel; the thread
/// exits once the command it is running (if any) returns.
pub struct Boundary {
    commands: UnboundedSender<Envelope<Command>>,
}

impl Boundary {
    pub fn spawn(
        loader: Arc<dyn EngineLoader>,
        cfg: &Config,
    ) -> Result<(Self, UnboundedReceiver<Envelope<Event>>)> {
        let (cmd_tx, cmd_rx) = unbounded_channel();
        let (evt_tx, evt_rx) = unbounded_channel();
        let host = BoundaryHost {
            loader,
            cfg: cfg.clone(),
            events: EventSink::new(evt_tx),
            state: BoundaryState::Uninitialized,
            session: None,
        };
        std::thread::Builder::new()
            .name("gs-worker-boundary".into())
            .spawn(move || host.run(cmd_rx))
            .with_context(|| "spawning boundary thread")?;
        Ok((Self { commands: cmd_tx }, evt_rx))
    }

    pub fn send(&self, id: OperationId, command: Command) -> Result<(), WorkerError> {
        self.commands
            .send(Envelope::new(id, command))
            .map_err(|_| WorkerError::BoundaryGone)
    }
}

struct BoundaryHost {
    loader: Arc<dyn EngineLoader>,
    cfg: Config,
    events: EventSink,
    state: BoundaryState,
    session: Option<EngineSession>,
}

impl BoundaryHost {
    fn run(mut self, mut commands: UnboundedReceiver<Envelope<Command>>) {
        debug!("boundary started");
        while let Some(env) = commands.blocking_recv() {
            self.handle(env);
        }
        debug!("boundary stopped in state {:?}", self.state);
    }

    fn handle(&mut self, env: Envelope<Command>) {
        let Some(id) = env.id else {
            warn!("dropping {} command without an operation id", env.message.kind());
            return;
        };
        match env.message {
            Command::Init => self.init(id),
            command => {
                let kind = command.kind();
                let session = match (self.state, self.session.as_mut()) {
                    (BoundaryState::Ready, Some(session)) => session,
                    _ => {
                        warn!("{id} {kind} received in state {:?}", self.state);
                        self.events.emit(
                            Some(id),
                            Event::Error {
                                message: "engine not initialized".to_string(),
                            },
                        );
                        return;
                    }
                };
                let event = session.execute(id, command);
                self.events.emit(Some(id), event);
            }
        }
    }

    fn init(&mut self, id: OperationId) {
        if self.state == BoundaryState::Ready {
            self.events.emit(Some(id), Event::Ready);
            return;
        }
        self.state = BoundaryState::Initializing;
        info!("{id} loading engine");
        match EngineSession::load(self.loader.as_ref(), &self.cfg, self.events.clone()) {
            Ok(session) => {
                self.session = Some(session);
                self.state = BoundaryState::Ready;
                self.events.emit(Some(id), Event::Ready);
            }
            Err(err) => {
                self.state = BoundaryState::Failed;
                warn!("{id} engine load failed: {err:#}");
                self.events.emit(
                    Some(id),
                    Event::Error {
                        message: format!("{err:#}"),
                    },
                );
            }
        }
    }
}
