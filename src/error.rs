use crate::protocol::OperationKind;
use thiserror::Error;

/// What a caller of the multiplexer can observe. Failures carry a message
/// string only, mirroring the engine's text-only diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("engine initialization failed: {0}")]
    Initialization(String),

    #[error("engine is not initialized")]
    NotReady,

    #[error("{0} rejected: another operation is in flight")]
    Busy(OperationKind),

    #[error("{kind} failed: {message}")]
    Operation {
        kind: OperationKind,
        message: String,
    },

    #[error("worker was terminated")]
    Terminated,

    #[error("worker boundary exited unexpectedly")]
    BoundaryGone,

    #[error("unexpected {event} event for {kind}")]
    UnexpectedEvent {
        kind: OperationKind,
        event: &'static str,
    },
}

/// Failure of one engine session operation, raised inside the boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("engine exited with code {code} during {kind}")]
    EngineExit { kind: OperationKind, code: i32 },

    #[error("engine invocation failed: {0}")]
    Invocation(String),

    #[error("staging failed: {0}")]
    Staging(String),
}

impl SessionError {
    pub fn staging(err: anyhow::Error) -> Self {
        SessionError::Staging(format!("{err:#}"))
    }

    pub fn invocation(err: anyhow::Error) -> Self {
        SessionError::Invocation(format!("{err:#}"))
    }
}
