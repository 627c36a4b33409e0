//! Runs a blocking native document engine (page counting, rasterization,
//! size-optimizing rewrite) on its own thread and exposes it as cancellable
//! async operations.
//!
//! ```text
//! WorkerClient ──Command──▶ Boundary (thread) ──▶ EngineSession ──▶ Engine::run_main
//!      ▲                                               │ staging (/tmp)
//!      └────────────Event (progress, result)───────────┘ scanner (diagnostic lines)
//! ```

pub mod batch_plan;
pub mod boundary;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod staging;
pub mod util;

pub use client::{ConvertOptions, OptimizeOptions, ProgressCallback, WorkerClient};
pub use error::WorkerError;
pub use protocol::{ConvertOutput, Dpi, Progress};
