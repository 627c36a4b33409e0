use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlates a command with the events it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Init,
    Analyze,
    Convert,
    Optimize,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Init => "init",
            OperationKind::Analyze => "analyze",
            OperationKind::Convert => "convert",
            OperationKind::Optimize => "optimize",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    /// 0 until the engine has announced its page range.
    pub total: u32,
}

/// Rasterization resolutions the engine is driven at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Dpi {
    D72,
    #[default]
    D150,
    D300,
    D600,
}

impl Dpi {
    pub fn value(self) -> u32 {
        match self {
            Dpi::D72 => 72,
            Dpi::D150 => 150,
            Dpi::D300 => 300,
            Dpi::D600 => 600,
        }
    }
}

impl TryFrom<u32> for Dpi {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            72 => Ok(Dpi::D72),
            150 => Ok(Dpi::D150),
            300 => Ok(Dpi::D300),
            600 => Ok(Dpi::D600),
            other => Err(format!("unsupported dpi {other} (expected 72, 150, 300 or 600)")),
        }
    }
}

impl From<Dpi> for u32 {
    fn from(d: Dpi) -> u32 {
        d.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    #[default]
    Color,
    Grayscale,
}

impl ColorMode {
    pub fn from_grayscale(grayscale: bool) -> Self {
        if grayscale {
            ColorMode::Grayscale
        } else {
            ColorMode::Color
        }
    }

    /// Raster device name understood by the engine.
    pub fn device(self) -> &'static str {
        match self {
            ColorMode::Color => "png16m",
            ColorMode::Grayscale => "pnggray",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertRequest {
    pub document: Vec<u8>,
    pub dpi: Dpi,
    #[serde(default)]
    pub grayscale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub document: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOutput {
    /// One image per rendered page, ascending page order.
    pub images: Vec<Vec<u8>>,
    pub first_page: u32,
    pub last_page: u32,
}

/// Caller → boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Init,
    Analyze { document: Vec<u8> },
    Convert(ConvertRequest),
    Optimize(OptimizeRequest),
}

impl Command {
    pub fn kind(&self) -> OperationKind {
        match self {
            Command::Init => OperationKind::Init,
            Command::Analyze { .. } => OperationKind::Analyze,
            Command::Convert(_) => OperationKind::Convert,
            Command::Optimize(_) => OperationKind::Optimize,
        }
    }
}

/// Boundary → caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Event {
    Ready,
    AnalyzeProgress(Progress),
    Progress(Progress),
    Analyzed { page_count: u32 },
    Complete(ConvertOutput),
    Optimized { document: Vec<u8> },
    Error { message: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::AnalyzeProgress(_) => "analyze_progress",
            Event::Progress(_) => "progress",
            Event::Analyzed { .. } => "analyzed",
            Event::Complete(_) => "complete",
            Event::Optimized { .. } => "optimized",
            Event::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// `None` only for failures that cannot be tied to one operation.
    pub id: Option<OperationId>,
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(id: OperationId, message: T) -> Self {
        Self {
            id: Some(id),
            message,
        }
    }
}
