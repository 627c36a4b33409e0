use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub optimize: Optimize,
    #[serde(default)]
    pub client: Client,
    #[serde(default)]
    pub batching: Batching,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// Executable name or path; "auto" consults `$GS_WORKER_ENGINE`, then `gs`.
    pub binary: String,
    /// Directory engine assets are located in; empty leaves names untouched.
    pub asset_dir: String,
    /// Host directory backing the engine filesystem; empty uses a private temp dir.
    pub staging_root: String,
    pub echo_diagnostics: bool,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            binary: "auto".into(),
            asset_dir: "".into(),
            staging_root: "".into(),
            echo_diagnostics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Render {
    pub default_dpi: u32,
    pub text_alpha_bits: u32,
    pub graphics_alpha_bits: u32,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            default_dpi: 150,
            text_alpha_bits: 4,
            graphics_alpha_bits: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimize {
    pub default_profile: String,
    pub compatibility_level: String,
}
impl Default for Optimize {
    fn default() -> Self {
        Self {
            default_profile: "/ebook".into(),
            compatibility_level: "1.4".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Later calls wait for the in-flight operation to settle.
    #[default]
    Queue,
    /// Later calls fail immediately with `Busy`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub auto_init: bool,
    pub busy_policy: BusyPolicy,
}
impl Default for Client {
    fn default() -> Self {
        Self {
            auto_init: true,
            busy_policy: BusyPolicy::Queue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batching {
    /// 0 renders the whole range in one invocation.
    pub pages_per_batch: u32,
    pub min_pages_per_batch: u32,
}
impl Default for Batching {
    fn default() -> Self {
        Self {
            pages_per_batch: 0,
            min_pages_per_batch: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
