use crate::{
    batch_plan::convert_in_batches,
    client::{ConvertOptions, OptimizeOptions, ProgressCallback, WorkerClient},
    config::{Config, Logging},
    protocol::{Dpi, Progress},
    util::{ensure_dir, now_rfc3339, sha256_hex},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "gs-worker")]
#[command(about = "Page counting, rasterization and size optimization through an off-thread engine")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./gs-worker.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the engine and report whether it came up.
    Doctor {},
    /// Report the page count of a document.
    Analyze {
        #[arg(long)]
        input: PathBuf,
    },
    /// Rasterize pages to PNG files.
    Convert {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// One of 72, 150, 300, 600.
        #[arg(long)]
        dpi: Option<u32>,
        #[arg(long)]
        grayscale: bool,
        #[arg(long)]
        first_page: Option<u32>,
        #[arg(long)]
        last_page: Option<u32>,
    },
    /// Rewrite a document for reduced size.
    Optimize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Quality profile, e.g. /screen, /ebook, /printer.
        #[arg(long)]
        profile: Option<String>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let _guard = init_logging(args.log_level.as_deref(), &cfg.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;

    runtime.block_on(async {
        let client = WorkerClient::with_process_engine(&cfg);
        let result = match &args.cmd {
            Command::Doctor {} => doctor(&client).await,
            Command::Analyze { input } => analyze(&client, input).await,
            Command::Convert {
                input,
                out_dir,
                dpi,
                grayscale,
                first_page,
                last_page,
            } => {
                let dpi = Dpi::try_from(dpi.unwrap_or(cfg.render.default_dpi))
                    .map_err(|e| anyhow!(e))?;
                let options = ConvertOptions {
                    dpi,
                    grayscale: *grayscale,
                    first_page: *first_page,
                    last_page: *last_page,
                    on_progress: Some(log_progress("convert")),
                };
                convert(&cfg, &client, input, out_dir, options).await
            }
            Command::Optimize {
                input,
                output,
                profile,
            } => optimize(&cfg, &client, input, output, profile.clone()).await,
        };
        client.terminate();
        result
    })
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["gs-worker.toml", "gs-worker.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Console output goes to stderr; stdout carries the JSON results.
fn init_logging(level_override: Option<&str>, cfg: &Logging) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_override.unwrap_or(cfg.level.as_str())));

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let console = if cfg.json {
        console.json().boxed()
    } else {
        console.boxed()
    };

    let (file_layer, guard) = match log_file_path(cfg) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                ensure_dir(parent)?;
            }
            let file = std::fs::File::create(&path)
                .with_context(|| format!("create log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;
    Ok(guard)
}

fn log_file_path(cfg: &Logging) -> Option<PathBuf> {
    match (cfg.write_to_file, cfg.file_path.is_empty()) {
        (false, _) => None,
        (true, true) => Some(PathBuf::from("gs-worker.log")),
        (true, false) => Some(PathBuf::from(&cfg.file_path)),
    }
}

fn log_progress(label: &'static str) -> ProgressCallback {
    Arc::new(move |p: Progress| {
        if p.total > 0 {
            info!("{label} page {}/{}", p.current, p.total);
        } else {
            info!("{label} page {}", p.current);
        }
    })
}

async fn doctor(client: &WorkerClient) -> Result<()> {
    let report = match client.init().await {
        Ok(()) => serde_json::json!({ "status": "ready" }),
        Err(err) => serde_json::json!({ "status": "failed", "error": err.to_string() }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn analyze(client: &WorkerClient, input: &Path) -> Result<()> {
    let document = read_input(input)?;
    let sha256 = sha256_hex(&document);
    let page_count = client.analyze(document, Some(log_progress("analyze"))).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "sha256": sha256,
            "page_count": page_count,
        }))?
    );
    Ok(())
}

async fn convert(
    cfg: &Config,
    client: &WorkerClient,
    input: &Path,
    out_dir: &Path,
    options: ConvertOptions,
) -> Result<()> {
    let document = read_input(input)?;
    let sha256 = sha256_hex(&document);
    let started = now_rfc3339();

    let out = convert_in_batches(client, document, options, &cfg.batching).await?;

    ensure_dir(out_dir)?;
    let mut files = Vec::with_capacity(out.images.len());
    for (i, image) in out.images.iter().enumerate() {
        let page = out.first_page + i as u32;
        let path = out_dir.join(format!("page-{page}.png"));
        std::fs::write(&path, image).with_context(|| format!("write {}", path.display()))?;
        files.push(path);
    }
    info!("wrote {} pages to {}", files.len(), out_dir.display());

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "sha256": sha256,
            "started": started,
            "finished": now_rfc3339(),
            "first_page": out.first_page,
            "last_page": out.last_page,
            "pages": files.len(),
            "out_dir": out_dir,
        }))?
    );
    Ok(())
}

async fn optimize(
    cfg: &Config,
    client: &WorkerClient,
    input: &Path,
    output: &Path,
    profile: Option<String>,
) -> Result<()> {
    let document = read_input(input)?;
    let input_bytes = document.len();
    let profile = profile.unwrap_or_else(|| cfg.optimize.default_profile.clone());
    let options = OptimizeOptions {
        quality_profile: Some(profile.clone()),
        on_progress: Some(log_progress("optimize")),
    };
    let rewritten = client.optimize(document, options).await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    std::fs::write(output, &rewritten).with_context(|| format!("write {}", output.display()))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "output": output,
            "profile": profile,
            "input_bytes": input_bytes,
            "output_bytes": rewritten.len(),
        }))?
    );
    Ok(())
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }
    match input.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => {}
        Some(_) => warn!("input is not a .pdf; passing it through: {}", input.display()),
        None => warn!("input has no extension; assuming PDF: {}", input.display()),
    }
    std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))
}
