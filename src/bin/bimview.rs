//! CLI binary for bimview.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, drives one pipeline run and prints the outcome.

use anyhow::{bail, Context, Result};
use bimview::{
    HttpTransfer, JobSnapshot, JobStatus, LogEntry, Pipeline, PipelineConfig, PipelineObserver,
    PollStatus, SourceFile, Transfer, PICKER_EXTENSIONS,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Renders the job's progress as a bar and echoes log entries above it.
///
/// Without a bar the log entries go straight to stderr.
struct CliObserver {
    bar: Option<ProgressBar>,
}

impl CliObserver {
    fn new(show_progress: bool) -> Arc<Self> {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new(100);
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold:>11}  [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("idle");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl PipelineObserver for CliObserver {
    fn on_status(&self, status: JobStatus) {
        if let Some(ref bar) = self.bar {
            bar.set_prefix(status.to_string());
        }
    }

    fn on_progress(&self, percent: u8) {
        if let Some(ref bar) = self.bar {
            bar.set_position(u64::from(percent));
        }
    }

    fn on_log(&self, entry: &LogEntry) {
        let line = format!("  {}", dim(&entry.to_string()));
        match self.bar {
            Some(ref bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn on_reset(&self) {
        if let Some(ref bar) = self.bar {
            bar.reset();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload, translate and open a Revit model
  bimview design.rvt

  # Against a remote backend, saving the processed model afterwards
  bimview --backend http://10.0.0.5:8001 --download ./out tower.ifc

  # Run a file another panel produced on the server
  bimview --model-api http://10.0.0.5:8002 --server-path /data/sketch/pred.step

  # What does the backend accept?
  bimview --formats

  # One status check for an existing job
  bimview --status dXJuOmFkc2sub2JqZWN0cy5vcy5vYmplY3Q6YnVja2V0L2Rlc2lnbi5ydnQ

  # Final job snapshot as JSON
  bimview --json --no-progress design.rvt > job.json

ACCEPTED FILES:
  .rvt  .ifc  .step  .stp        (.rfa families: load into a project first)

ENVIRONMENT VARIABLES:
  BIMVIEW_BACKEND             Conversion backend base URL
  BIMVIEW_MODEL_API           Model API base URL for --server-path
  BIMVIEW_DERIVATIVE_API      Derivative service base URL (manifest lookups)
  VIEWER_RUNTIME_URL          Viewer SDK runtime script to load
  VIEWER_RUNTIME_CACHE_DIR    Override the default viewer runtime cache directory
  RUST_LOG                    Tracing filter, overrides -v / -q
"#;

/// Upload CAD/BIM models, drive their translation and open them in a viewer.
#[derive(Parser, Debug)]
#[command(
    name = "bimview",
    version,
    about = "Upload CAD/BIM models (RVT, IFC, STEP), wait for translation and open them in a viewer",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local .rvt, .ifc, .step or .stp file.
    #[arg(required_unless_present_any = ["server_path", "formats", "status"])]
    input: Option<PathBuf>,

    /// Server-side path of a file handed over by another panel.
    #[arg(long, conflicts_with = "input")]
    server_path: Option<String>,

    /// Conversion backend base URL.
    #[arg(long, env = "BIMVIEW_BACKEND", default_value = "http://localhost:8001")]
    backend: String,

    /// Model API base URL (required for --server-path).
    #[arg(long, env = "BIMVIEW_MODEL_API")]
    model_api: Option<String>,

    /// Derivative service base URL used to read document manifests.
    #[arg(long, env = "BIMVIEW_DERIVATIVE_API")]
    derivative_api: Option<String>,

    /// Display surface id the viewer binds to.
    #[arg(long, env = "BIMVIEW_SURFACE", default_value = "forge")]
    surface: String,

    /// Save the processed model into this directory after the run.
    #[arg(long, env = "BIMVIEW_DOWNLOAD")]
    download: Option<PathBuf>,

    /// Print the backend's supported formats and exit.
    #[arg(long)]
    formats: bool,

    /// Check the status of an existing job once and exit.
    #[arg(long, value_name = "URN")]
    status: Option<String>,

    /// Delay before each translation status check, in milliseconds.
    #[arg(long, env = "BIMVIEW_POLL_INTERVAL_MS", default_value_t = 3000)]
    poll_interval_ms: u64,

    /// Status checks before giving up on a translation.
    #[arg(long, env = "BIMVIEW_POLL_ATTEMPTS", default_value_t = 120,
          value_parser = clap::value_parser!(u32).range(1..))]
    poll_attempts: u32,

    /// Upload timeout in seconds.
    #[arg(long, env = "BIMVIEW_UPLOAD_TIMEOUT", default_value_t = 1800)]
    upload_timeout: u64,

    /// Timeout of every other backend call in seconds.
    #[arg(long, env = "BIMVIEW_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Print the final job snapshot as JSON on stdout.
    #[arg(long, env = "BIMVIEW_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "BIMVIEW_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BIMVIEW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BIMVIEW_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The echoed job log already tells the user what happened; library
    // INFO logs would only duplicate it. In --json mode nothing is echoed.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.json && !cli.quiet {
        "warn"
    } else {
        "error"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let observer = (!cli.quiet && !cli.json).then(|| CliObserver::new(show_progress));
    let config = build_config(&cli, observer.clone())?;

    // ── One-shot status check ────────────────────────────────────────────
    if let Some(ref urn) = cli.status {
        let transfer = HttpTransfer::new(&config).context("Failed to build HTTP client")?;
        let outcome = transfer
            .poll_status(urn)
            .await
            .with_context(|| format!("Status check for {urn} failed"))?;
        let status = match outcome.status {
            PollStatus::Pending => "pending",
            PollStatus::Success => "success",
            PollStatus::Failed => "failed",
        };
        if cli.json {
            println!(
                "{}",
                serde_json::json!({ "urn": urn, "status": status, "progress": outcome.progress_hint })
            );
        } else {
            println!(
                "{urn}: {status}{}",
                outcome
                    .progress_hint
                    .map(|h| format!(" ({h})"))
                    .unwrap_or_default()
            );
        }
        return Ok(());
    }

    let pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;

    // ── Formats listing ──────────────────────────────────────────────────
    if cli.formats {
        let formats = pipeline
            .load_supported_formats()
            .await
            .context("Backend did not report its supported formats")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&formats).context("Failed to serialise formats")?
            );
        } else {
            for (category, extensions) in &formats.0 {
                println!("{:<12} {}", bold(category), extensions.join(", "));
            }
            let local: Vec<String> = PICKER_EXTENSIONS.iter().map(|e| format!(".{e}")).collect();
            println!("{:<12} {}", bold("this client"), dim(&local.join(", ")));
        }
        pipeline.unmount();
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    // Best effort: only makes rejection messages more specific.
    let _ = pipeline.load_supported_formats().await;

    let outcome = match (&cli.server_path, &cli.input) {
        (Some(path), _) => pipeline.run_handoff(path).await,
        (None, Some(input)) => {
            let file = SourceFile::from_path(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            pipeline.select_file(file)?;
            pipeline.run().await
        }
        (None, None) => bail!("Nothing to run: pass a FILE or --server-path"),
    };

    if let Some(ref observer) = observer {
        observer.finish();
    }

    // ── Optional download ────────────────────────────────────────────────
    let mut saved = None;
    if let (Ok(_), Some(dir)) = (&outcome, &cli.download) {
        let derivative = pipeline
            .download_derivative()
            .await
            .context("Failed to download the processed model")?;
        saved = Some(
            derivative
                .save_into(dir)
                .context("Failed to save the processed model")?,
        );
    }

    let snapshot = pipeline.snapshot();
    pipeline.unmount();

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialise snapshot")?
        );
    } else if !cli.quiet {
        print_summary(&snapshot, saved.as_deref());
    }

    match outcome {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("Pipeline failed")),
    }
}

fn print_summary(snapshot: &JobSnapshot, saved: Option<&std::path::Path>) {
    let name = snapshot.file_name.as_deref().unwrap_or("<none>");
    match snapshot.status {
        JobStatus::Ready => {
            eprintln!(
                "{} {}  →  {}",
                green("✔"),
                bold(name),
                snapshot.remote_id.as_deref().unwrap_or("")
            );
        }
        status => {
            eprintln!("{} {}  ({status})", red("✘"), bold(name));
        }
    }
    if let Some(path) = saved {
        eprintln!("   saved {}", bold(&path.display().to_string()));
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .backend_url(&cli.backend)
        .surface(&cli.surface)
        .poll_interval_ms(cli.poll_interval_ms)
        .poll_max_attempts(cli.poll_attempts)
        .upload_timeout_secs(cli.upload_timeout)
        .request_timeout_secs(cli.request_timeout);

    if let Some(ref url) = cli.model_api {
        builder = builder.model_api_url(url);
    }
    if let Some(ref url) = cli.derivative_api {
        builder = builder.derivative_api_url(url);
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}
