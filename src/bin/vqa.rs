//! CLI binary for edgequake-vqa.
//!
//! A thin composition root over the library crate: maps CLI flags to
//! `AgentConfig`, builds the agent once, runs a single query, and prints
//! the answer.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_vqa::{
    AgentConfig, AgentEvent, EventSink, ImageQaAgent, InvocationContext, DEFAULT_MAX_DIMENSION,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
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

// ── Event sinks ──────────────────────────────────────────────────────────────

/// Terminal sink: a spinner while the run is in flight, a tick or cross
/// when it ends. The answer itself goes to stdout from `main`.
struct SpinnerEventSink {
    bar: ProgressBar,
}

impl SpinnerEventSink {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("vqa");
        Self { bar }
    }
}

impl EventSink for SpinnerEventSink {
    fn emit_event_created(&self, event: AgentEvent) {
        self.bar.set_message(event.message().to_string());
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn emit_query_completed(&self, event: AgentEvent) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", green("✔"), dim(&format!("query {}", event.query_id)));
    }

    fn emit_query_failed(&self, event: AgentEvent) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(event.message()));
    }
}

/// Machine-readable sink: one JSON object per event on stdout.
struct JsonLinesEventSink {
    out: Mutex<io::Stdout>,
}

impl JsonLinesEventSink {
    fn write(&self, event: &AgentEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
        }
    }
}

impl EventSink for JsonLinesEventSink {
    fn emit_event_created(&self, event: AgentEvent) {
        self.write(&event);
    }

    fn emit_query_completed(&self, event: AgentEvent) {
        self.write(&event);
    }

    fn emit_query_failed(&self, event: AgentEvent) {
        self.write(&event);
    }
}

/// Plain sink used with `--quiet` or `--no-progress`.
struct QuietEventSink;

impl EventSink for QuietEventSink {
    fn emit_event_created(&self, _event: AgentEvent) {}
    fn emit_query_completed(&self, _event: AgentEvent) {}
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One image
  vqa --images https://example.com/car.jpg --question "What color is the car?"

  # Several images, compared in one call
  vqa --images "https://h/1.png, https://h/2.png" --question "Which photo is newer?"

  # Full host context from a file, events as JSON lines
  vqa --context request.json --json

  # Use a specific provider and model
  vqa --provider ollama --model gemma3:27b --images ... --question ..."#;

#[derive(Parser, Debug)]
#[command(
    name = "vqa",
    version,
    about = "Ask a Vision Language Model a question about remote images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image URLs, separated by `--separator`.
    #[arg(short, long, env = "VQA_IMAGES")]
    images: Option<String>,

    /// The question to ask about the images.
    #[arg(short = 'Q', long, env = "VQA_QUESTION")]
    question: Option<String>,

    /// JSON file holding the full invocation context (queryId, params, …).
    /// `--images` and `--question` override its params when given.
    #[arg(long, env = "VQA_CONTEXT")]
    context: Option<PathBuf>,

    /// Correlation id echoed in every event.
    #[arg(long, env = "VQA_QUERY_ID")]
    query_id: Option<String>,

    /// Agent id echoed in every event.
    #[arg(long, env = "VQA_AGENT_ID")]
    agent_id: Option<String>,

    /// Separator between image URLs.
    #[arg(long, env = "VQA_SEPARATOR", default_value_t = ',')]
    separator: char,

    /// Longest edge in pixels before an image is downscaled.
    #[arg(long, env = "VQA_MAX_DIMENSION", default_value_t = DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,

    /// Images downloaded in parallel.
    #[arg(short, long, env = "VQA_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Directory for temporary downloads (default: OS temp dir).
    #[arg(long, env = "VQA_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// LLM model ID (e.g. gemma3:27b, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: ollama, openai, anthropic, gemini, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file with a custom prompt template (`{question}` placeholder).
    #[arg(long, env = "VQA_PROMPT")]
    prompt: Option<PathBuf>,

    /// Max answer tokens.
    #[arg(long, env = "VQA_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "VQA_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "VQA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print events as JSON lines instead of the bare answer.
    #[arg(long, env = "VQA_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "VQA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VQA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VQA_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build context and agent ──────────────────────────────────────────
    let context = build_context(&cli).await?;
    let config = build_config(&cli).await?;
    let agent = ImageQaAgent::from_config(config).context("Failed to initialise agent")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = if cli.json {
        let sink = JsonLinesEventSink {
            out: Mutex::new(io::stdout()),
        };
        agent.run(&context, &sink).await
    } else if show_progress {
        agent.run(&context, &SpinnerEventSink::new()).await
    } else {
        agent.run(&context, &QuietEventSink).await
    };

    for w in &report.cleanup_warnings {
        eprintln!("{} {}", dim("warning:"), w);
    }

    match (report.answer, report.error) {
        (Some(answer), _) => {
            if !cli.json {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(answer.as_bytes())
                    .context("Failed to write to stdout")?;
                if !answer.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }
            if !cli.quiet && !show_progress && !cli.json {
                eprintln!(
                    "Answered from {} images in {}ms",
                    report.images, report.duration_ms
                );
            }
            Ok(())
        }
        (None, Some(e)) => Err(e).context("Query failed"),
        (None, None) => anyhow::bail!("Query produced no answer"),
    }
}

/// Assemble the invocation context from `--context` and the flags.
async fn build_context(cli: &Cli) -> Result<InvocationContext> {
    let mut context = if let Some(ref path) = cli.context {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read context from {:?}", path))?;
        serde_json::from_str::<InvocationContext>(&raw)
            .with_context(|| format!("Invalid context JSON in {:?}", path))?
    } else {
        let (Some(images), Some(question)) = (&cli.images, &cli.question) else {
            anyhow::bail!("Either --context or both --images and --question are required");
        };
        let query_id = cli
            .query_id
            .clone()
            .unwrap_or_else(|| format!("cli-{}", std::process::id()));
        InvocationContext::new(query_id, images.clone(), question.clone())
    };

    if let Some(ref images) = cli.images {
        context.params.filename = images.clone();
    }
    if let Some(ref question) = cli.question {
        context.params.specific_question = question.clone();
    }
    if let Some(ref id) = cli.query_id {
        context.query_id = id.clone();
    }
    if let Some(ref id) = cli.agent_id {
        context.agent_id = Some(id.clone());
    }
    Ok(context)
}

/// Map CLI args to `AgentConfig`.
async fn build_config(cli: &Cli) -> Result<AgentConfig> {
    let mut builder = AgentConfig::builder()
        .max_dimension(cli.max_dimension)
        .locator_separator(cli.separator)
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.prompt {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.system_prompt(template);
    }

    builder.build().context("Invalid configuration")
}
