//! CLI binary for pii-extract.
//!
//! A thin shell over the library crate: maps CLI flags to `ExtractionConfig`,
//! runs one extraction per file and turns every failure kind into a message
//! the user can act on. Without a FILE argument it prompts for paths in a
//! loop until `exit`.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pii_extract::session::with_session;
use pii_extract::{
    resolve_session_provider, ErrorKind, ExtractionConfig, ExtractionProgressCallback,
    ExtractionResult, PiiExtractor, PiiRecord, ProgressCallback, SessionHandle,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner for one extraction at a time.
///
/// A fresh spinner is started when a file has been read and cleared when the
/// extraction completes, so the interactive loop gets one per path.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(ref bar) = *guard {
                f(bar);
            }
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_ingested(&self, bytes: usize) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Extracting");
        bar.set_message(format!("read {:.1} KB", bytes as f64 / 1024.0));
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(bar) {
                old.finish_and_clear();
            }
        }
    }

    fn on_request_start(&self) {
        self.with_bar(|bar| bar.set_message("waiting for the model…"));
    }

    fn on_chunk(&self, _len: usize, total: usize) {
        self.with_bar(|bar| bar.set_message(format!("receiving… {total} bytes")));
    }

    fn on_complete(&self, _outcome: Option<ErrorKind>) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract PII from one scanned document
  pii-extract invoice.png

  # Machine-readable result ({"status":"success","record":{...}})
  pii-extract --json label.jpg > label.json

  # Interactive: prompt for paths until 'exit'
  pii-extract

  # Azure OpenAI deployment
  pii-extract --provider azure --endpoint https://contoso.openai.azure.com \
              --model pii-gpt4o form.png

  # Group the session's requests under a hosted thread (deleted on exit)
  pii-extract --hosted-session

EXTRACTED FIELDS:
  name, company_email, personal_email, personal_phone_number,
  company_phone_number, personal_address, company_ship_to_address,
  company_ship_from_address

EXIT CODES:
  0  record extracted (interactive mode: clean exit)
  1  extraction failed (see message)
  2  setup failed (configuration, provider, credentials file)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY                 OpenAI API key
  OPENAI_BASE_URL                OpenAI-compatible server (default https://api.openai.com/v1)
  AZURE_OPENAI_ENDPOINT          Azure OpenAI resource endpoint
  AZURE_OPENAI_CHAT_DEPLOYMENT   Azure chat deployment name
  AZURE_OPENAI_API_KEY           Azure OpenAI API key
  PII_EXTRACT_*                  Any flag below, e.g. PII_EXTRACT_MODEL
  RUST_LOG                       Override log filter

The model must support strict JSON-schema structured output
(e.g. gpt-4o-mini, gpt-4o 2024-08-06 or later).
"#;

/// Extract personally identifiable information from document images.
#[derive(Parser, Debug)]
#[command(
    name = "pii-extract",
    version,
    about = "Extract personally identifiable information from document images",
    long_about = "Extract names, e-mail addresses, phone numbers and postal addresses from a \
document image using a vision model constrained to a strict JSON schema. Supports OpenAI, \
Azure OpenAI and any OpenAI-compatible endpoint.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file to extract from. Omit to be prompted for paths interactively.
    input: Option<PathBuf>,

    /// Model provider: openai or azure. Auto-detected from the environment if not set.
    #[arg(long, env = "PII_EXTRACT_PROVIDER")]
    provider: Option<String>,

    /// Model ID (OpenAI) or deployment name (Azure). Default: gpt-4o-mini.
    #[arg(long, env = "PII_EXTRACT_MODEL")]
    model: Option<String>,

    /// OpenAI-compatible base URL or Azure resource endpoint.
    #[arg(long, env = "PII_EXTRACT_ENDPOINT")]
    endpoint: Option<String>,

    /// API key. Prefer the provider's environment variable.
    #[arg(long, env = "PII_EXTRACT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Azure OpenAI REST API version.
    #[arg(long, env = "PII_EXTRACT_API_VERSION")]
    api_version: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PII_EXTRACT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max completion tokens.
    #[arg(long, env = "PII_EXTRACT_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Seconds allowed for the request to be accepted and the stream to start.
    #[arg(long, env = "PII_EXTRACT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file containing a custom system instruction.
    #[arg(long, env = "PII_EXTRACT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Declared media type of the image (default: from the file extension).
    #[arg(long, env = "PII_EXTRACT_MEDIA_TYPE")]
    media_type: Option<String>,

    /// Run all extractions inside one hosted session, deleted on exit.
    #[arg(long, env = "PII_EXTRACT_HOSTED_SESSION")]
    hosted_session: bool,

    /// Print the tagged result as JSON instead of a table.
    #[arg(long, env = "PII_EXTRACT_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PII_EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PII_EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the result and errors.
    #[arg(short, long, env = "PII_EXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; INFO lines would
    // tear it, so only errors are logged while it is shown.
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

    match run(&cli, show_progress).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<ExitCode> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, progress_cb).await?;

    let sessions = if cli.hosted_session {
        Some(resolve_session_provider(&config).context("Cannot use a hosted session")?)
    } else {
        None
    };

    let extractor =
        PiiExtractor::from_config(config).context("Failed to configure the model service")?;
    if !cli.quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            dim(&format!("model service: {}", extractor.service_name()))
        );
    }

    // ── Hosted session ───────────────────────────────────────────────────
    // The session is deleted before `run` returns, whatever the work's outcome.
    match sessions {
        Some(provider) => with_session(provider, |handle| {
            let extractor = &extractor;
            async move { extract_all(cli, extractor, Some(&handle)).await }
        })
        .await
        .context("Failed to create hosted session")?,
        None => extract_all(cli, &extractor, None).await,
    }
}

/// The file given on the command line, or the interactive loop.
async fn extract_all(
    cli: &Cli,
    extractor: &PiiExtractor,
    session: Option<&SessionHandle>,
) -> Result<ExitCode> {
    match cli.input {
        Some(ref path) => {
            let result = extract_one(extractor, path, session).await;
            report(cli, &result)?;
            if result.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        None => {
            interactive(cli, extractor, session).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// One extraction, cancelled by Ctrl-C.
async fn extract_one(
    extractor: &PiiExtractor,
    path: &Path,
    session: Option<&SessionHandle>,
) -> ExtractionResult {
    extractor
        .extract_file_until(path, session, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

/// Prompt for paths until `exit`, end of input or Ctrl-C at the prompt.
async fn interactive(
    cli: &Cli,
    extractor: &PiiExtractor,
    session: Option<&SessionHandle>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", bold("File path (or 'exit') >"));
        io::stderr().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            eprintln!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let result = extract_one(extractor, Path::new(input), session).await;
        report(cli, &result)?;
    }

    Ok(())
}

/// Print a result: the record (or JSON) on stdout, failures on stderr.
fn report(cli: &Cli, result: &ExtractionResult) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(result).context("Failed to serialise result")?;
        println!("{json}");
        return Ok(());
    }

    match result {
        ExtractionResult::Success { record } => {
            print_record(record);
            if !cli.quiet {
                eprintln!(
                    "{} {}/{} fields found",
                    green("✔"),
                    bold(&record.populated_count().to_string()),
                    record.fields().count()
                );
            }
        }
        ExtractionResult::Failure(failure) => {
            eprintln!("{} {}", red("✘"), failure_message(failure.kind));
            if cli.verbose {
                eprintln!("  {}", dim(&failure.detail));
                if !failure.raw.is_empty() {
                    eprintln!("  {} {}", dim("raw:"), failure.raw);
                }
            }
        }
    }
    Ok(())
}

fn print_record(record: &PiiRecord) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (field, value) in record.fields() {
        let label = bold(&format!("{field:<26}"));
        let line = match value {
            Some(v) if !v.is_empty() => format!("{label} {v}\n"),
            _ => format!("{label} {}\n", dim("(none)")),
        };
        handle.write_all(line.as_bytes()).ok();
    }
}

/// Actionable message for each failure kind.
fn failure_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "File not found. Check the path points to a readable file and try again.",
        ErrorKind::ServiceUnavailable => {
            "The model service is unavailable. Check the endpoint and your network, then retry."
        }
        ErrorKind::AuthRejected => {
            "The model service rejected the credentials. Check the API key and its permissions."
        }
        ErrorKind::SchemaRejected => {
            "The model service rejected the request. The model or deployment may not support \
             strict JSON-schema output."
        }
        ErrorKind::StreamInterrupted => {
            "The connection dropped while the answer was streaming. Retry the extraction."
        }
        ErrorKind::EmptyResponse => {
            "The model returned no answer. The image may be unreadable; try a clearer scan."
        }
        ErrorKind::SchemaViolation => {
            "The model's answer did not match the expected fields. Run with -v to see it."
        }
        ErrorKind::Cancelled => "Cancelled.",
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.to_lowercase());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref version) = cli.api_version {
        builder = builder.api_version(version);
    }
    if let Some(ref media_type) = cli.media_type {
        builder = builder.media_type(media_type);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
