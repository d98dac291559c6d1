//! CLI binary for docexplain.
//!
//! A thin shim over the library crate: maps CLI flags onto
//! `ExplainerConfig`, renders analyses, and runs the follow-up chat loop.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docexplain::{
    AnalysisReport, AnalysisResult, ClientInfo, Confidence, DocumentExplainer, DocumentKind,
    DocumentSession, ExplainProgressCallback, ExplainerConfig, Gated, ProgressCallback, Upload,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Spinner with notice lines printed above it.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExplainProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, filename: &str, kind: DocumentKind) {
        self.bar.set_prefix("Extracting");
        let what = match kind {
            DocumentKind::Pdf => "text layer",
            DocumentKind::Image => "OCR",
        };
        self.bar.set_message(format!("{filename} ({what})…"));
    }

    fn on_page_ocr(&self, page_num: usize) {
        self.bar.set_message(format!("OCR on page {page_num}…"));
    }

    fn on_extraction_complete(&self, chars: usize, ocr_pages: &[usize]) {
        self.bar.println(format!(
            "{} Extracted {} characters",
            green("✓"),
            bold(&chars.to_string())
        ));
        if !ocr_pages.is_empty() {
            let pages: Vec<String> = ocr_pages.iter().map(|p| p.to_string()).collect();
            let noun = if pages.len() == 1 { "page" } else { "pages" };
            self.bar.println(format!(
                "  {}",
                dim(&format!("OCR applied to {noun} {}", pages.join(", ")))
            ));
        }
    }

    fn on_analysis_start(&self) {
        self.bar.set_prefix("Analysing");
        self.bar.set_message("asking the model…");
    }

    fn on_warning(&self, message: &str) {
        self.bar.println(format!("{} {}", yellow("⚠"), message));
    }

    fn on_analysis_saved(&self, record_id: i64) {
        self.bar
            .println(format!("  {}", dim(&format!("Saved to history as #{record_id}"))));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Explain a letter, then ask follow-up questions
  docexplain analyze letter.pdf --chat

  # Explain a scanned image (needs tesseract with eng+deu data)
  docexplain analyze scan.jpg

  # Machine-readable analysis
  docexplain analyze notice.pdf --json > analysis.json

  # Keep the original in object storage (ENABLE_OBJECT_STORAGE=true)
  docexplain analyze contract.pdf --store-original

  # Past analyses and remaining quota
  docexplain history
  docexplain usage

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  DOCEXPLAIN_PROVIDER     Provider name (openai, anthropic, gemini, ollama, …)
  DOCEXPLAIN_MODEL        Model ID (default gpt-4o-mini)
  DATABASE_URL            Analysis history (default sqlite:///./documents.db)
  ANALYSIS_LIMIT          Analyses per window (default 10)
  CHAT_LIMIT              Questions per window (default 20)
  RATE_LIMIT_WINDOW_HOURS Window length (default 24)
  MAX_FILE_SIZE_MB        Upload ceiling (default 20)
  OCR_LANGUAGES           Tesseract languages (default eng+deu)
  PDFIUM_LIB_PATH         Directory containing libpdfium
  ENABLE_OBJECT_STORAGE   true to keep originals in R2
  R2_ACCOUNT_ID, R2_ACCESS_KEY_ID, R2_SECRET_ACCESS_KEY, R2_BUCKET_NAME

  A .env file in the working directory is loaded automatically.
"#;

/// Explain official documents in plain language.
#[derive(Parser, Debug)]
#[command(
    name = "docexplain",
    version,
    about = "Explain official documents in plain language with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// LLM model ID.
    #[arg(long, global = true, env = "DOCEXPLAIN_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "DOCEXPLAIN_PROVIDER")]
    provider: Option<String>,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "DOCEXPLAIN_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "DOCEXPLAIN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCEXPLAIN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "DOCEXPLAIN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a PDF or image and print the explanation.
    Analyze {
        /// PDF, PNG, JPG/JPEG or TIFF file.
        file: PathBuf,

        /// Ask follow-up questions after the analysis (reads stdin).
        #[arg(long)]
        chat: bool,

        /// Ask one question after the analysis; repeatable.
        #[arg(short = 'Q', long = "question")]
        questions: Vec<String>,

        /// Print the analysis as JSON.
        #[arg(long)]
        json: bool,

        /// Keep the original file in object storage.
        #[arg(long)]
        store_original: bool,
    },

    /// List stored analyses, newest first.
    History {
        #[arg(long)]
        json: bool,
    },

    /// Delete all stored analyses and their stored originals.
    ClearHistory {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show usage against the rate limits.
    Usage {
        #[arg(long)]
        json: bool,
    },

    /// Download a stored original by its storage key.
    Download {
        key: String,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let json_out = matches!(
        cli.command,
        Command::Analyze { json: true, .. }
            | Command::History { json: true }
            | Command::Usage { json: true }
    );
    let show_progress = !cli.quiet && !cli.no_progress && !json_out;
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

    let config = build_config(&cli)?;

    let progress = show_progress.then(CliProgressCallback::new);
    let mut builder = DocumentExplainer::builder().config(config);
    if let Some(ref cb) = progress {
        builder = builder.progress_callback(Arc::clone(cb) as ProgressCallback);
    }
    let explainer = builder.build().await.context("Failed to initialise")?;
    let mut session = DocumentSession::new(ClientInfo::new());

    match cli.command {
        Command::Analyze {
            file,
            chat,
            questions,
            json,
            store_original,
        } => {
            let upload = Upload::from_path(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?
                .with_store_original(store_original);

            let outcome = explainer.analyze_upload(&mut session, upload).await;
            if let Some(ref cb) = progress {
                cb.finish();
            }
            let report = match outcome.context("Analysis failed")? {
                Gated::Allowed(report) => report,
                Gated::Denied(decision) => {
                    anyhow::bail!(decision.message.unwrap_or_else(|| "Limit reached".into()))
                }
            };

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report.analysis)
                        .context("Failed to serialise analysis")?
                );
            } else {
                print_report(&report);
            }

            for q in &questions {
                ask_and_print(&explainer, &mut session, q).await?;
            }
            if chat {
                chat_loop(&explainer, &mut session).await?;
            }
        }

        Command::History { json } => {
            let rows = explainer.history().context("Failed to load history")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).context("Failed to serialise history")?
                );
            } else if rows.is_empty() {
                println!("No analyses stored yet.");
            } else {
                println!("{} stored analyses\n", bold(&rows.len().to_string()));
                for row in rows {
                    println!(
                        "#{:<4} {}  {}  {}",
                        row.id,
                        dim(&row.upload_timestamp.format("%Y-%m-%d %H:%M").to_string()),
                        bold(&row.filename),
                        confidence_badge(row.analysis.confidence_level()),
                    );
                    println!("      {}", row.analysis.summary);
                    if let Some(key) = row.storage_key {
                        println!("      {}", dim(&format!("original: {key}")));
                    }
                }
            }
        }

        Command::ClearHistory { yes } => {
            let count = explainer.history_count().context("Failed to load history")?;
            if count == 0 {
                println!("History is already empty.");
                return Ok(());
            }
            if !yes && !confirm(&format!("Delete all {count} stored analyses?"))? {
                println!("Cancelled.");
                return Ok(());
            }
            let deleted = explainer
                .delete_history()
                .await
                .context("Failed to delete history")?;
            println!(
                "{} Deleted {} analyses",
                green("✔"),
                bold(&deleted.records.to_string())
            );
            if deleted.blobs_deleted > 0 {
                println!("  and {} stored originals", deleted.blobs_deleted);
            }
        }

        Command::Usage { json } => {
            let stats = explainer
                .usage(&session)
                .context("Failed to read usage")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stats).context("Failed to serialise usage")?
                );
            } else {
                println!(
                    "Analyses: {}/{} used ({} remaining)",
                    stats.analysis_count, stats.analysis_limit, stats.analysis_remaining
                );
                println!(
                    "Questions: {}/{} used ({} remaining)",
                    stats.chat_count, stats.chat_limit, stats.chat_remaining
                );
                if let Some(h) = stats.resets_in_hours {
                    println!("{}", dim(&format!("Resets in {h:.1} hours")));
                }
            }
        }

        Command::Download { key, output } => {
            if !explainer.blobs_enabled() {
                anyhow::bail!("Object storage is disabled (set ENABLE_OBJECT_STORAGE=true)");
            }
            let bytes = explainer
                .download_original(&key)
                .await
                .with_context(|| format!("Could not download {key}"))?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "{} {} bytes → {}",
                green("✔"),
                bytes.len(),
                bold(&output.display().to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args onto the environment-derived config.
fn build_config(cli: &Cli) -> Result<ExplainerConfig> {
    let mut config = ExplainerConfig::from_env().context("Invalid configuration")?;
    if let Some(ref m) = cli.model {
        config.model = m.clone();
    }
    if let Some(ref p) = cli.provider {
        config.provider_name = Some(p.clone());
    }
    if let Some(t) = cli.api_timeout {
        config.api_timeout_secs = t;
    }
    Ok(config)
}

fn confidence_badge(level: Confidence) -> String {
    let label = format!("{level} confidence");
    match level {
        Confidence::High => green(&label),
        Confidence::Medium => yellow(&label),
        Confidence::Low => red(&label),
        Confidence::Unknown => dim(&label),
    }
}

fn print_analysis(analysis: &AnalysisResult) {
    println!("\n{}", bold("Summary"));
    println!("{}", analysis.summary);
    for section in analysis.sections() {
        println!("\n{}", bold(section.title));
        if section.items.is_empty() {
            println!("{}", dim(section.empty));
            continue;
        }
        let checklist = section.title == "Action Checklist";
        for item in section.items {
            println!("{} {}", if checklist { "[ ]" } else { "•" }, item);
        }
    }
    println!(
        "\n{}: {}",
        bold("Analysis Confidence"),
        confidence_badge(analysis.confidence_level())
    );
}

fn print_report(report: &AnalysisReport) {
    print_analysis(&report.analysis);
    eprintln!(
        "\n{}",
        dim(&format!(
            "{} · {} chars · {} tokens · {}ms · {} analyses left",
            report.filename,
            report.extracted_chars,
            report.usage.total(),
            report.duration_ms,
            report.remaining
        ))
    );
}

async fn ask_and_print(
    explainer: &DocumentExplainer,
    session: &mut DocumentSession,
    question: &str,
) -> Result<bool> {
    match explainer.ask(session, question).await {
        Ok(Gated::Allowed(answer)) => {
            println!("\n{} {}\n{}", cyan("?"), bold(question), answer);
            Ok(true)
        }
        Ok(Gated::Denied(decision)) => {
            eprintln!(
                "{} {}",
                red("✘"),
                decision.message.unwrap_or_else(|| "Limit reached".into())
            );
            Ok(false)
        }
        Err(e) => {
            eprintln!("{} {}", red("✘"), e);
            Ok(true)
        }
    }
}

async fn chat_loop(explainer: &DocumentExplainer, session: &mut DocumentSession) -> Result<()> {
    eprintln!(
        "\n{}",
        dim("Ask about the document. /clear resets the conversation, /quit exits.")
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", cyan("›"));
        io::stderr().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.clear_chat();
                eprintln!("{}", dim("Conversation cleared."));
            }
            question => {
                if !ask_and_print(explainer, session, question).await? {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
