//! absa-seed CLI: split, label, and merge ABSA weak-label batches.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use absa_seed::config::AppConfig;
use absa_seed::corpus::{self, BATCH_PREFIX, DEFAULT_LINES_PER_FILE};
use absa_seed::error::AbsaResult;
use absa_seed::labeling::{BatchLabeler, BatchReport};
use absa_seed::llm::OllamaClient;

#[derive(Parser)]
#[command(
    name = "absa-seed",
    version,
    about = "Weak-label Korean fashion reviews for ABSA with a local Ollama model"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a JSONL corpus into numbered batch files.
    Split {
        /// Input corpus, one `{"rid", "sentence"}` object per line.
        #[arg(long)]
        in_file: PathBuf,

        /// Directory for `batch_NN.jsonl` files.
        #[arg(long)]
        out_dir: PathBuf,

        /// Records per batch file.
        #[arg(long, default_value_t = DEFAULT_LINES_PER_FILE)]
        lines: usize,

        /// Batch file name prefix.
        #[arg(long, default_value = BATCH_PREFIX)]
        prefix: String,
    },

    /// Label every `batch_*.jsonl` in a directory, resuming previous runs.
    Label {
        /// Directory containing `batch_*.jsonl`.
        #[arg(long)]
        batches_dir: PathBuf,

        /// Directory for `seeds_*.jsonl` and `errors_*.log`.
        #[arg(long)]
        out_dir: PathBuf,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Merge all `seeds_batch_*.jsonl` into one file.
    Merge {
        /// Directory containing `seeds_batch_*.jsonl`.
        #[arg(long)]
        in_dir: PathBuf,

        /// Merged output file.
        #[arg(long)]
        out_file: PathBuf,
    },

    /// Check that the Ollama backend is reachable and the model is installed.
    Probe {
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args)]
struct BackendArgs {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the Ollama base URL.
    #[arg(long)]
    host: Option<String>,

    /// Override the model name.
    #[arg(long)]
    model: Option<String>,
}

impl BackendArgs {
    fn load(self) -> AbsaResult<AppConfig> {
        let mut config = AppConfig::load_or_default(self.config.as_deref())?;
        config.ollama = config.ollama.with_overrides(self.host, self.model);
        Ok(config)
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Split {
            in_file,
            out_dir,
            lines,
            prefix,
        } => {
            let files = corpus::split_corpus(&in_file, &out_dir, lines, &prefix)?;
            println!("Wrote {} batch files to {}", files.len(), out_dir.display());
        }

        Commands::Label {
            batches_dir,
            out_dir,
            backend,
        } => {
            let config = backend.load()?;

            let stop = Arc::new(AtomicBool::new(false));
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                // A second signal while a stop is pending exits immediately.
                signal_hook::flag::register_conditional_shutdown(signal, 130, Arc::clone(&stop))
                    .into_diagnostic()?;
                signal_hook::flag::register(signal, Arc::clone(&stop)).into_diagnostic()?;
            }

            let reports = label(&config, &batches_dir, &out_dir, stop)?;
            let labeled: usize = reports.iter().map(|r| r.labeled).sum();
            let errors: usize = reports.iter().map(|r| r.total_errors()).sum();
            println!(
                "Labeled {labeled} records across {} batches ({errors} logged errors) → {}",
                reports.len(),
                out_dir.display()
            );
            if reports.iter().any(|r| r.interrupted) {
                println!("Stopped early; re-run the same command to resume.");
            }
        }

        Commands::Merge { in_dir, out_file } => {
            let count = corpus::merge_outputs(&in_dir, &out_file)?;
            println!("Merged {count} records → {}", out_file.display());
        }

        Commands::Probe { backend } => {
            let client = probe(backend.load()?)?;
            println!("Ollama reachable at {}", client.config().base_url);
            println!("  installed models: {}", client.available_models().join(", "));
            println!("  model \"{}\" is installed", client.model());
        }
    }

    Ok(())
}

fn label(
    config: &AppConfig,
    batches_dir: &Path,
    out_dir: &Path,
    stop: Arc<AtomicBool>,
) -> AbsaResult<Vec<BatchReport>> {
    let mut client = OllamaClient::new(config.ollama.clone());
    warn_if_unready(&mut client);

    let labeler = BatchLabeler::new(&client, config.labeling.clone()).with_stop_flag(stop);
    Ok(labeler.label_dir(batches_dir, out_dir)?)
}

fn probe(config: AppConfig) -> AbsaResult<OllamaClient> {
    let mut client = OllamaClient::new(config.ollama);
    client.ensure_ready()?;
    Ok(client)
}

/// Labeling still runs when the probe fails: every record is retried and
/// logged, and the backend may come up mid-run.
fn warn_if_unready(client: &mut OllamaClient) {
    if let Err(e) = client.ensure_ready() {
        tracing::warn!(error = %e, "backend not ready, requests will be retried per record");
    }
}
