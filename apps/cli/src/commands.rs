//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use corpusbuilder_core::{
    CorpusIndex, Pipeline, PipelineConfig, ProgressReporter, RunSummary, SourceState,
};
use corpusbuilder_corpus::{WriteMode, read_corpus, verify_corpus};
use corpusbuilder_shared::{
    AppConfig, CONFIG_FILE_NAME, SourceSpec, config_dir, init_config, load_config,
    resolve_config_path,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CorpusBuilder: turn remote markdown documentation into a retrieval corpus.
#[derive(Parser)]
#[command(
    name = "corpusbuilder",
    version,
    about = "Ingest markdown documentation from source repositories into a JSONL corpus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run an ingestion over every configured source.
    Ingest {
        /// Config file (defaults to ./corpusbuilder.toml, then ~/.corpusbuilder/).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep the existing corpus and add only documents not yet present.
        #[arg(long)]
        append: bool,

        /// Override the corpus output path.
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Override the maximum number of in-flight fetches.
        #[arg(long)]
        concurrency: Option<u32>,

        /// Also write the run summary as JSON to this path.
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// Check a corpus file for duplicate ids and empty documents.
    Verify {
        /// Corpus file to check.
        corpus: PathBuf,
    },

    /// Show which documents a downstream index must re-embed.
    Diff {
        /// Corpus the index was built from.
        #[arg(long)]
        previous: PathBuf,

        /// Freshly ingested corpus.
        #[arg(long)]
        current: PathBuf,

        /// Treat every known document as changed.
        #[arg(long)]
        force: bool,

        /// List ids instead of only counts.
        #[arg(long)]
        ids: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write an example config file.
    Init {
        /// Write to ~/.corpusbuilder/ instead of the working directory.
        #[arg(long)]
        global: bool,
    },
    /// Show resolved configuration.
    Show {
        /// Config file to show instead of the resolved one.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "corpusbuilder=info",
        1 => "corpusbuilder=debug",
        _ => "corpusbuilder=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            config,
            append,
            corpus,
            concurrency,
            summary_json,
        } => {
            let opts = IngestOptions {
                config,
                append,
                corpus,
                concurrency,
                summary_json,
            };
            cmd_ingest(opts).await
        }
        Command::Verify { corpus } => cmd_verify(&corpus),
        Command::Diff {
            previous,
            current,
            force,
            ids,
        } => cmd_diff(&previous, &current, force, ids),
        Command::Config { action } => match action {
            ConfigAction::Init { global } => cmd_config_init(global),
            ConfigAction::Show { config } => cmd_config_show(config.as_deref()),
        },
    }
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

struct IngestOptions {
    config: Option<PathBuf>,
    append: bool,
    corpus: Option<PathBuf>,
    concurrency: Option<u32>,
    summary_json: Option<PathBuf>,
}

async fn cmd_ingest(opts: IngestOptions) -> Result<()> {
    let mut config = load_config(opts.config.as_deref())?;
    if let Some(corpus) = &opts.corpus {
        config.corpus_path = corpus.to_string_lossy().to_string();
    }
    if let Some(concurrency) = opts.concurrency {
        config.fetch_concurrency = concurrency;
    }
    config.validate()?;

    if config.sources.is_empty() {
        return Err(eyre!(
            "no sources configured; add [[sources]] entries to {CONFIG_FILE_NAME} (see `corpusbuilder config init`)"
        ));
    }

    let host = corpusbuilder_sources::build_host(&config)?;
    let mut pipeline_config = PipelineConfig::from(&config);
    if opts.append {
        pipeline_config.write_mode = WriteMode::Append;
    }

    info!(
        sources = config.sources.len(),
        corpus = %config.corpus_path,
        append = opts.append,
        provider = host.name(),
        "ingesting documentation"
    );

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight work");
                cancel.cancel();
            }
        })
    };

    let reporter = Arc::new(CliProgress::new());
    let pipeline = Pipeline::new(pipeline_config, host);
    let result = pipeline.run(cancel, reporter.clone()).await;
    ctrl_c.abort();
    reporter.spinner.finish_and_clear();

    let summary = result?;
    print_summary(&summary, &config.corpus_path);

    if let Some(path) = &opts.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .map_err(|e| eyre!("failed to write summary to {}: {e}", path.display()))?;
        info!(path = %path.display(), "wrote run summary");
    }

    match &summary.aborted {
        Some(abort) => Err(eyre!("ingestion aborted [{}]: {}", abort.kind, abort.message)),
        None => Ok(()),
    }
}

fn print_summary(summary: &RunSummary, corpus_path: &str) {
    println!();
    if let Some(abort) = &summary.aborted {
        println!("  Ingestion aborted: {}", abort.message);
    } else if summary.cancelled {
        println!("  Ingestion cancelled.");
    } else {
        println!("  Ingestion complete.");
    }
    println!("  Run:        {}", summary.run_id);
    println!("  Corpus:     {corpus_path}");
    println!("  Written:    {}", summary.written);
    println!("  Duplicates: {}", summary.duplicates);
    println!("  Skipped:    {}", summary.skipped);
    println!("  Dropped:    {}", summary.dropped);
    println!("  Time:       {:.1}s", summary.elapsed().as_secs_f64());

    if !summary.failed_sources.is_empty() {
        println!();
        println!("  Failed sources:");
        for failed in &summary.failed_sources {
            println!("    {} [{}] {}", failed.source, failed.kind, failed.message);
        }
    }

    if !summary.skipped_documents.is_empty() {
        println!();
        println!("  Skipped documents:");
        for skipped in &summary.skipped_documents {
            println!("    {} {} [{}]", skipped.source, skipped.path, skipped.kind);
        }
    }

    if !summary.dropped_documents.is_empty() {
        println!();
        println!("  Dropped (empty after normalization):");
        for dropped in &summary.dropped_documents {
            println!("    {} {}", dropped.source, dropped.path);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn source_state(&self, source: &SourceSpec, state: SourceState) {
        match state {
            SourceState::Failed => self.spinner.println(format!("  ✗ {source}")),
            SourceState::Done => self.spinner.println(format!("  ✓ {source}")),
            _ => self.spinner.set_message(format!("{source}: {state}")),
        }
    }

    fn document_fetched(&self, source: &SourceSpec, path: &str, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "Fetching {}/{} [{current}/{total}] {path}",
            source.owner, source.repo
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Corpus inspection
// ---------------------------------------------------------------------------

fn cmd_verify(corpus: &Path) -> Result<()> {
    let stats = verify_corpus(corpus)?;

    println!("  Records:    {}", stats.records);
    println!("  Unique ids: {}", stats.unique_ids);

    if stats.is_valid() {
        println!("  OK");
        return Ok(());
    }

    for id in &stats.duplicate_ids {
        println!("  duplicate id: {id}");
    }
    for id in &stats.empty_text {
        println!("  empty text:   {id}");
    }
    Err(eyre!(
        "{}: {} duplicate id(s), {} empty document(s)",
        corpus.display(),
        stats.duplicate_ids.len(),
        stats.empty_text.len()
    ))
}

fn cmd_diff(previous: &Path, current: &Path, force: bool, ids: bool) -> Result<()> {
    let index = CorpusIndex::load(previous)?;
    let records = read_corpus(current)?;
    let plan = index.plan(&records, force);

    println!("  New:       {}", plan.new.len());
    println!("  Changed:   {}", plan.changed.len());
    println!("  Unchanged: {}", plan.unchanged.len());
    println!("  Removed:   {}", plan.removed.len());

    if ids {
        for (label, list) in [
            ("new", &plan.new),
            ("changed", &plan.changed),
            ("removed", &plan.removed),
        ] {
            for id in list {
                println!("{label}\t{id}");
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init(global: bool) -> Result<()> {
    let path = if global {
        config_dir()?.join(CONFIG_FILE_NAME)
    } else {
        PathBuf::from(CONFIG_FILE_NAME)
    };
    let path = init_config(&path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
    match resolve_config_path(explicit)? {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config file found, showing defaults"),
    }
    let config: AppConfig = load_config(explicit)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ingest_overrides() {
        let cli = Cli::try_parse_from([
            "corpusbuilder",
            "-vv",
            "ingest",
            "--append",
            "--concurrency",
            "8",
            "--corpus",
            "out/docs.jsonl",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Ingest {
                append,
                concurrency,
                corpus,
                ..
            } => {
                assert!(append);
                assert_eq!(concurrency, Some(8));
                assert_eq!(corpus, Some(PathBuf::from("out/docs.jsonl")));
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn parses_diff() {
        let cli = Cli::try_parse_from([
            "corpusbuilder",
            "diff",
            "--previous",
            "a.jsonl",
            "--current",
            "b.jsonl",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Diff { force: false, .. }));
    }
}
