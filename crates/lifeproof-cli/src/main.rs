mod archive;
mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use lifeproof_ai::http::DEFAULT_ENDPOINT;
use lifeproof_ai::{AnthropicClient, Classifier, ClassifierWorker, Evaluator, load_gold_standard};
use lifeproof_batch::{Orchestrator, stale_in_flight};
use lifeproof_core::{ModelTier, PipelineConfig};
use lifeproof_store::{DocumentSource, DuckLedger, FsDocumentSource, Ledger};
use tracing::info;

#[derive(Parser)]
#[command(name = "lifeproof")]
#[command(about = "Risk-classify Attending Physician Statements for underwriting triage")]
#[command(version)]
struct Cli {
    /// Pipeline config (JSON). Missing fields take their defaults.
    #[arg(short, long, env = "LIFEPROOF_CONFIG")]
    config: Option<PathBuf>,

    /// DuckDB ledger file
    #[arg(long, env = "LIFEPROOF_LEDGER", default_value = "lifeproof.duckdb")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify documents under a source directory
    Run {
        /// Root directory holding the documents
        source: PathBuf,

        /// Document ids relative to the root (default: every .txt/.pdf found)
        ids: Vec<String>,

        /// Write summaries/ and failed/ JSON files here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reprocess documents that are already COMPLETED
        #[arg(long)]
        force: bool,

        /// Force every document onto one model tier (FAST or ESCALATED)
        #[arg(long)]
        tier: Option<ModelTier>,

        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Stop waiting for the batch after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        #[arg(long)]
        fast_model: Option<String>,

        #[arg(long)]
        escalated_model: Option<String>,

        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Per-request HTTP timeout
        #[arg(long, default_value_t = 120)]
        request_timeout_secs: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show ledger records
    Status {
        /// One document (default: all)
        document_id: Option<String>,
    },
    /// Show the tier a document would be routed to, without calling a model
    Route {
        /// A .txt or .pdf file
        file: PathBuf,
    },
    /// Check the current prompt against a gold standard of human-validated cases
    Eval {
        /// JSONL file, one {case_id, input_text, human_summary} object per line
        #[arg(long)]
        gold_standard: PathBuf,

        /// Also score each summary with a judge model
        #[arg(long)]
        judge: bool,

        /// Judge model (default: the escalated model)
        #[arg(long)]
        judge_model: Option<String>,

        /// Write the full report as JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        #[arg(long, default_value_t = 120)]
        request_timeout_secs: u64,
    },
    /// List active records not updated for a while
    Reconcile {
        #[arg(long, default_value_t = 900)]
        older_than_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("lifeproof v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Run {
            source,
            ids,
            output,
            force,
            tier,
            max_concurrency,
            deadline_secs,
            fast_model,
            escalated_model,
            api_key,
            endpoint,
            request_timeout_secs,
            json,
        } => {
            if let Some(n) = max_concurrency {
                config.max_concurrency = n;
            }
            if deadline_secs.is_some() {
                config.deadline_secs = deadline_secs;
            }
            if let Some(model) = fast_model {
                config.fast_model = model;
            }
            if let Some(model) = escalated_model {
                config.escalated_model = model;
            }
            config.validate()?;

            let Some(api_key) = api_key else {
                bail!("no API key: pass --api-key or set ANTHROPIC_API_KEY");
            };

            let source = FsDocumentSource::new(source);
            let ids = if ids.is_empty() {
                source
                    .discover()
                    .with_context(|| format!("scanning {}", source.root().display()))?
            } else {
                ids
            };
            if ids.is_empty() {
                eprintln!("No documents found under {}", source.root().display());
                return Ok(());
            }

            let ledger = open_ledger(&cli.ledger)?;
            let client = AnthropicClient::new(
                &endpoint,
                api_key,
                Duration::from_secs(request_timeout_secs),
            );
            let config = Arc::new(config);
            let classifier = Classifier::new(Arc::clone(&config), Arc::new(client));
            let worker = ClassifierWorker::new(classifier, Arc::new(source), ledger.clone());
            let orchestrator = Orchestrator::new(worker, &config)
                .force_reprocess(force)
                .tier_override(tier);

            let report = orchestrator.run(&ids).await?;

            if let Some(out_dir) = output {
                let mut written = 0usize;
                for id in report.outcomes.keys() {
                    let record = ledger.get(id).await?;
                    if archive::archive_record(&out_dir, &record)?.is_some() {
                        written += 1;
                    }
                }
                eprintln!("  Archived {written} records to {}", out_dir.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", display::render_report(&report));
            }
        }
        Command::Status { document_id } => {
            let ledger = open_ledger(&cli.ledger)?;
            match document_id {
                Some(id) => {
                    let record = ledger
                        .get(&id)
                        .await
                        .with_context(|| format!("looking up {id}"))?;
                    print!("{}", display::render_record_card(&record));
                    let history = ledger.history(&id).await?;
                    print!("{}", display::render_history(&history));
                }
                None => {
                    let records = ledger.list().await?;
                    print!("{}", display::render_record_table(&records));
                }
            }
        }
        Command::Route { file } => {
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                bail!("not a document path: {}", file.display());
            };
            let root = match file.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let text = FsDocumentSource::new(root)
                .fetch(name)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            print!(
                "{}",
                display::render_route(&file.display().to_string(), &text, &config)
            );
        }
        Command::Eval {
            gold_standard,
            judge,
            judge_model,
            output,
            api_key,
            endpoint,
            request_timeout_secs,
        } => {
            config.validate()?;
            let Some(api_key) = api_key else {
                bail!("no API key: pass --api-key or set ANTHROPIC_API_KEY");
            };
            let cases = load_gold_standard(&gold_standard)?;
            if cases.is_empty() {
                bail!("no cases in {}", gold_standard.display());
            }
            info!(cases = cases.len(), judge, "evaluating gold standard");

            let client: Arc<AnthropicClient> = Arc::new(AnthropicClient::new(
                &endpoint,
                api_key,
                Duration::from_secs(request_timeout_secs),
            ));
            let judge_model = judge_model.unwrap_or_else(|| config.escalated_model.clone());
            let mut evaluator = Evaluator::new(Classifier::new(Arc::new(config), client.clone()));
            if judge {
                evaluator = evaluator.with_judge(client, judge_model);
            }
            let report = evaluator.run(&cases).await;

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                eprintln!("  Results saved to {}", path.display());
            }
            print!("{}", display::render_eval(&report));
            if !report.overall_pass {
                bail!(
                    "gold-standard regression failed: {} of {} cases passed",
                    report.passed,
                    report.total_cases
                );
            }
        }
        Command::Reconcile { older_than_secs } => {
            let ledger = open_ledger(&cli.ledger)?;
            let stale =
                stale_in_flight(ledger.as_ref(), Duration::from_secs(older_than_secs)).await?;
            if stale.is_empty() {
                println!("No stale records.");
            } else {
                println!("{} stale record(s):", stale.len());
                print!("{}", display::render_record_table(&stale));
            }
        }
    }

    Ok(())
}

fn open_ledger(path: &Path) -> anyhow::Result<Arc<dyn Ledger>> {
    let ledger = DuckLedger::open_persistent(path)
        .with_context(|| format!("opening ledger {}", path.display()))?;
    Ok(Arc::new(ledger))
}
