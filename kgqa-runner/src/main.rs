//! kgqa: LLM text-to-SPARQL evaluation harness
//!
//! # Subcommands
//! - `import`  : QALD dataset → batch file (optionally with entity resolution)
//! - `validate`: drop benchmark questions whose gold answers no longer hold
//! - `generate`: self-correcting query generation
//! - `baseline`: execute the gold queries
//! - `verify`  : compare generated results with the baseline
//! - `report`  : aggregate metrics
//! - `run`     : generate, baseline, verify and report in one go

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kgqa_core::config::TargetSpec;
use kgqa_core::labels::{label_endpoint, LabelCache};
use kgqa_core::models::BatchFile;
use kgqa_core::sparql::{EndpointSettings, QueryExecutor, RemoteEndpoint};
use kgqa_core::KgqaConfig;
use kgqa_ingest::{import_dataset, validate_dataset, EntityExtractor, ImportOptions, QaldDataset};
use tracing_subscriber::{fmt, EnvFilter};

use kgqa_runner::subsystems::generate::{generate_batch, GenerateContext, RetryPolicy};
use kgqa_runner::subsystems::verify::{run_verify, LabelResolver};
use kgqa_runner::subsystems::{backends, baseline, report};

const DEFAULT_CONFIG: &str = "kgqa.toml";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "kgqa", author, version, about = "Evaluate LLM-generated SPARQL against benchmark answers")]
struct Cli {
    /// Config file (default: kgqa.toml, optional when not given explicitly)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Command-line values that win over the config file.
#[derive(Debug, Default, Args)]
struct Overrides {
    /// Remote SPARQL endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// RDF file or directory for a local graph (repeatable)
    #[arg(long = "local-graph", global = true)]
    local_graph: Vec<String>,

    /// openai, deepseek, alibaba, anthropic, groq or local
    #[arg(long, global = true)]
    provider: Option<String>,

    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, env = "KGQA_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    #[arg(long, global = true)]
    temperature: Option<f32>,

    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a QALD dataset into a batch file
    Import {
        /// QALD-style JSON dataset
        input: PathBuf,

        /// Batch file to create
        #[arg(short, long)]
        output: PathBuf,

        /// Keep only the first N questions
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Ask the LLM for entity mentions and resolve them on the endpoint
        #[arg(long)]
        extract_entities: bool,
    },

    /// Check gold queries against the target and write a cleaned dataset
    Validate {
        input: PathBuf,

        /// Where to write the cleaned dataset and removal log (default: next to input)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Generate SPARQL for every pending question
    Generate {
        batch: PathBuf,

        /// Regenerate questions that already have a result
        #[arg(long)]
        force: bool,
    },

    /// Execute each question's baseline query
    Baseline {
        batch: PathBuf,

        #[arg(long)]
        force: bool,
    },

    /// Compare generated results with the baseline
    Verify {
        batch: PathBuf,

        /// Map Wikidata entity URIs to English labels first
        #[arg(long)]
        resolve_labels: bool,
    },

    /// Print and save the run summary
    Report {
        batch: PathBuf,

        /// Summary JSON path (default: <batch>_summary.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// generate + baseline + verify + report
    Run {
        batch: PathBuf,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        resolve_labels: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(path: Option<&str>, overrides: &Overrides) -> anyhow::Result<KgqaConfig> {
    let mut config = match path {
        Some(p) => KgqaConfig::load(p, true)
            .with_context(|| format!("failed to load config from {p}"))?,
        None => KgqaConfig::load(DEFAULT_CONFIG, false)
            .with_context(|| format!("failed to load config from {DEFAULT_CONFIG}"))?,
    };
    apply_overrides(&mut config, overrides);
    Ok(config)
}

/// A target given on the command line replaces the configured one; giving both
/// kinds on the command line is left for target validation to reject.
fn apply_overrides(config: &mut KgqaConfig, o: &Overrides) {
    if let Some(endpoint) = &o.endpoint {
        config.target.endpoint_url = Some(endpoint.clone());
        if o.local_graph.is_empty() {
            config.target.local_graph.clear();
        }
    }
    if !o.local_graph.is_empty() {
        config.target.local_graph = o.local_graph.clone();
        if o.endpoint.is_none() {
            config.target.endpoint_url = None;
        }
    }
    if let Some(provider) = &o.provider {
        config.llm.provider = provider.clone();
    }
    if let Some(model) = &o.model {
        config.llm.model = model.clone();
    }
    if let Some(key) = &o.api_key {
        config.llm.api_key = Some(key.clone());
    }
    if let Some(max_tokens) = o.max_tokens {
        config.llm.max_tokens = max_tokens;
    }
    if let Some(temperature) = o.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(max_retries) = o.max_retries {
        config.retry.max_retries = max_retries;
    }
}

fn load_batch(path: &Path) -> anyhow::Result<BatchFile> {
    BatchFile::load(path).with_context(|| format!("failed to load batch file {}", path.display()))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_import(
    config: &KgqaConfig,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
    extract_entities: bool,
) -> anyhow::Result<()> {
    let dataset = QaldDataset::load(input)
        .with_context(|| format!("failed to read dataset {}", input.display()))?;
    let options = ImportOptions { limit };

    let mut batch = if extract_entities {
        match config.target.resolve()? {
            TargetSpec::Remote { endpoint_url } => {
                let llm = backends::create_llm_from_config(config)?;
                let resolver =
                    RemoteEndpoint::new(endpoint_url, EndpointSettings::from(&config.target))?;
                let extractor = EntityExtractor::new(llm.as_ref(), &resolver);
                import_dataset(&dataset, options, Some(&extractor)).await?
            }
            TargetSpec::Local { .. } => {
                tracing::warn!("Entity extraction only applies to remote endpoints, skipping it");
                import_dataset(&dataset, options, None).await?
            }
        }
    } else {
        import_dataset(&dataset, options, None).await?
    };

    batch.save(output)?;
    tracing::info!(
        path = %output.display(),
        questions = batch.questions.len(),
        run_id = %batch.run_id,
        "Batch file created"
    );
    Ok(())
}

async fn cmd_validate(
    config: &KgqaConfig,
    input: &Path,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let dataset = QaldDataset::load(input)
        .with_context(|| format!("failed to read dataset {}", input.display()))?;
    let (_, executor) = backends::create_executor_from_config(config)?;

    let report = validate_dataset(&dataset, executor.as_ref()).await;
    let out_dir = output_dir.unwrap_or_else(|| {
        input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let (cleaned, log) = report.write(input, &out_dir)?;

    println!(
        "{}",
        serde_json::json!({
            "total_questions": report.total,
            "valid_questions": report.valid(),
            "removed_questions": report.removed.len(),
            "cleaned": cleaned,
            "removed_log": log,
        })
    );
    Ok(())
}

async fn stage_generate(
    config: &KgqaConfig,
    batch: &mut BatchFile,
    path: &Path,
    target: &TargetSpec,
    executor: &dyn QueryExecutor,
    force: bool,
) -> anyhow::Result<()> {
    let llm = backends::create_llm_from_config(config)?;
    let template = backends::load_prompt_template(config)?;
    let shapes = backends::shape_source(config, target);

    let ctx = GenerateContext {
        llm: llm.as_ref(),
        executor,
        template: &template,
        shapes: shapes.as_ref(),
        ontology: &config.prompt.ontology,
        target_is_local: target.is_local(),
        policy: RetryPolicy::from(config),
        force,
    };
    generate_batch(batch, path, &ctx).await?;
    Ok(())
}

async fn stage_verify(
    config: &KgqaConfig,
    batch: &mut BatchFile,
    path: &Path,
    resolve_labels: bool,
) -> anyhow::Result<()> {
    let stats = if resolve_labels || config.labels.resolve {
        let endpoint = label_endpoint(&config.labels, &config.target)?;
        let mut cache = LabelCache::new(config.labels.language.clone())?;
        let resolver = LabelResolver {
            cache: &mut cache,
            endpoint: &endpoint,
        };
        run_verify(batch, path, Some(resolver)).await?
    } else {
        run_verify(batch, path, None).await?
    };

    tracing::info!(
        compared = stats.compared,
        true_positive = stats.true_positive,
        false_positive = stats.false_positive,
        false_negative = stats.false_negative,
        invalid = stats.invalid,
        pending = stats.pending,
        "Verification finished"
    );
    Ok(())
}

async fn run(command: Commands, config: KgqaConfig) -> anyhow::Result<()> {
    match command {
        Commands::Import {
            input,
            output,
            limit,
            extract_entities,
        } => cmd_import(&config, &input, &output, limit, extract_entities).await,

        Commands::Validate { input, output_dir } => cmd_validate(&config, &input, output_dir).await,

        Commands::Generate { batch, force } => {
            let mut file = load_batch(&batch)?;
            let (target, executor) = backends::create_executor_from_config(&config)?;
            stage_generate(&config, &mut file, &batch, &target, executor.as_ref(), force).await
        }

        Commands::Baseline { batch, force } => {
            let mut file = load_batch(&batch)?;
            let (_, executor) = backends::create_executor_from_config(&config)?;
            let stats = baseline::run_baseline(&mut file, &batch, executor.as_ref(), force).await?;
            tracing::info!(
                executed = stats.executed,
                errors = stats.errors,
                empty = stats.empty,
                "Baseline finished"
            );
            Ok(())
        }

        Commands::Verify {
            batch,
            resolve_labels,
        } => {
            let mut file = load_batch(&batch)?;
            stage_verify(&config, &mut file, &batch, resolve_labels).await
        }

        Commands::Report { batch, output } => {
            let file = load_batch(&batch)?;
            report::write_report(&file, &batch, output.as_deref())?;
            Ok(())
        }

        Commands::Run {
            batch,
            force,
            resolve_labels,
            output,
        } => {
            let mut file = load_batch(&batch)?;
            let (target, executor) = backends::create_executor_from_config(&config)?;

            stage_generate(&config, &mut file, &batch, &target, executor.as_ref(), force).await?;
            baseline::run_baseline(&mut file, &batch, executor.as_ref(), force).await?;
            stage_verify(&config, &mut file, &batch, resolve_labels).await?;
            report::write_report(&file, &batch, output.as_deref())?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (API keys during development)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), &cli.overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = run(cli.command, config).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
