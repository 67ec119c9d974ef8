use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use finding_ingest::apis::DefaultConnectorFactory;
use finding_ingest::app::ports::FindingProcessorPort;
use finding_ingest::config::{AppConfig, RunsFile};
use finding_ingest::credentials::permissions::{generate_external_id, setup_guide};
use finding_ingest::credentials::CredentialBroker;
use finding_ingest::domain::SourceType;
use finding_ingest::infra::{DiscardingSink, FixtureStore, HttpAssumeRoleClient, HttpProviderApi, NdjsonFindingSink};
use finding_ingest::observability::{logging, metrics};
use finding_ingest::pipeline::ingestion::{IngestionOrchestrator, IngestionRegistry, IngestionStatus, RateLimiters};

#[derive(Parser)]
#[command(name = "finding_ingest")]
#[command(about = "Cross-tenant security finding ingestion")]
#[command(version)]
struct Cli {
    /// Application config (TOML). Defaults apply when the file is missing.
    #[arg(long, default_value = "finding_ingest.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every run in a runs file and wait for all of them
    Ingest {
        /// TOML file with one [[runs]] table per run
        #[arg(long)]
        runs: PathBuf,
    },
    /// Assume a short validation lease and probe one source's permissions
    Validate {
        /// Source type: guardduty, security_hub or cloudtrail
        #[arg(long)]
        source: SourceType,
        #[arg(long)]
        account: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        external_id: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
    },
    /// Print the trust and permission policies a customer needs to create
    SetupGuide {
        /// Comma-separated source types; all sources when omitted
        #[arg(long, value_delimiter = ',')]
        sources: Vec<SourceType>,
        /// Reuse an existing external id instead of generating one
        #[arg(long)]
        external_id: Option<String>,
    },
}

async fn build_processor(config: &AppConfig) -> anyhow::Result<Arc<dyn FindingProcessorPort>> {
    Ok(match &config.output_dir {
        Some(dir) => Arc::new(NdjsonFindingSink::create(dir, "findings.ndjson").await?),
        None => {
            warn!("No output_dir configured, findings will be discarded");
            Arc::new(DiscardingSink)
        }
    })
}

async fn ingest(config: AppConfig, runs_path: PathBuf) -> anyhow::Result<()> {
    let runs = RunsFile::load(&runs_path)
        .with_context(|| format!("loading runs from {}", runs_path.display()))?;
    if runs.runs.is_empty() {
        bail!("{} contains no [[runs]]", runs_path.display());
    }

    let sts = Arc::new(HttpAssumeRoleClient::new(&config.broker)?);
    let api = Arc::new(HttpProviderApi::new(&config.provider)?);
    let broker = Arc::new(CredentialBroker::new(sts, config.broker.clone()));
    let mut orchestrator = IngestionOrchestrator::new(
        broker,
        Arc::new(DefaultConnectorFactory::new(api)),
        build_processor(&config).await?,
        RateLimiters::from_config(&config),
    );
    if let Some(dir) = &config.fixture_dir {
        orchestrator = orchestrator.with_fixtures(Arc::new(FixtureStore::load_dir(dir)?));
    }
    let registry = IngestionRegistry::new(Arc::new(orchestrator));

    let mut run_ids = Vec::with_capacity(runs.runs.len());
    for run in runs.runs {
        run_ids.push(registry.start(run).await);
    }
    info!("Started {} ingestion runs", run_ids.len());

    let mut failed = 0;
    for run_id in &run_ids {
        match registry.wait(run_id).await {
            Some(result) => {
                if result.status != IngestionStatus::Success {
                    failed += 1;
                }
                println!("{}", serde_json::to_string(&result)?);
            }
            None => {
                error!("Run {} produced no result", run_id);
                failed += 1;
            }
        }
    }

    let summary = registry.metrics().await;
    info!("Registry summary: {}", serde_json::to_string(&summary)?);
    if let Some(rendered) = metrics::render() {
        tracing::debug!("metrics snapshot:\n{}", rendered);
    }
    if failed > 0 {
        bail!("{} of {} runs did not succeed", failed, run_ids.len());
    }
    Ok(())
}

async fn validate(
    config: AppConfig,
    source: SourceType,
    account: String,
    role: String,
    external_id: String,
    region: String,
) -> anyhow::Result<()> {
    let sts = Arc::new(HttpAssumeRoleClient::new(&config.broker)?);
    let api = Arc::new(HttpProviderApi::new(&config.provider)?);
    let broker = CredentialBroker::new(sts, config.broker.clone());
    let report = broker
        .validate_source(api, source, &region, &account, &role, &external_id)
        .await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_valid() {
        bail!("{} validation failed with {} errors", source, report.errors.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();
    metrics::init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Ingest { runs } => ingest(config, runs).await,
        Commands::Validate {
            source,
            account,
            role,
            external_id,
            region,
        } => validate(config, source, account, role, external_id, region).await,
        Commands::SetupGuide { sources, external_id } => {
            let sources = if sources.is_empty() {
                SourceType::all().to_vec()
            } else {
                sources
            };
            let external_id = external_id.unwrap_or_else(generate_external_id);
            let guide = setup_guide(&sources, &config.broker.trusted_principal, &external_id);
            println!("{}", serde_json::to_string_pretty(&guide)?);
            Ok(())
        }
    }
}
