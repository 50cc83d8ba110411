//! datapipe - command surface for the ingestion gateway
//!
//! Every subcommand prints one JSON document on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datapipe_orchestration::config::ObjectStoreConfig;
use datapipe_orchestration::{
    BatchOrchestrator, DatapipeConfig, ExternalValidator, HealthAggregator, IngestRequest, JobKind,
    KafkaProducer, LineageClient, MessageProducer, MessagePublisher, ModelTrackingClient,
    PostgresProbe, Probe, SourceReader, SqlSourceReader, StreamRequest, StreamingOrchestrator,
    WorkflowClient, WorkflowTrigger,
};
use datapipe_storage::{BucketNames, ObjectStoreAdapter, S3Config, S3ObjectStore};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datapipe", version, about = "Batch and streaming ingestion gateway")]
struct Cli {
    /// YAML v1 configuration file
    #[arg(short, long, default_value = "datapipe.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Snapshot a source table into the raw bucket
    Ingest {
        table: String,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        no_validation: bool,
        #[arg(long)]
        no_workflow: bool,
    },
    /// Publish one JSON payload to the broker topic
    StreamPublish { partition: i32, payload: String },
    /// Trigger the streaming monitoring job
    StreamStart,
    /// Show the orchestrator state of a run
    Status { kind: JobKind, run_id: String },
    /// Probe every configured dependency
    Health,
    /// Register a lineage document with the governance service
    Lineage { document: String },
    /// Create a model-tracking run
    MlRun { experiment_id: String, name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DatapipeConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let output = run(cli.command, &config, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(command: Command, config: &DatapipeConfig, cancel: &CancellationToken) -> Result<Value> {
    match command {
        Command::Ingest {
            table,
            prefix,
            limit,
            no_validation,
            no_workflow,
        } => {
            let reader = Arc::new(SqlSourceReader::from_config(&config.source)?);
            let orchestrator = BatchOrchestrator::new(
                reader.clone(),
                object_store(&config.object_store),
                Arc::new(ExternalValidator::from_config(&config.validator)),
                Arc::new(WorkflowClient::new(&config.orchestrator)?),
            )
            .with_suite(config.validator.suite.clone());

            let request = IngestRequest {
                source_table: table,
                destination_prefix: prefix,
                limit,
                run_validation: !no_validation,
                trigger_workflow: !no_workflow,
            };
            let result = orchestrator.ingest(&request, cancel).await;
            reader.close().await;
            Ok(serde_json::to_value(result?)?)
        }

        Command::StreamPublish { partition, payload } => {
            let payload: Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let streaming = streaming(config)?;

            let published = streaming
                .publish(&StreamRequest::new(partition, payload), cancel)
                .await;
            let report = streaming.shutdown().await;
            published?;
            if report.undelivered > 0 {
                anyhow::bail!("{} message(s) left undelivered at shutdown", report.undelivered);
            }
            Ok(json!({ "status": "sent" }))
        }

        Command::StreamStart => {
            let streaming = streaming(config)?;
            let run = streaming.start_monitoring().await;
            streaming.shutdown().await;
            Ok(serde_json::to_value(run?)?)
        }

        Command::Status { kind, run_id } => {
            let client = WorkflowClient::new(&config.orchestrator)?;
            Ok(client.get_status(kind, &run_id).await?)
        }

        Command::Health => {
            let mut aggregator = HealthAggregator::new(config.health.probe_timeout());

            aggregator.register_result(
                "mysql",
                SqlSourceReader::from_config(&config.source)
                    .map(|reader| Probe::Source(Arc::new(reader) as Arc<dyn SourceReader>)),
            );
            match PostgresProbe::from_config(&config.source) {
                Ok(Some(postgres)) => {
                    aggregator.register("postgres", Probe::Postgres(postgres));
                }
                Ok(None) => {}
                Err(e) => {
                    aggregator.register_result("postgres", Err(e));
                }
            }
            aggregator.register("object_store", Probe::ObjectStore(object_store(&config.object_store)));
            aggregator.register_result(
                "broker",
                KafkaProducer::new(&config.broker).map(|producer| Probe::Broker {
                    producer: Arc::new(producer) as Arc<dyn MessageProducer>,
                    topic: config.broker.topic.clone(),
                }),
            );
            aggregator.register_result(
                "orchestrator",
                WorkflowClient::new(&config.orchestrator).map(|client| Probe::Orchestrator(Arc::new(client))),
            );
            if let Some(tracking) = &config.model_tracking {
                aggregator.register_result(
                    "model_tracking",
                    ModelTrackingClient::new(tracking).map(|client| Probe::ModelTracking(Arc::new(client))),
                );
            }

            Ok(serde_json::to_value(aggregator.check().await)?)
        }

        Command::Lineage { document } => {
            let governance = config
                .governance
                .as_ref()
                .context("governance section is not configured")?;
            let document: Value =
                serde_json::from_str(&document).context("lineage document is not valid JSON")?;

            let body = LineageClient::new(governance)?.register_lineage(&document).await?;
            Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
        }

        Command::MlRun {
            experiment_id,
            name,
        } => {
            let tracking = config
                .model_tracking
                .as_ref()
                .context("model_tracking section is not configured")?;
            Ok(ModelTrackingClient::new(tracking)?
                .create_run(&experiment_id, &name)
                .await?)
        }
    }
}

fn object_store(config: &ObjectStoreConfig) -> Arc<ObjectStoreAdapter> {
    let store = S3ObjectStore::new(&S3Config {
        endpoint: config.endpoint.clone(),
        access_key: config.access_key.clone(),
        secret_key: config.secret_key.clone(),
        region: config.region.clone(),
        timeout: config.request_timeout(),
    });
    Arc::new(ObjectStoreAdapter::with_upload_retries(
        Arc::new(store),
        BucketNames::new(config.bucket_raw.clone(), config.bucket_processed.clone()),
        config.max_upload_retries,
        config.upload_retry_base_delay(),
    ))
}

fn streaming(config: &DatapipeConfig) -> Result<StreamingOrchestrator> {
    let producer = Arc::new(KafkaProducer::new(&config.broker)?);
    let publisher = MessagePublisher::from_config(producer, &config.broker);
    let workflow: Arc<dyn WorkflowTrigger> = Arc::new(WorkflowClient::new(&config.orchestrator)?);
    Ok(StreamingOrchestrator::new(publisher, workflow))
}
