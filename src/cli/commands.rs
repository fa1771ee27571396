//! CLI command definitions for sluice.
//!
//! Three commands: `run` (provision resources, then poll until
//! interrupted), `provision` (create-if-absent, then exit), and `send`
//! (enqueue a test message, useful against a local stack).

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::aws;
use crate::config::AppConfig;
use crate::pipeline::MessagePipeline;
use crate::poller::Poller;
use crate::queue::{QueueClient, SqsQueue};
use crate::storage::S3Store;

/// Queue drain worker: archive SQS messages to S3.
#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Drain an SQS queue into S3 with retry and dead-letter routing")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Provision resources, then poll the source queue until interrupted.
    Run(RunArgs),

    /// Create the queues and bucket if absent, then exit.
    Provision(ProvisionArgs),

    /// Send a test message to the source queue.
    Send(SendArgs),
}

/// Arguments for `sluice run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Source queue URL (overrides SLUICE_QUEUE_URL).
    #[arg(long)]
    pub queue_url: Option<String>,

    /// Dead-letter queue URL (overrides SLUICE_DLQ_URL).
    #[arg(long)]
    pub dlq_url: Option<String>,

    /// Destination bucket (overrides SLUICE_BUCKET).
    #[arg(long)]
    pub bucket: Option<String>,

    /// Maximum attempts per message before diverting.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Messages per receive call (1-10).
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Skip resource provisioning at startup.
    #[arg(long)]
    pub no_provision: bool,
}

/// Arguments for `sluice provision`.
#[derive(Parser, Debug)]
pub struct ProvisionArgs {
    /// Source queue URL (overrides SLUICE_QUEUE_URL).
    #[arg(long)]
    pub queue_url: Option<String>,

    /// Dead-letter queue URL (overrides SLUICE_DLQ_URL).
    #[arg(long)]
    pub dlq_url: Option<String>,

    /// Destination bucket (overrides SLUICE_BUCKET).
    #[arg(long)]
    pub bucket: Option<String>,

    /// Output the provisioning summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `sluice send`.
#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Message body, stored verbatim by the worker.
    #[arg(long)]
    pub body: String,

    /// Message attributes as KEY=VALUE pairs; repeatable.
    #[arg(long = "attribute", value_name = "KEY=VALUE")]
    pub attributes: Vec<String>,

    /// Source queue URL (overrides SLUICE_QUEUE_URL).
    #[arg(long)]
    pub queue_url: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Provision(args) => run_provision_command(args).await,
        Commands::Send(args) => run_send_command(args).await,
    }
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.queue_url, args.dlq_url, args.bucket)?;
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    let (sqs, s3) = aws::build_clients(&config).await;
    if args.no_provision {
        info!("skipping resource provisioning");
    } else {
        aws::provision(&sqs, &s3, &config).await?;
    }

    let queue: Arc<dyn QueueClient> = Arc::new(SqsQueue::new(sqs, config.queue_url.clone()));
    let store = Arc::new(S3Store::new(s3));
    let pipeline = MessagePipeline::new(
        store,
        queue.clone(),
        config.bucket.clone(),
        config.dead_letter_queue_url.clone(),
        config.max_attempts,
        config.backoff_policy(),
    );
    let poller = Arc::new(Poller::new(queue, pipeline, config.poller_config()));

    let handle = poller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down after the current cycle");
            handle.stop();
        }
    });

    info!(
        queue = %config.queue_url,
        bucket = %config.bucket,
        "starting archiver"
    );
    poller.run().await?;
    Ok(())
}

async fn run_provision_command(args: ProvisionArgs) -> anyhow::Result<()> {
    let config = load_config(args.queue_url, args.dlq_url, args.bucket)?;

    let (sqs, s3) = aws::build_clients(&config).await;
    let summary = aws::provision(&sqs, &s3, &config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            queue = %summary.queue_url,
            dead_letter_queue = %summary.dead_letter_queue_url,
            bucket = %summary.bucket,
            "resources ready"
        );
    }
    Ok(())
}

async fn run_send_command(args: SendArgs) -> anyhow::Result<()> {
    let config = load_config(args.queue_url, None, None)?;
    let attributes = parse_attributes(&args.attributes)?;

    let (sqs, _s3) = aws::build_clients(&config).await;
    let queue = SqsQueue::new(sqs, config.queue_url.clone());
    queue
        .send_message(&config.queue_url, &args.body, &attributes)
        .await?;

    info!(queue = %config.queue_url, "message sent");
    Ok(())
}

/// Environment configuration with CLI overrides applied.
fn load_config(
    queue_url: Option<String>,
    dlq_url: Option<String>,
    bucket: Option<String>,
) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(url) = queue_url {
        config.queue_url = url;
    }
    if let Some(url) = dlq_url {
        config.dead_letter_queue_url = url;
    }
    if let Some(bucket) = bucket {
        config.bucket = bucket;
    }
    config.validate()?;
    Ok(config)
}

/// Parses repeated KEY=VALUE attribute arguments.
fn parse_attributes(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| anyhow::anyhow!("invalid attribute '{pair}', expected KEY=VALUE"))
        })
        .collect()
}
