//! letterflow - metered letter generation
//!
//! Operator CLI for the letterflow runtime: inspect the transition table and
//! backoff schedule, probe the generation service, and run a generation
//! against an in-memory store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use letterflow_core::{
    allowed_transitions, AllowanceAccount, GenerationParams, LetterId, LetterStatus, OwnerId,
    RetryAttempt,
};
use letterflow_runtime::{
    CircuitBreaker, GenerationOrchestrator, GenerationOutcome, InMemoryStore, LetterStore,
    LlmProvider, ProviderRegistry, ResilientClient, RuntimeConfig,
};

/// letterflow - metered letter generation
#[derive(Parser, Debug)]
#[command(name = "letterflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a YAML runtime configuration file
    #[arg(short, long, env = "LETTERFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the letter transition table
    Transitions {
        /// Only show moves out of this status
        #[arg(long)]
        from: Option<LetterStatus>,
    },

    /// Print the retry backoff schedule from the configuration
    Backoff {
        /// Number of delays to print (defaults to max_retries)
        #[arg(short = 'n', long)]
        attempts: Option<u32>,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Probe the generation service with a minimal request
    Health,

    /// Generate one letter against an in-memory store
    Generate(GenerateArgs),
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Owner id for the seeded allowance account
    #[arg(long, default_value = "local-owner")]
    owner: String,

    /// Letter id for the seeded draft
    #[arg(long, default_value = "local-letter")]
    letter: String,

    /// Credits to seed the account with
    #[arg(long, default_value = "1")]
    credits: u32,

    /// Kind of letter (e.g. complaint, demand, notice)
    #[arg(long = "type")]
    letter_type: String,

    #[arg(long)]
    sender: String,

    #[arg(long)]
    recipient: String,

    #[arg(long)]
    subject: String,

    /// Facts the letter must convey
    #[arg(long)]
    details: String,

    #[arg(long)]
    tone: Option<String>,

    /// Give up between attempts after this long (e.g. "20s")
    #[arg(long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    letter_id: &'a str,
    status: LetterStatus,
    content: Option<&'a str>,
    error: Option<&'a str>,
    attempts: &'a [RetryAttempt],
    credit_refunded: bool,
    credits_remaining: Option<u32>,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn build_provider(config: &RuntimeConfig) -> Result<Arc<dyn LlmProvider>> {
    let registry = ProviderRegistry::with_defaults();
    registry
        .create(&config.provider.kind, &config.provider.options)
        .with_context(|| format!("Failed to create provider '{}'", config.provider.kind))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Transitions { from } => print_transitions(from),
        Commands::Backoff { attempts } => print_backoff(&config, attempts),
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Health => health(&config).await,
        Commands::Generate(args) => generate(config, args).await,
    }
}

fn print_transitions(from: Option<LetterStatus>) -> Result<()> {
    let sources: Vec<LetterStatus> = match from {
        Some(status) => vec![status],
        None => LetterStatus::ALL.to_vec(),
    };

    for status in sources {
        let targets: Vec<&str> = allowed_transitions(status)
            .iter()
            .map(|s| s.as_str())
            .collect();
        if targets.is_empty() {
            println!("{:<15} (terminal)", status.as_str());
        } else {
            println!("{:<15} -> {}", status.as_str(), targets.join(" | "));
        }
    }
    Ok(())
}

fn print_backoff(config: &RuntimeConfig, attempts: Option<u32>) -> Result<()> {
    let policy = &config.retry;
    let count = attempts.unwrap_or(policy.max_retries);

    println!(
        "base={:?} multiplier={} max={:?} jitter=±{:.0}%",
        policy.base_delay,
        policy.multiplier,
        policy.max_delay,
        policy.jitter * 100.0
    );
    for attempt in 0..count {
        println!(
            "retry {:>2}: {} ms",
            attempt + 1,
            policy.capped_delay(attempt).as_millis()
        );
    }
    Ok(())
}

async fn health(config: &RuntimeConfig) -> Result<()> {
    let provider = build_provider(config)?;
    let client = ResilientClient::new(
        provider,
        Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
        config.retry.clone(),
        config.completion.timeout,
    );

    let report = client.health_check(&config.completion.model).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.healthy {
        anyhow::bail!("Generation service is unhealthy");
    }
    Ok(())
}

async fn generate(config: RuntimeConfig, args: GenerateArgs) -> Result<()> {
    let provider = build_provider(&config)?;

    let owner = OwnerId::new(args.owner);
    let letter_id = LetterId::new(args.letter);

    let store = Arc::new(InMemoryStore::new());
    store.insert_account(AllowanceAccount::new(owner.clone(), args.credits));
    store
        .insert(letterflow_core::Letter::new_draft(
            letter_id.clone(),
            owner.clone(),
            args.subject.clone(),
        ))
        .await
        .context("Failed to seed draft letter")?;
    tracing::debug!(owner = %owner, letter_id = %letter_id, credits = args.credits, "Seeded in-memory store");

    let orchestrator = GenerationOrchestrator::builder()
        .provider(provider)
        .memory_store(store.clone())
        .config(config)
        .build()
        .context("Invalid runtime configuration")?;

    let params = GenerationParams {
        letter_type: args.letter_type,
        sender_name: args.sender,
        recipient_name: args.recipient,
        subject: args.subject,
        details: args.details,
        tone: args.tone,
    };

    let outcome: GenerationOutcome = match args.deadline {
        Some(limit) => {
            let deadline = tokio::time::Instant::now() + limit;
            orchestrator
                .generate_letter_with_deadline(&owner, &letter_id, &params, deadline)
                .await?
        }
        None => orchestrator.generate_letter(&owner, &letter_id, &params).await?,
    };

    let view = OutcomeView {
        letter_id: outcome.letter_id.as_str(),
        status: outcome.status,
        content: outcome.content.as_deref(),
        error: outcome.error.as_deref(),
        attempts: &outcome.attempts,
        credit_refunded: outcome.credit_refunded,
        credits_remaining: store.account(&owner).map(|a| a.credits_remaining),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);

    if !outcome.is_success() {
        anyhow::bail!("Generation failed");
    }
    Ok(())
}
