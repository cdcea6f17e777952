//! `kannon` - outbound campaign mail pipeline
//!
//! `kannon dispatcher` claims the backlog, publishes queue payloads and drains
//! outcome events. `kannon sender` delivers queued payloads through the SMTP
//! relay.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kannon_core::broker::{CONSUMER_SENDER, SUBJECT_SENDING};
use kannon_core::{
    Config, Dispatcher, MailBuilder, NatsBroker, OutcomeConsumer, OutcomeKind, SendingPoolManager,
    SendingWorker, SmtpMailer, SmtpSender, SqliteStore,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "kannon", version, about = "Outbound campaign mail pipeline")]
struct Cli {
    /// JSON configuration file; overrides `KANNON_CONFIG`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Claim the backlog, publish payloads and consume outcome events.
    Dispatcher,
    /// Deliver queued payloads through the SMTP relay.
    Sender,
}

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "kannon=info,kannon_core=info,kannon_smtp=info,kannon_mime=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load_with(cli.config.as_deref()).context("cannot load configuration")?;

    let result = match cli.command {
        Command::Dispatcher => until_interrupted(dispatcher(config)).await,
        Command::Sender => until_interrupted(sender(config)).await,
    };
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Fatal error");
    }
    result
}

/// Runs `task` until it fails or the process receives Ctrl-C.
async fn until_interrupted(task: impl Future<Output = anyhow::Result<()>>) -> anyhow::Result<()> {
    tokio::select! {
        result = task => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for shutdown signal")?;
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("cannot open database {}", config.database_url))?;
    Ok(Arc::new(store))
}

async fn dispatcher(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let broker = NatsBroker::connect(&config.nats_url).await?;

    let errors = broker
        .durable_consumer(
            OutcomeKind::Error.durable_name(),
            OutcomeKind::Error.subject(),
        )
        .await?;
    let delivered = broker
        .durable_consumer(
            OutcomeKind::Delivered.durable_name(),
            OutcomeKind::Delivered.subject(),
        )
        .await?;

    let dispatcher = Dispatcher::new(
        SendingPoolManager::new(store.clone()),
        MailBuilder::new(store),
        Arc::new(broker),
    )
    .policy(config.dispatch_failure_policy);

    info!("Dispatcher running");
    tokio::try_join!(
        async { dispatcher.run().await.context("dispatcher loop stopped") },
        async {
            OutcomeConsumer::new(OutcomeKind::Error, errors)
                .run()
                .await
                .context("error consumer stopped")
        },
        async {
            OutcomeConsumer::new(OutcomeKind::Delivered, delivered)
                .run()
                .await
                .context("delivered consumer stopped")
        },
    )?;
    Ok(())
}

async fn sender(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let broker = NatsBroker::connect(&config.nats_url).await?;
    let consumer = broker
        .durable_consumer(CONSUMER_SENDER, SUBJECT_SENDING)
        .await?;

    let relay = config.relay();
    info!(host = relay.host(), port = relay.port(), "Sending worker running");
    let mailer = SmtpMailer::new(store.clone(), Arc::new(SmtpSender::new(relay)));

    SendingWorker::new(consumer, store, mailer, Arc::new(broker))
        .run()
        .await
        .context("sending worker stopped")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["kannon", "dispatcher"]).unwrap();
        assert_eq!(cli.command, Command::Dispatcher);
        assert_eq!(cli.config, None);

        let cli = Cli::try_parse_from(["kannon", "sender", "--config", "kannon.json"]).unwrap();
        assert_eq!(cli.command, Command::Sender);
        assert_eq!(cli.config, Some(PathBuf::from("kannon.json")));
    }

    #[test]
    fn test_requires_subcommand() {
        assert!(Cli::try_parse_from(["kannon"]).is_err());
        assert!(Cli::try_parse_from(["kannon", "bounce"]).is_err());
    }

    #[test]
    fn test_default_filter_covers_every_crate() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_FILTER).unwrap();
        let rendered = filter.to_string();
        for target in ["kannon=", "kannon_core=", "kannon_smtp=", "kannon_mime="] {
            assert!(rendered.contains(target), "{target} missing from {rendered}");
        }
    }
}
