//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use dank_core::contacts::Contact;
use dank_core::directory::{truncate_address, NameDirectory};
use dank_core::keystore::IdentityFile;
use dank_core::scheduler::ScanScheduler;
use dank_core::store::OutboxStore;
use dank_core::timeline::{TimelineEvent, TimelineHandle};
use dank_crypto::IdentityKeyPair;

use crate::client::Client;
use crate::config::Config;
use crate::output::{IdentityInfo, OutputFormat, OutputFormatter};
use crate::ExitCode;

/// dankchat - anonymous end-to-end encrypted messaging over a public relay
#[derive(Parser, Debug)]
#[command(name = "dank")]
#[command(version, about = "dankchat client - anonymous messaging over a public relay")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "DANK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Relay base URL, overrides the config file
    #[arg(long = "relay-url", global = true, env = "DANK_RELAY_URL")]
    pub relay_url: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate and store a new identity key
    Init {
        /// Replace an existing identity (messages sent to it become unreadable)
        #[arg(long)]
        force: bool,
    },
    /// Show this client's public key
    Whoami,
    /// Encrypt, sign and publish a message
    Send {
        /// Recipient public key (hex) or directory name
        recipient: String,
        /// Message text
        text: String,
    },
    /// Republish messages whose earlier publish failed
    Retry,
    /// Run one scan cycle and print new messages
    Scan,
    /// Scan periodically and print messages as they arrive, until Ctrl-C
    Watch,
    /// Rebuild and list conversations
    Contacts,
    /// List locally recorded sent messages and their delivery status
    Outbox,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let formatter = OutputFormatter::new(self.output, self.verbose);

        match self.command {
            Commands::Init { force } => init(&config, force, &formatter),
            Commands::Whoami => whoami(Client::open(config)?, &formatter).await,
            Commands::Send { recipient, text } => send(Client::open(config)?, &recipient, &text, &formatter).await,
            Commands::Retry => retry(Client::open(config)?, &formatter).await,
            Commands::Scan => scan(Client::open(config)?, &formatter).await,
            Commands::Watch => watch_loop(Client::open(config)?, &formatter).await,
            Commands::Contacts => contacts(Client::open(config)?, &formatter).await,
            Commands::Outbox => outbox(Client::open(config)?, &formatter).await,
        }
    }
}

fn identity_info(identity: &IdentityKeyPair, display_name: Option<String>, key_path: &std::path::Path) -> IdentityInfo {
    let public_key = identity.public_key_hex();
    IdentityInfo {
        address: truncate_address(&public_key),
        public_key,
        display_name,
        key_path: key_path.display().to_string(),
    }
}

fn init(config: &Config, force: bool, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let key_file = IdentityFile::new(config.key_path()?);
    let identity = key_file.create(force)?;
    formatter.print(&formatter.format_identity(&identity_info(&identity, None, key_file.path())));
    Ok(ExitCode::Success)
}

async fn whoami(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let key_path = client.config().key_path()?;
    let name = client.directory().resolve_public_key(client.identity().public_key()).await?;
    formatter.print(&formatter.format_identity(&identity_info(client.identity(), name, &key_path)));
    Ok(ExitCode::Success)
}

async fn send(client: Client, recipient: &str, text: &str, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let receipt = client.messenger(None).send(recipient, text).await?;
    formatter.print(&formatter.format_send(&receipt));
    Ok(ExitCode::Success)
}

async fn retry(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let report = client.messenger(None).retry_unpublished().await?;
    formatter.print(&formatter.format_retry(&report));
    if report.failed.is_empty() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::RelayUnreachable)
    }
}

async fn scan(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let (timeline, _task) = TimelineHandle::spawn();
    let report = client.reconciler().scan_cycle(&timeline).await?;
    formatter.print(&formatter.format_scan(&report));
    Ok(ExitCode::Success)
}

/// Every message in the conversations, oldest first across contacts
fn history_events(contacts: Vec<Contact>) -> Vec<TimelineEvent> {
    let mut events: Vec<_> = contacts
        .into_iter()
        .flat_map(|c| {
            let Contact {
                public_key,
                display_name,
                messages,
            } = c;
            messages.into_iter().map(move |message| TimelineEvent {
                contact: public_key.clone(),
                display_name: display_name.clone(),
                message,
            })
        })
        .collect();
    events.sort_by(|a, b| a.message.time.cmp(&b.message.time).then_with(|| a.contact.cmp(&b.contact)));
    events
}

async fn contacts(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let (timeline, _task) = TimelineHandle::spawn();
    formatter.progress("Scanning relay...");
    client.reconciler().full_rescan(&timeline).await?;
    formatter.print(&formatter.format_contacts(&timeline.snapshot().await?));
    Ok(ExitCode::Success)
}

async fn outbox(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let records = client.store().list_sent_messages().await?;
    formatter.print(&formatter.format_outbox(&records));
    Ok(ExitCode::Success)
}

async fn watch_loop(client: Client, formatter: &OutputFormatter) -> anyhow::Result<ExitCode> {
    let (timeline, _task) = TimelineHandle::spawn();
    let reconciler = Arc::new(client.reconciler());

    // History first; a failure here is not fatal, the scheduler retries
    formatter.progress("Scanning relay...");
    if let Err(e) = reconciler.full_rescan(&timeline).await {
        formatter.warning(&format!("initial scan failed: {e}"));
    }
    for event in history_events(timeline.snapshot().await?) {
        formatter.print(&formatter.format_event(&event));
    }

    // Nothing merges until the scheduler starts, so no event falls between
    // the snapshot and the subscription
    let mut events = timeline.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = ScanScheduler::new(reconciler, timeline.clone())
        .with_interval(client.config().scan_interval())
        .with_backoff(client.config().retry_policy());
    let mut scheduler = tokio::spawn(scheduler.run(shutdown_rx));
    info!("watching for new messages");

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => formatter.print(&formatter.format_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "timeline events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            result = &mut ctrl_c => {
                result?;
                break;
            }
            // The scheduler only ends on shutdown; treat an early end as fatal
            joined = &mut scheduler => {
                joined?;
                return Ok(ExitCode::GeneralError);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let stats = scheduler.await?;
    info!(cycles = stats.cycles, failures = stats.failures, "watch stopped");
    Ok(ExitCode::Success)
}
