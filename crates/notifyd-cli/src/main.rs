use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use nostr_sdk::{Alphabet, Client, Filter, SingleLetterTag};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notifyd_core::{
    pump_events, AvatarCache, Config, Dispatcher, NotificationSink, NotifySendSink,
    ProfileResolver, ProfileStore, RelayTransport, Subscriber, Waiters, NOTIFICATIONS_SUB_ID,
};

#[derive(Parser)]
#[command(name = "nostr-notifyd")]
#[command(about = "Desktop notifications for nostr events")]
struct Cli {
    /// Public key to watch (hex or npub); falls back to NOSTR_KEY or the
    /// configured secret key
    pubkey: Option<String>,

    /// Relay URL to connect to (repeatable; overrides NOSTR_RELAYS and
    /// `git config nostr.relays`)
    #[arg(long)]
    relay: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::discover(cli.pubkey.as_deref(), &cli.relay).await {
        Ok(config) => config,
        Err(err) => {
            eprintln!("nostr-notifyd: {err}");
            eprintln!("usage: nostr-notifyd <your-pubkey>");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = run(config).await {
        error!("{err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: Config) -> Result<()> {
    tokio::fs::create_dir_all(&config.avatar_dir)
        .await
        .with_context(|| format!("creating avatar cache dir {}", config.avatar_dir.display()))?;

    let client = match &config.keys {
        Some(keys) => Client::builder().signer(keys.clone()).build(),
        None => Client::default(),
    };
    for url in &config.relays {
        client
            .add_relay(url)
            .await
            .with_context(|| format!("invalid relay url {url}"))?;
    }
    client.connect().await;

    let transport: Rc<dyn Subscriber> = Rc::new(RelayTransport::new(client.clone()));
    let waiters = Rc::new(Waiters::new(config.answer_timeout));
    let profiles = Rc::new(RefCell::new(ProfileStore::default()));
    let avatars = Rc::new(AvatarCache::new(config.avatar_dir.clone()));
    let resolver = ProfileResolver::new(
        profiles.clone(),
        waiters.clone(),
        transport.clone(),
        avatars.clone(),
    );
    let sink: Rc<dyn NotificationSink> = Rc::new(NotifySendSink::new(config.notify_timeout_ms));
    let dispatcher = Dispatcher::new(profiles, waiters, resolver, avatars, sink, config.keys.clone());

    let (event_tx, event_rx) = mpsc::channel(256);

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            tokio::task::spawn_local(pump_events(client.clone(), event_tx));

            let filter = Filter::new()
                .custom_tag(SingleLetterTag::lowercase(Alphabet::P), config.pubkey.to_hex())
                .limit(0);
            transport
                .subscribe(NOTIFICATIONS_SUB_ID, filter)
                .await
                .context("subscribing to the notification stream")?;
            info!(pubkey = %config.pubkey, "listening for nostr events");

            tokio::select! {
                _ = dispatcher.run(event_rx) => {}
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
            anyhow::Ok(())
        })
        .await?;

    client.disconnect().await;
    Ok(())
}
