//! adopt-detector binary entrypoint.
//! Wires the pollers, the two pipeline stages, the Telegram control plane and
//! the status server, then waits for ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adopt_detector::chat::telegram::spawn_update_stream;
use adopt_detector::chat::{self, Dispatcher, TelegramApi};
use adopt_detector::classifier::{Classifier, HttpClassifier, NotifyPolicy};
use adopt_detector::config::{self, Keys, Settings, DEFAULT_KEYS_PATH};
use adopt_detector::ingest::credentials::{spawn_refresh_loop, CredentialManager, RefreshCfg};
use adopt_detector::ingest::providers::deviantart::DEFAULT_BASE_URL;
use adopt_detector::ingest::providers::{DeviantArtAuth, DeviantArtClient};
use adopt_detector::ingest::registry::FeedRegistry;
use adopt_detector::ingest::retry::RetryPolicy;
use adopt_detector::ingest::scheduler::{spawn_poller_workers, SchedulerCfg};
use adopt_detector::ingest::types::FeedSource;
use adopt_detector::ingest::{Poller, PollerCfg, SiteTable};
use adopt_detector::metrics::Metrics;
use adopt_detector::pipeline::notifier::{spawn_notifier, Notifier};
use adopt_detector::pipeline::{self, writer::spawn_writer};
use adopt_detector::site::Site;
use adopt_detector::status::{self, StatusState};
use adopt_detector::store::{MemoryStore, MongoStore, Store};
use adopt_detector::shutdown;

/// How long pollers get to finish an in-flight cycle after ctrl-c.
const POLLER_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "adopt-detector", version, about)]
struct Cli {
    /// Write a key file template and prepare the store collections, then exit.
    #[arg(long)]
    init: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,

    /// Path of the TOML key file.
    #[arg(long, env = "KEYS_PATH", default_value = DEFAULT_KEYS_PATH)]
    keys: PathBuf,

    /// Keep everything in memory instead of MongoDB (dry runs).
    #[arg(long)]
    memory_store: bool,
}

fn init_tracing(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn open_store(cli: &Cli, settings: &Settings) -> Result<Store> {
    if cli.memory_store {
        tracing::warn!("using in-memory store, nothing will be persisted");
        return Ok(Store::new(Arc::new(MemoryStore::new())));
    }
    let mongo = MongoStore::connect(&settings.mongo_uri, &settings.database_name)
        .await
        .context("connect to MongoDB")?;
    Ok(Store::new(Arc::new(mongo)))
}

async fn init(cli: &Cli, settings: &Settings) -> Result<()> {
    if config::write_keys_template(&cli.keys)? {
        tracing::info!(path = %cli.keys.display(), "wrote key file template, fill it in before starting");
    } else {
        tracing::info!(path = %cli.keys.display(), "key file already exists, left untouched");
    }
    let store = open_store(cli, settings).await?;
    store.ensure_collections().await?;
    tracing::info!("store collections ready");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    init_tracing(cli.debug, settings.log_json);

    if cli.init {
        return init(&cli, &settings).await;
    }

    let keys = config::load_keys(&cli.keys)?;
    let telegram = Arc::new(TelegramApi::new(&keys.telegram.api_key)?);
    let chat_id = keys.telegram.chat_id;

    let result = run(&cli, &settings, &keys, telegram.clone()).await;
    if let Err(e) = &result {
        tracing::error!(error = ?e, "adopt-detector stopped with an error");
        chat::send_notice(
            telegram.as_ref(),
            chat_id,
            &format!("Adopt detector stopped with an error:\n{e:#}"),
        )
        .await;
    }
    result
}

async fn run(cli: &Cli, settings: &Settings, keys: &Keys, telegram: Arc<TelegramApi>) -> Result<()> {
    let metrics = Metrics::init()?;
    let chat_id = keys.telegram.chat_id;
    let chat_api: Arc<dyn chat::ChatApi> = telegram.clone();

    let store = open_store(cli, settings).await?;
    store.ensure_collections().await?;
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    // Access token: the first grant must succeed.
    let auth = Arc::new(DeviantArtAuth::new(
        DEFAULT_BASE_URL,
        &keys.deviantart.client_id,
        &keys.deviantart.client_secret,
    )?);
    let creds = Arc::new(CredentialManager::new(auth));
    creds
        .refresh()
        .await
        .context("initial DeviantArt token")?;
    let refresher = spawn_refresh_loop(
        creds.clone(),
        RefreshCfg {
            every: settings.token_refresh,
            ..RefreshCfg::default()
        },
        shutdown_rx.clone(),
    );

    // Follows
    let source: Arc<dyn FeedSource> = Arc::new(DeviantArtClient::new(DEFAULT_BASE_URL, creds)?);
    let feeds = store.load_feeds(Site::DeviantArt).await?;
    tracing::info!(site = %Site::DeviantArt, feeds = feeds.len(), "loaded follows");
    let registry = Arc::new(FeedRegistry::new(feeds));
    let mut sites = SiteTable::new();
    sites.insert(source.clone(), registry.clone());

    // Pipeline
    let q = pipeline::queues(settings.queue_capacity);
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(&settings.classifier_url)?);
    let writer = spawn_writer(store.clone(), q.write_rx, q.notify_tx);
    let notifier = spawn_notifier(
        Notifier::new(
            classifier.clone(),
            chat_api.clone(),
            chat_id,
            NotifyPolicy::from_threshold(settings.notify_threshold),
        ),
        q.notify_rx,
    );

    let poller = Arc::new(Poller::new(
        source,
        registry,
        store.clone(),
        q.write_tx.clone(),
        PollerCfg {
            interval: settings.poll_interval,
            max_pages: settings.max_pages,
            retry: RetryPolicy::default(),
        },
    ));
    let pollers = spawn_poller_workers(
        poller,
        SchedulerCfg {
            workers: settings.poll_workers,
        },
        shutdown_rx.clone(),
    );

    // Control plane
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let stream = spawn_update_stream(telegram, updates_tx, shutdown_rx.clone());
    let dispatcher = Dispatcher::new(
        chat_api.clone(),
        chat_id,
        store,
        classifier,
        sites.clone(),
        q.write_tx,
        settings.lookback_secs,
    );
    let dispatch = tokio::spawn(dispatcher.run(updates_rx));

    let status_state = StatusState {
        sites,
        metrics: Some(metrics.handle.clone()),
    };
    let addr = settings.status_addr;
    let status_rx = shutdown_rx.clone();
    let status = tokio::spawn(async move {
        if let Err(e) = status::serve(addr, status_state, status_rx).await {
            tracing::error!(target: "status", error = ?e, "status server failed");
        }
    });

    chat::send_notice(chat_api.as_ref(), chat_id, "Adopt detector started.").await;
    tracing::info!(poll_interval_secs = settings.poll_interval.as_secs(), workers = settings.poll_workers, "adopt-detector running");

    shutdown::termination_signal().await?;
    tracing::info!("shutdown requested, draining");
    let _ = shutdown_tx.send(true);

    // Inbound first, then producers, then the pipeline stages in order.
    let _ = stream.await;
    let _ = dispatch.await;
    let mut pollers = pollers;
    if tokio::time::timeout(POLLER_GRACE, &mut pollers).await.is_err() {
        tracing::warn!("pollers still busy after grace period, aborting them");
        pollers.abort();
        let _ = pollers.await;
    }
    let _ = writer.await;
    let _ = notifier.await;
    let _ = refresher.await;
    let _ = status.await;

    chat::send_notice(chat_api.as_ref(), chat_id, "Adopt detector stopped.").await;
    tracing::info!("shutdown complete");
    Ok(())
}
