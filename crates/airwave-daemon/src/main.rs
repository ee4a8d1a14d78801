use std::sync::Arc;

use airwave_daemon::catalog::CatalogBuilder;
use airwave_daemon::core::{self, DaemonCore, DaemonEvent};
use airwave_daemon::engine::{EngineSettings, MediaSignal, PlaybackEngine};
use airwave_daemon::fetch::{Fetcher, MirrorPool};
use airwave_daemon::metadata::{MetadataAggregator, MetadataPoller, TrackUpdate};
use airwave_daemon::mpv::MpvBackend;
use airwave_daemon::schedule::ScheduleResolver;
use airwave_daemon::{http, proxy, socket, BroadcastLayer, BroadcastMessage};
use airwave_proto::config::Config;
use airwave_proto::platform;
use airwave_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("airwave.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,airwave_daemon=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let fetcher = Fetcher::new(&config.network)?;

    let catalog = Arc::new(CatalogBuilder::new(&config.catalog, fetcher.clone()));
    let stations = catalog.build().await;
    if stations.is_empty() {
        warn!("No stations available; every catalog provider failed");
    }
    let state_manager = Arc::new(StateManager::new(
        stations,
        config.playback.default_volume,
    ));

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);

    let schedule = ScheduleResolver::from_zone_name(&config.metadata.timezone);
    let aggregator = Arc::new(MetadataAggregator::new(
        &config.metadata,
        fetcher.clone(),
        MirrorPool::new(config.catalog.mirrors.clone()),
        catalog.aliases().clone(),
        schedule,
    ));
    let (track_tx, track_rx) = mpsc::channel::<TrackUpdate>(16);
    let poller = MetadataPoller::new(aggregator, config.metadata.poll_interval(), track_tx);
    core::forward(track_rx, event_tx.clone(), DaemonEvent::TrackUpdated);

    let (signal_tx, signal_rx) = mpsc::channel::<MediaSignal>(64);
    core::forward(signal_rx, event_tx.clone(), DaemonEvent::Media);
    let backend = MpvBackend::new(signal_tx, config.playback.default_volume);

    let proxy_base = proxy::proxy_base(&config.http.bind_address, config.proxy.port);
    let preset = config.playback.eq_preset;
    let engine = PlaybackEngine::new(
        backend,
        EngineSettings::from_config(&config.playback, proxy_base),
        broadcast_tx.clone(),
        config.playback.default_volume,
        preset.gains(config.playback.custom_eq),
    );

    // Stream proxy: the media backend is always pointed here
    let _proxy_handle = proxy::start_server(
        config.http.bind_address.clone(),
        config.proxy.port,
        proxy::ProxyState::new(
            state_manager.clone(),
            fetcher,
            config.playback.connect_timeout(),
        ),
    );

    let listener = socket::bind(&config.http.bind_address, platform::DAEMON_TCP_PORT).await?;
    let _socket_handle = socket::start_server(
        listener,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
        }
    });

    let daemon_core = DaemonCore::new(
        config,
        state_manager,
        engine,
        poller,
        catalog,
        event_tx,
        broadcast_tx,
    );

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
