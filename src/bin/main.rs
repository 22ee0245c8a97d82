use livegate::chain::{
    CacheBackend, CredentialIssuer, LedgerClient, LedgerEventDispatcher, MemoryBackend,
    RedisBackend, SignatureAuthenticator, StateCache, StorageKeys, SubstrateNode,
};
use livegate::clock::{Clock, SystemClock};
use livegate::media::LiveKitProvider;
use livegate::realtime::server::load_tls_acceptor;
use livegate::realtime::{serve, Gateway, RealtimeHub};
use livegate::Settings;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DISPATCHER_RETRY_INTERVAL: Duration = Duration::from_secs(5);

struct App {
    settings: Settings,
    cache: Arc<StateCache>,
    ledger: Arc<LedgerClient>,
    hub: Arc<RealtimeHub>,
    dispatcher: Arc<LedgerEventDispatcher>,
    gateway: Arc<Gateway>,
}

impl App {
    fn build(settings: Settings) -> Result<Self, Box<dyn std::error::Error>> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let backend: Arc<dyn CacheBackend> = if settings.redis_url.is_empty() {
            info!("REDIS_URL is empty, using in-process cache");
            Arc::new(MemoryBackend::new())
        } else {
            Arc::new(RedisBackend::new(&settings.redis_url)?)
        };
        let cache = Arc::new(StateCache::new(
            backend,
            settings.cache_prefix.clone(),
            clock.clone(),
        ));

        let ledger = Arc::new(LedgerClient::new(
            Arc::new(SubstrateNode::new(settings.chain_ws_url.clone())),
            cache.clone(),
            StorageKeys::new(settings.chain_pallet.clone()),
            settings.chain_query_timeout,
        ));

        let hub = Arc::new(RealtimeHub::new());
        let dispatcher = Arc::new(LedgerEventDispatcher::new(
            ledger.clone(),
            cache.clone(),
            hub.clone(),
        ));

        let authenticator = Arc::new(SignatureAuthenticator::new(
            settings.signature_max_age_ms,
            clock.clone(),
        ));
        let provider = Arc::new(LiveKitProvider::new(
            settings.livekit_url.clone(),
            settings.livekit_api_key.clone(),
            settings.livekit_api_secret.clone(),
            settings.credential_ttl,
            clock,
        )?);
        let issuer = Arc::new(CredentialIssuer::new(
            authenticator.clone(),
            ledger.clone(),
            cache.clone(),
            provider,
        ));

        let gateway = Arc::new(Gateway::new(
            hub.clone(),
            ledger.clone(),
            cache.clone(),
            authenticator,
            issuer,
        ));

        Ok(App {
            settings,
            cache,
            ledger,
            hub,
            dispatcher,
            gateway,
        })
    }

    fn spawn_cache_health(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let interval = self.settings.cache_health_interval;
        tokio::spawn(async move {
            loop {
                cache.ping().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    /// Keep the dispatcher listening, restarting it after the ledger drops.
    fn spawn_dispatcher_supervisor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = dispatcher.start_listening().await {
                    error!(
                        "Event listener not started: {}. Retrying in {:?}...",
                        e, DISPATCHER_RETRY_INTERVAL
                    );
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DISPATCHER_RETRY_INTERVAL) => {}
                }
            }
        })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let settings = Settings::from_env()?;
    info!("Starting with {:?}", settings);

    let tls_acceptor = match (&settings.tls_cert_path, &settings.tls_key_path) {
        (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
        _ => None,
    };

    let app = App::build(settings)?;

    if !app.cache.ping().await {
        warn!("Cache backend unreachable at startup, running in bypass mode");
    }
    if let Err(e) = app.ledger.connect().await {
        warn!("Ledger unreachable at startup: {}", e);
    }

    let background = CancellationToken::new();
    let health_task = app.spawn_cache_health(background.clone());
    let supervisor_task = app.spawn_dispatcher_supervisor(background.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", app.settings.port)).await?;
    info!("Listening on: 0.0.0.0:{}", app.settings.port);

    let stop_accepting = CancellationToken::new();
    let server_task = tokio::spawn(serve(
        listener,
        tls_acceptor,
        app.gateway.clone(),
        stop_accepting.clone(),
    ));

    shutdown_signal().await;

    background.cancel();
    for task in [supervisor_task, health_task] {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    app.dispatcher.stop_listening().await;
    app.hub.close_all().await;
    app.ledger.mark_disconnected().await;

    stop_accepting.cancel();
    if let Err(e) = server_task.await {
        warn!("Listener task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
