use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::{anyhow, Context};
use fcm_push::FcmClient;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use market_stream_service::{
    auth::TokenDecoder,
    bus::{EventBus, RedisBus},
    cache::{MarketCache, RedisEventCache},
    config::FcmConfig,
    events::EventKind,
    logging::init_tracing,
    metrics::MetricsMiddleware,
    redis_client::RedisClient,
    routes,
    services::{
        ConsumerError, DisabledPushSink, EventRouter, IngestionConsumer, KafkaLog,
        NotificationDispatcher, PushSink,
    },
    websocket::{run_price_relay, ConnectionRegistry},
    AppError, AppState, Config,
};

/// Grace period for in-flight requests and sockets on shutdown (seconds)
const SHUTDOWN_TIMEOUT: u64 = 5;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        ops_port = config.server.ops_port,
        push_enabled = config.fcm.enabled(),
        "Starting market-stream-service"
    );

    let redis = RedisClient::from_url(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    redis.ping().await.context("Redis ping failed")?;
    info!("Redis connection established");

    let cache = MarketCache::new(Arc::new(RedisEventCache::new(redis.manager())));
    let bus: Arc<dyn EventBus> = Arc::new(RedisBus::new(redis.client().clone(), redis.manager()));
    let dispatcher = NotificationDispatcher::new(push_sink(&config.fcm));
    let decoder = Arc::new(TokenDecoder::from_config(&config.auth));
    let registry = ConnectionRegistry::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut arbitrage_task = spawn_consumer(
        KafkaLog::new(
            &config.kafka.brokers,
            &config.kafka.alerts_topic,
            &config.kafka.alerts_group,
        ),
        EventRouter::new(
            EventKind::Arbitrage,
            cache.clone(),
            bus.clone(),
            dispatcher.clone(),
        ),
        shutdown_rx.clone(),
    )
    .await?;

    let mut lines_task = spawn_consumer(
        KafkaLog::new(
            &config.kafka.brokers,
            &config.kafka.lines_topic,
            &config.kafka.lines_group,
        ),
        EventRouter::new(
            EventKind::PriceMovement,
            cache.clone(),
            bus.clone(),
            dispatcher,
        ),
        shutdown_rx.clone(),
    )
    .await?;

    let mut relay_task = tokio::spawn({
        let bus = bus.clone();
        let registry = registry.clone();
        let shutdown = shutdown_rx.clone();
        async move { run_price_relay(bus.as_ref(), registry, shutdown).await }
    });

    let state = AppState {
        registry,
        cache,
        bus,
        decoder,
        config: config.clone(),
    };

    let public_state = state.clone();
    let public_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(MetricsMiddleware)
            .configure(routes::configure_public)
    })
    .bind((config.server.host.as_str(), config.server.port))
    .map_err(|e| AppError::StartServer(e.to_string()))?
    .shutdown_timeout(SHUTDOWN_TIMEOUT)
    .disable_signals()
    .run();

    let ops_state = state;
    let ops_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ops_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::configure_ops)
    })
    .bind((config.server.host.as_str(), config.server.ops_port))
    .map_err(|e| AppError::StartServer(e.to_string()))?
    .workers(1)
    .shutdown_timeout(SHUTDOWN_TIMEOUT)
    .disable_signals()
    .run();

    let public_handle = public_server.handle();
    let ops_handle = ops_server.handle();
    let mut public_task = tokio::spawn(public_server);
    let mut ops_task = tokio::spawn(ops_server);

    info!(
        "HTTP servers listening on {}:{} (public) and {}:{} (ops)",
        config.server.host, config.server.port, config.server.host, config.server.ops_port
    );

    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            None
        }
        exit = &mut arbitrage_task => Some(component_failure("arbitrage consumer", exit)),
        exit = &mut lines_task => Some(component_failure("line-movement consumer", exit)),
        exit = &mut relay_task => Some(component_failure("price relay", exit)),
        exit = &mut public_task => Some(component_failure("public HTTP server", exit)),
        exit = &mut ops_task => Some(component_failure("ops HTTP server", exit)),
    };

    let _ = shutdown_tx.send(true);
    public_handle.stop(true).await;
    ops_handle.stop(true).await;

    if let Some(err) = failure {
        error!(error = %err, "Fatal component failure, exiting");
        return Err(err);
    }

    // Consumers finish their in-flight record before detaching
    let consumers = [
        ("arbitrage consumer", arbitrage_task),
        ("line-movement consumer", lines_task),
    ];
    for (name, task) in consumers {
        match task.await {
            Ok(Ok(())) => info!(component = name, "Stopped"),
            Ok(Err(e)) => warn!(component = name, error = %e, "Stopped with error"),
            Err(e) => warn!(component = name, error = %e, "Task aborted"),
        }
    }
    let _ = relay_task.await;

    info!("market-stream-service stopped");
    Ok(())
}

async fn spawn_consumer(
    log: KafkaLog,
    router: EventRouter,
    shutdown: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<Result<(), ConsumerError>>, AppError> {
    let mut consumer = IngestionConsumer::new(log, router);
    consumer
        .start()
        .await
        .map_err(|e| AppError::Kafka(e.to_string()))?;

    Ok(tokio::spawn(async move {
        let result = consumer.run(shutdown).await;
        consumer.stop().await;
        result
    }))
}

fn push_sink(config: &FcmConfig) -> Arc<dyn PushSink> {
    let Some(path) = config.credentials_path.as_deref() else {
        info!("FCM not configured, push notifications disabled");
        return Arc::new(DisabledPushSink);
    };

    match FcmClient::from_service_account_file(path, config.project_id.clone()) {
        Ok(client) => {
            info!(project_id = client.project_id(), "FCM push notifications enabled");
            Arc::new(client)
        }
        Err(e) => {
            warn!(error = %e, "FCM credentials unusable, push notifications disabled");
            Arc::new(DisabledPushSink)
        }
    }
}

/// A long-running component returned; any return is fatal.
fn component_failure<E: std::fmt::Display>(
    name: &str,
    exit: Result<Result<(), E>, JoinError>,
) -> anyhow::Error {
    match exit {
        Ok(Ok(())) => anyhow!("{} stopped unexpectedly", name),
        Ok(Err(e)) => anyhow!("{} failed: {}", name, e),
        Err(e) => anyhow!("{} task panicked: {}", name, e),
    }
}
