use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomkeep::auth::TokenAuth;
use roomkeep::cascade::CascadeConsumer;
use roomkeep::channel::{EventChannel, InMemoryChannel};
use roomkeep::compactor::run_compactor;
use roomkeep::config::{ChannelKind, Config};
use roomkeep::engine::Engine;
use roomkeep::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use roomkeep::publisher::LifecyclePublisher;
use roomkeep::rooms::{RoomService, RoomStore};
use roomkeep::service::ReservationService;
use roomkeep::wire::{self, App};

const COMPACT_EVERY: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn build_channel(config: &Config) -> Result<Arc<dyn EventChannel>, Box<dyn Error>> {
    match config.channel {
        ChannelKind::Memory => Ok(Arc::new(InMemoryChannel::default())),
        #[cfg(feature = "kafka")]
        ChannelKind::Kafka => Ok(Arc::new(roomkeep::channel::KafkaChannel::new(
            &config.brokers,
            config.retry.connect_timeout,
        )?)),
        #[cfg(not(feature = "kafka"))]
        ChannelKind::Kafka => Err("ROOMKEEP_CHANNEL=kafka needs a build with the `kafka` feature".into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    roomkeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    // One channel client for the whole process, shared by publisher and consumer.
    let channel = build_channel(&config)?;
    if config.channel == ChannelKind::Memory && !config.role.runs_reservations() {
        tracing::warn!("in-memory channel with role {:?}: lifecycle events stay in this process", config.role);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_task = None;

    let rooms = if config.role.runs_rooms() {
        let store = Arc::new(RoomStore::new(config.rooms_wal())?);
        info!("  rooms: {} loaded", store.len().await);
        tokio::spawn(run_compactor(store.clone(), config.compact_threshold, COMPACT_EVERY));
        let publisher = LifecyclePublisher::new(channel.clone(), config.topic.clone());
        Some(RoomService::new(store, publisher))
    } else {
        None
    };

    let reservations = if config.role.runs_reservations() {
        let engine = Arc::new(Engine::new(config.reservations_wal())?);
        info!("  reservations: {} loaded", engine.reservation_count());
        tokio::spawn(run_compactor(engine.clone(), config.compact_threshold, COMPACT_EVERY));
        let consumer = CascadeConsumer::new(
            channel.clone(),
            engine.clone(),
            config.topic.clone(),
            config.group.clone(),
            config.retry.clone(),
        );
        consumer_task = Some(tokio::spawn(consumer.run(shutdown_rx.clone())));
        Some(ReservationService::new(engine))
    } else {
        None
    };

    let app = Arc::new(App {
        auth: TokenAuth::new(config.token.clone()),
        rooms,
        reservations,
    });
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("roomkeep listening on {addr}");
    info!("  role: {:?}", config.role);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  channel: {:?} topic={} group={}", config.channel, config.topic, config.group);
    info!("  max_connections: {max_connections}");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let app = app.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, app).await {
                        tracing::warn!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // The consumer stops between messages; an uncommitted delivery is redelivered next start.
    shutdown_tx.send_replace(true);

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    if let Some(task) = consumer_task {
        match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
            Ok(Ok(())) => info!("cascade consumer stopped"),
            Ok(Err(e)) => tracing::error!("cascade consumer panicked: {e}"),
            Err(_) => tracing::warn!("cascade consumer did not stop in time"),
        }
    }
    channel.shutdown().await;

    info!("roomkeep stopped");
    Ok(())
}
