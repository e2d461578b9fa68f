// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logd::{
    buffer::LogBuffer,
    config::ServerConfig,
    flusher::{Flusher, FlusherConfig},
    server::LogdServer,
    stats::{StatsHandle, StatsService},
    store::{Backend, LogStore, MemoryBackend, SledBackend},
};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
pub async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading logd configuration: {e}");
            return;
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    match config.store_path.clone() {
        Some(path) => match SledBackend::open(&path) {
            Ok(backend) => {
                info!("Storing logs in {}", path.display());
                run(config, backend).await;
            }
            Err(e) => error!("Error opening log store at {}: {e}", path.display()),
        },
        None => {
            info!("LOGD_STORE_PATH not set, logs are kept in memory only");
            run(config, MemoryBackend::new()).await;
        }
    }
}

async fn run<B: Backend + 'static>(config: ServerConfig, backend: B) {
    let store = Arc::new(LogStore::new(backend, config.prefix.clone()));
    let buffer = Arc::new(LogBuffer::new());

    let (service, stats_handle) = StatsService::new();
    tokio::spawn(service.run());

    let cancel_token = CancellationToken::new();
    let server = match LogdServer::new(
        &config,
        Arc::clone(&buffer),
        stats_handle.clone(),
        cancel_token.clone(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            error!("Error binding logd to {}: {e}", config.bind_address());
            return;
        }
    };
    let received = server.received();
    info!("logd-udp: starting to listen on {}", config.bind_address());
    tokio::spawn(server.spin());

    let flusher = Flusher::new(FlusherConfig {
        buffer,
        store: Arc::clone(&store),
    });

    let mut flush_interval = interval(config.flush_interval);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    flush_interval.tick().await; // discard first tick, which is instantaneous

    let mut stats_interval = interval(STATS_INTERVAL);
    stats_interval.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_received = 0;
    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                flusher.flush().await;
                let count = received.load(Ordering::Relaxed);
                if count != last_received {
                    info!("Received {} messages", count);
                    last_received = count;
                }
            }
            _ = stats_interval.tick() => log_stats(&stats_handle).await,
            _ = &mut shutdown => {
                info!("Shutting down logd");
                break;
            }
        }
    }

    cancel_token.cancel();
    let stored = flusher.flush().await;
    debug!("Stored {} log lines on shutdown", stored);
    let flushed = tokio::task::spawn_blocking(move || store.flush()).await;
    match flushed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Error flushing log store: {e}"),
        Err(e) => error!("Error flushing log store: {e}"),
    }
    if let Err(e) = stats_handle.shutdown() {
        error!("Error shutting down stats service: {e}");
    }
}

async fn log_stats(stats: &StatsHandle) {
    match stats.snapshot().await {
        Ok(snapshot) if !snapshot.is_empty() => {
            for (key, value) in &snapshot.counters {
                debug!("counter {} = {}", key, value);
            }
            for (key, samples) in &snapshot.timers {
                debug!("timer {} has {} samples", key, samples.len());
            }
        }
        Ok(_) => {}
        Err(e) => error!("Error reading stats: {e}"),
    }
}
