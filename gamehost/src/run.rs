use std::{sync::Arc, time::Duration};

use anyhow::Context;
use pobox_core::{
    server, ControlState, DeliveryHook, ExpectedInvoices, GameSinks,
    Poller, PollerConfig, SessionRouter,
};
use pobox_s3::{Bucket, BucketConfig};
use pobox_store::InvoiceStore;
use pobox_tokio::{task, NamedTask, ShutdownSignal};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cli::Config;

/// Tasks get this long to wind down after the shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("gamehost starting");
    let shutdown = ShutdownSignal::new();

    // Storage first: an uncreatable invoice dir is always fatal.
    let store = Arc::new(
        InvoiceStore::open(config.invoice_dir.clone())
            .context("invoice store init failed")?,
    );
    let registry = Arc::new(ExpectedInvoices::new());
    let router = Arc::new(SessionRouter::new());
    let sinks = Arc::new(
        GameSinks::new(config.sink_url.clone(), config.http_timeout)
            .context("sink client init failed")?,
    );

    // One object-store connection attempt at startup. Unreachable is
    // fatal when the retry budget is finite; with `unlimited` the process
    // still serves sessions, it just cannot poll.
    let bucket = match Bucket::connect(BucketConfig {
        bucket: config.bucket.clone(),
        endpoint: config.s3_endpoint.clone(),
        operation_timeout: config.http_timeout,
    })
    .await
    {
        Ok(bucket) => Some(Arc::new(bucket)),
        Err(err) if config.max_retries.is_finite() => {
            return Err(anyhow::Error::new(err)
                .context("object store unreachable at startup"));
        }
        Err(err) => {
            error!("object store unreachable, polling disabled: {err}");
            None
        }
    };

    let mut tasks = Vec::new();

    if let Some(bucket) = bucket {
        let poller = Poller::new(
            bucket,
            store.clone(),
            registry.clone(),
            router.clone() as Arc<dyn DeliveryHook>,
            PollerConfig {
                poll_interval: config.poll_interval,
                max_retries: config.max_retries,
            },
        );
        tasks.push(poller.spawn(shutdown.clone()));
    }

    let state = Arc::new(ControlState {
        router,
        registry,
        store,
        sinks,
        shutdown: shutdown.clone(),
    });
    let listener = TcpListener::bind(("0.0.0.0", config.ws_port))
        .await
        .with_context(|| {
            format!("could not bind ws port {}", config.ws_port)
        })?;
    tasks.push(server::spawn_server(listener, state));

    tasks.push(spawn_signal_listener(shutdown.clone()));

    task::join_all_with_shutdown(tasks, shutdown, SHUTDOWN_TIMEOUT)
        .await
        .context("task join failed")?;
    info!("gamehost stopped cleanly");
    Ok(())
}

/// Translate SIGINT / SIGTERM into the shutdown signal.
fn spawn_signal_listener(shutdown: ShutdownSignal) -> NamedTask<()> {
    NamedTask::spawn("signal listener", async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(err) => {
                    error!("cannot install SIGTERM handler: {err}");
                    shutdown.recv().await;
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = terminate.recv() => info!("terminate received"),
                () = shutdown.recv() => return,
            }
        }
        #[cfg(not(unix))]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
            () = shutdown.recv() => return,
        }
        shutdown.send();
    })
}
