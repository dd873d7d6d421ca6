use chrono::Duration;
use relay_agent::{Agent, KubeClientProvider};
use relay_config::{AgentConfig, RelayConfig};
use relay_dispatcher::{Dispatcher, StatusWatcher, TriggerSubmission};
use relay_events::{EventBus, Topic};
use relay_events_memory::MemoryEventBus;
use relay_status::{BusStatusSink, MemoryStatusLog, StatusFilter, StatusReporter};
use relay_storage::KeyStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
    }
    Ok(())
}

/// Feed newline-delimited trigger submissions from stdin to the dispatcher.
async fn read_submissions(dispatcher: &Dispatcher) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let submission: TriggerSubmission = match serde_json::from_str(line) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable submission");
                continue;
            }
        };

        match dispatcher.submit(&submission).await {
            Ok(req) => println!(
                "{}",
                serde_json::json!({
                    "delivery_id": req.delivery_id,
                    "cluster": req.cluster,
                    "deadline": req.deadline,
                    "dispatched": true,
                })
            ),
            Err(e) if e.is_client_error() => {
                println!(
                    "{}",
                    serde_json::json!({
                        "delivery_id": submission.delivery_id,
                        "dispatched": false,
                        "error": e.to_string(),
                    })
                );
            }
            Err(e) => error!(delivery_id = %submission.delivery_id, error = %e, "dispatch failed"),
        }
    }
    Ok(())
}

fn resolve_agent_config(config: &RelayConfig, cluster: Option<String>) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    let mut agent = match (config.agent.clone(), cluster.as_deref()) {
        (Some(agent), _) => agent,
        (None, Some(cluster)) => AgentConfig::for_cluster(cluster),
        (None, None) => return Err("no cluster configured (use --cluster or run init-config)".into()),
    };
    if let Some(cluster) = cluster {
        agent.cluster = cluster;
    }
    Ok(agent)
}

pub async fn cmd_run(
    config: &RelayConfig,
    store: Arc<dyn KeyStore>,
    cluster: Option<String>,
    context: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let agent_config = resolve_agent_config(config, cluster)?;
    let bus = Arc::new(MemoryEventBus::new());

    let ttl = request_ttl(config.dispatcher.ttl_seconds)?;
    let dispatcher = Dispatcher::new(
        store.clone(),
        bus.clone(),
        Topic::new(config.dispatcher.topic.clone()),
        ttl,
    );

    // Subscribe before anything can publish so no early message is missed.
    let status_stream = bus
        .subscribe(&Topic::new(config.dispatcher.status_topic.clone()))
        .await?;
    let request_stream = bus.subscribe(&Topic::new(agent_config.topic.clone())).await?;

    let watcher = Arc::new(StatusWatcher::new(Arc::new(MemoryStatusLog::new())));
    let watcher_task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.consume(status_stream).await })
    };

    let sink = Arc::new(BusStatusSink::new(
        bus.clone(),
        Topic::new(agent_config.status_topic.clone()),
        agent_config.cluster.clone(),
    ));
    let (reporter, forwarder) = StatusReporter::spawn(sink, agent_config.status_queue_capacity);

    let kube_config = KubeClientProvider::load_config(context).await?;
    let clients = Arc::new(KubeClientProvider::new(
        kube_config,
        agent_config.field_manager.clone(),
        agent_config.impersonate_template.clone(),
    ));
    let agent = Arc::new(
        Agent::new(agent_config.cluster.clone(), store, clients, reporter)
            .with_max_in_flight(agent_config.max_in_flight),
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let agent_task = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(agent.serve(request_stream, async move {
            let _ = shutdown_rx.recv().await;
        }))
    };
    info!(cluster = %agent_config.cluster, "relay running, reading submissions from stdin");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        res = read_submissions(&dispatcher) => match res {
            Ok(()) => {
                info!("stdin closed, waiting for shutdown signal");
                (&mut shutdown).await
            }
            Err(e) => Err(e),
        },
        res = &mut shutdown => res,
    };

    // In-flight deployments finish and their statuses are flushed before exit.
    let _ = shutdown_tx.send(());
    if let Err(e) = agent_task.await {
        error!(error = %e, "agent task failed");
    }
    if let Err(e) = forwarder.await {
        error!(error = %e, "status forwarder failed");
    }
    watcher_task.abort();
    info!(
        statuses = watcher.log().count(&StatusFilter::new()).await,
        "relay stopped"
    );
    outcome?;
    Ok(())
}

fn request_ttl(seconds: u64) -> Result<Duration, Box<dyn std::error::Error>> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| format!("ttl of {seconds}s is out of range").into())
}
