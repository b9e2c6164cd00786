use evictguard::config::Config;
use evictguard::monitor::{start_node_watch, InterceptionOverride, NodeHealthTracker, SystemClock};
use evictguard::server::{
    build_rustls_config, create_metrics, initialize_tls, load_from_dir, run_server,
    run_server_tls, shutdown_channel, wait_for_signal, AppState, KubeEventAuditSink,
    ReadinessState, ServingCertificate, DEFAULT_TLS_SECRET_NAME,
};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where the HTTPS serving certificate comes from
#[derive(Debug, Clone, PartialEq)]
enum ServeMode {
    /// Generate our own CA and publish it to the webhook configuration
    SelfSigned,
    /// Read `tls.crt` / `tls.key` from a mounted directory
    CertDir(PathBuf),
    /// Plain HTTP (local development)
    Plain,
}

fn serve_mode(config: &Config) -> ServeMode {
    if config.self_signed_tls {
        ServeMode::SelfSigned
    } else if let Some(dir) = &config.cert_dir {
        ServeMode::CertDir(dir.clone())
    } else {
        ServeMode::Plain
    }
}

/// `--local` runs against the local kubeconfig over plain HTTP
fn is_local_mode<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().any(|a| a.as_ref() == "--local")
}

async fn serving_certificate(
    mode: &ServeMode,
    client: &Client,
    config: &Config,
) -> anyhow::Result<Option<ServingCertificate>> {
    match mode {
        ServeMode::SelfSigned => {
            info!(
                service = %config.service_name,
                namespace = %config.namespace,
                "Initializing self-managed webhook TLS certificates"
            );
            let serving = initialize_tls(
                client,
                &config.service_name,
                &config.namespace,
                DEFAULT_TLS_SECRET_NAME,
            )
            .await?;
            Ok(Some(serving))
        }
        ServeMode::CertDir(dir) => {
            info!(dir = %dir.display(), "Loading webhook TLS certificates");
            Ok(Some(load_from_dir(dir)?))
        }
        ServeMode::Plain => {
            info!("Webhook TLS disabled - running HTTP only");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let local = is_local_mode(std::env::args());
    let config = if local {
        Config::local()
    } else {
        Config::from_env()
    };

    info!(
        local = local,
        port = config.webhook_port,
        threshold = config.default_threshold,
        window_secs = config.default_window.as_secs(),
        intercept_on_start = config.intercept_on_start,
        "Starting eviction guard"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let policy = config.load_policy();

    let interception = Arc::new(InterceptionOverride::new(config.intercept_on_start));
    let tracker = Arc::new(NodeHealthTracker::new(
        policy,
        interception.clone(),
        Arc::new(SystemClock),
        Some(metrics.clone()),
    ));

    // Decisions are only trustworthy once the initial node list is in
    let watch_handle = match start_node_watch(
        client.clone(),
        tracker.clone(),
        shutdown_signal.clone(),
        config.cache_sync_timeout,
    )
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Node watch failed to start");
            return Err(e.into());
        }
    };

    let mode = serve_mode(&config);
    let tls_config = match serving_certificate(&mode, &client, &config).await? {
        Some(serving) => Some(build_rustls_config(&serving)?),
        None => None,
    };

    let state = AppState {
        readiness: readiness.clone(),
        metrics,
        tracker,
        interception,
        audit: Arc::new(KubeEventAuditSink::new(client)),
    };

    let port = config.webhook_port;
    let server_signal = shutdown_signal.clone();
    let server_handle = tokio::spawn(async move {
        let result = match tls_config {
            Some(tls) => run_server_tls(port, state, tls, server_signal).await,
            None => run_server(port, state, server_signal).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Webhook server failed");
        }
    });

    readiness.set_ready();
    info!(port = port, mode = ?mode, "Eviction guard ready");

    let signal = wait_for_signal().await;
    info!(signal = signal, "Initiating graceful shutdown");
    readiness.set_not_ready();
    shutdown_controller.shutdown();

    info!("Stopping components...");
    if let Err(e) = server_handle.await {
        warn!(error = %e, "Webhook server task panicked");
    }
    if let Err(e) = watch_handle.await {
        warn!(error = %e, "Node watch task panicked");
    }

    info!("Eviction guard shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
