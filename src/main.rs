use anyhow::Result;
use std::path::PathBuf;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ingress_proxy_agent::{
    config::Config,
    k8s::AuthenticationResolver,
    Daemon, ExitPolicy, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first so the log format can be chosen
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let span = tracing::info_span!("agent", version = VERSION);
    serve(config).instrument(span).await
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        namespace = %config.namespace,
        ingress_class = %config.ingress_class,
        poll_interval = ?config.poll_interval(),
        "Starting ingress proxy agent"
    );

    let resolver = AuthenticationResolver::from_environment(
        config.kubeconfig.as_ref().map(PathBuf::from),
        config.api_timeout(),
    );
    let daemon = Daemon::new(&config, resolver, ExitPolicy::Exit);

    tokio::select! {
        result = daemon.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unable to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
