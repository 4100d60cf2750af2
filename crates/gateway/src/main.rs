use anyhow::Context;
use switchboard_gateway::{config::LogFormat, serve, Gateway, GatewayConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();
    init_tracing(&config);

    let gateway = Gateway::new(&config).context("failed to initialize gateway")?;

    let public_listener = TcpListener::bind(config.public_addr)
        .await
        .with_context(|| format!("failed to bind public listener on {}", config.public_addr))?;
    let internal_listener = TcpListener::bind(config.internal_addr)
        .await
        .with_context(|| format!("failed to bind internal listener on {}", config.internal_addr))?;

    info!(
        public_addr = %config.public_addr,
        internal_addr = %config.internal_addr,
        processor_url = %config.processor_url,
        "starting gateway"
    );

    serve(public_listener, internal_listener, gateway, shutdown_signal()).await
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
