use puls_oauth::{Server, config::ServerConfig, init_tracing, sentry_init_once};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = ServerConfig::from_env()?;

    sentry_init_once(config.sentry_dsn.as_deref());
    init_tracing();

    Server::run(config).await
}
