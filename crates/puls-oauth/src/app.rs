use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing::instrument;

use crate::{
    AppState,
    auth::PulsOAuthClient,
    config::ServerConfig,
    db, routes,
    store::{IdentityStore, MemoryStore, PgStore, SessionStore},
};

pub struct Server;

impl Server {
    #[instrument(
        name = "puls_oauth_server",
        skip(config),
        fields(listen_addr = %config.listen_addr)
    )]
    pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
        let (identities, sessions): (Arc<dyn IdentityStore>, Arc<dyn SessionStore>) =
            match config.database_url.as_deref() {
                Some(database_url) => {
                    let pool = db::create_pool(database_url)
                        .await
                        .context("failed to create postgres pool")?;

                    db::migrate(&pool)
                        .await
                        .context("failed to run database migrations")?;

                    let store = Arc::new(PgStore::new(pool));
                    (store.clone(), store)
                }
                None => {
                    tracing::warn!(
                        "SERVER_DATABASE_URL is not set; accounts and sessions are kept in memory and lost on restart"
                    );
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            };

        let auth_config = config.auth.clone();
        tracing::info!(
            providers = ?auth_config.enabled_providers(),
            locale = %auth_config.locale(),
            "social login config loaded"
        );

        let client = PulsOAuthClient::new(
            auth_config.aggregator().clone(),
            auth_config.http_timeout(),
        )
        .context("failed to create aggregator client")?;

        let state = AppState::new(
            auth_config,
            &config.public_base_url,
            Arc::new(client),
            identities,
            sessions,
        );

        let router = routes::router(state);
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        tracing::info!(%addr, "social login server listening");

        axum::serve(tcp_listener, router.into_make_service())
            .await
            .context("social login server failure")?;

        Ok(())
    }
}
