pub mod identity_errors;
pub mod login_providers;
pub mod registration_tokens;
pub mod remember_tokens;
pub mod sessions;
pub mod users;

use sqlx::{PgPool, migrate::MigrateError, postgres::PgPoolOptions};

pub(crate) async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub(crate) async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}
