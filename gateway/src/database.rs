use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the Postgres pool from the configured DSN. Pool construction
/// validates the DSN without dialing; connections are established on
/// first acquire. The pool is closed by the orchestrator at shutdown.
pub fn open_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(&config.database_url)
}
