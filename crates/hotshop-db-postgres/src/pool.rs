//! Connection pool for the system of record.

use std::str::FromStr;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgConnectOptions, PgPool, Postgres};
use tracing::info;

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

pub type PgPoolOptions = PoolOptions<Postgres>;

/// Reported to the server in `pg_stat_activity`.
const APPLICATION_NAME: &str = "hotshop";

fn connect_options(config: &PostgresConfig) -> Result<PgConnectOptions> {
    let mut options = PgConnectOptions::from_str(&config.url)?.application_name(APPLICATION_NAME);
    if let Some(timeout_ms) = config.statement_timeout_ms {
        options = options.options([("statement_timeout", timeout_ms.to_string())]);
    }
    Ok(options)
}

/// Opens the pool and checks that the server answers.
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be greater than 0"));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(config.effective_min_connections())
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
        .connect_with(connect_options(config)?)
        .await?;

    sqlx_core::query::query("SELECT 1").execute(&pool).await?;
    info!(
        url = %redact_url(&config.url),
        max_connections = config.pool_size,
        min_connections = config.effective_min_connections(),
        "connected to PostgreSQL"
    );
    Ok(pool)
}

/// Replaces the password of a connection URL for logging.
pub(crate) fn redact_url(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) if !scheme.is_empty() => format!("{scheme}://{user}:****@{host}"),
        Some((user, _)) => format!("{user}:****@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://shop:secret@db:5432/hotshop"),
            "postgres://shop:****@db:5432/hotshop"
        );
        assert_eq!(redact_url("postgres://db/hotshop"), "postgres://db/hotshop");
        assert_eq!(
            redact_url("postgres://shop@db/hotshop"),
            "postgres://shop@db/hotshop"
        );
    }

    #[test]
    fn test_connect_options_reject_bad_url() {
        assert!(connect_options(&PostgresConfig::new("not a url")).is_err());
        assert!(
            connect_options(
                &PostgresConfig::new("postgres://shop:pw@db/hotshop")
                    .with_statement_timeout(std::time::Duration::from_secs(2))
            )
            .is_ok()
        );
    }
}
