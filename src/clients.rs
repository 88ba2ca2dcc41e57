use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use sqlx::{Executor, PgPool, postgres::PgPoolOptions};

use crate::config::Config;
use crate::messaging::Transports;

const SCHEMA: &str = include_str!("../schema.sql");

/// Creates and returns a new database connection pool.
pub async fn setup_db_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(config.database_url())
        .await
}

/// Creates the tables if they do not exist yet.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    pool.execute(SCHEMA).await?;
    Ok(())
}

/// Creates the pooled HTTP client used by the notifiers.
pub fn setup_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(15))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .tcp_keepalive(Duration::from_secs(180))
        .build()
}

/// Creates and returns new AWS SQS and SNS clients.
pub async fn setup_aws_clients(region: &str) -> (SqsClient, SnsClient) {
    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    (SqsClient::new(&aws_config), SnsClient::new(&aws_config))
}

/// Builds every delivery transport the configuration needs. AWS clients
/// are only created when a region is configured.
pub async fn setup_transports(config: &Config) -> Result<Transports, reqwest::Error> {
    let http = setup_http_client()?;
    let (sqs, sns) = match config.aws_region.as_deref() {
        Some(region) => {
            let (sqs, sns) = setup_aws_clients(region).await;
            (Some(sqs), Some(sns))
        }
        None => (None, None),
    };

    Ok(Transports { http, sqs, sns })
}
