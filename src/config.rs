use std::time::Duration;

use serde::Deserialize;

use crate::messaging::Endpoint;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub aws_region: Option<String>,
    pub sentry_dsn: Option<String>,

    #[serde(default)]
    pub outbox_enabled: bool,
    #[serde(default = "default_workers")]
    pub outbox_workers: usize,
    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: i64,
    #[serde(default = "default_wait_time")]
    pub outbox_wait_time_ms: u64,
    #[serde(default = "default_in_progress_ttl")]
    pub outbox_in_progress_ttl_ms: u64,
    pub outbox_book_send_url: Option<String>,
    pub outbox_author_send_url: Option<String>,
    #[serde(default)]
    pub outbox_abort_in_flight: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_http_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    4
}

fn default_batch_size() -> i64 {
    100
}

fn default_wait_time() -> u64 {
    1000 // Default to 1 second
}

fn default_in_progress_ttl() -> u64 {
    30_000
}

/// Worker pool parameters, already converted to runtime types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxSettings {
    pub enabled: bool,
    pub workers: usize,
    pub batch_size: i64,
    pub wait_time: Duration,
    pub in_progress_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds and validates the configuration from `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), envy::Error> {
        if self.database_url.is_none() {
            return Err(envy::Error::MissingValue("DATABASE_URL"));
        }

        if !self.outbox_enabled {
            return Ok(());
        }

        if self.outbox_workers == 0 {
            return Err(envy::Error::Custom("OUTBOX_WORKERS must be greater than zero".into()));
        }
        if self.outbox_batch_size <= 0 {
            return Err(envy::Error::Custom("OUTBOX_BATCH_SIZE must be greater than zero".into()));
        }

        let book = self.book_endpoint()?;
        let author = self.author_endpoint()?;
        if (book.needs_aws() || author.needs_aws()) && self.aws_region.is_none() {
            return Err(envy::Error::MissingValue("AWS_REGION"));
        }

        Ok(())
    }

    /// Returns the database URL.
    ///
    /// `load()` and `from_vars()` reject a configuration without one.
    pub fn database_url(&self) -> &str {
        self.database_url.as_deref().unwrap_or_default()
    }

    pub fn book_endpoint(&self) -> Result<Endpoint, envy::Error> {
        parse_endpoint(self.outbox_book_send_url.as_deref(), "OUTBOX_BOOK_SEND_URL")
    }

    pub fn author_endpoint(&self) -> Result<Endpoint, envy::Error> {
        parse_endpoint(self.outbox_author_send_url.as_deref(), "OUTBOX_AUTHOR_SEND_URL")
    }

    pub fn outbox_settings(&self) -> OutboxSettings {
        OutboxSettings {
            enabled: self.outbox_enabled,
            workers: self.outbox_workers,
            batch_size: self.outbox_batch_size,
            wait_time: Duration::from_millis(self.outbox_wait_time_ms),
            in_progress_ttl: Duration::from_millis(self.outbox_in_progress_ttl_ms),
        }
    }
}

fn parse_endpoint(address: Option<&str>, name: &'static str) -> Result<Endpoint, envy::Error> {
    let address = address
        .filter(|a| !a.trim().is_empty())
        .ok_or(envy::Error::MissingValue(name))?;

    address
        .parse()
        .map_err(|e| envy::Error::Custom(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_outbox_is_disabled() {
        let config = Config::from_vars(vars(&[("DATABASE_URL", "postgres://localhost/library")]))
            .unwrap();

        assert_eq!(config.database_url(), "postgres://localhost/library");
        assert_eq!(
            config.outbox_settings(),
            OutboxSettings {
                enabled: false,
                workers: 4,
                batch_size: 100,
                wait_time: Duration::from_secs(1),
                in_progress_ttl: Duration::from_secs(30),
            }
        );
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_vars(vars(&[("OUTBOX_ENABLED", "false")])).unwrap_err();
        assert!(matches!(err, envy::Error::MissingValue("DATABASE_URL")));
    }

    #[test]
    fn enabled_outbox_requires_endpoints() {
        let err = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/library"),
            ("OUTBOX_ENABLED", "true"),
            ("OUTBOX_BOOK_SEND_URL", "http://localhost:9000/books"),
        ]))
        .unwrap_err();

        assert!(matches!(err, envy::Error::MissingValue("OUTBOX_AUTHOR_SEND_URL")));
    }

    #[test]
    fn aws_endpoints_require_a_region() {
        let err = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/library"),
            ("OUTBOX_ENABLED", "true"),
            ("OUTBOX_BOOK_SEND_URL", "http://localhost:9000/books"),
            ("OUTBOX_AUTHOR_SEND_URL", "SNS::arn:aws:sns:eu-west-1:000000000000:authors"),
        ]))
        .unwrap_err();

        assert!(matches!(err, envy::Error::MissingValue("AWS_REGION")));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/library"),
            ("OUTBOX_ENABLED", "true"),
            ("OUTBOX_WORKERS", "0"),
        ]))
        .unwrap_err();

        assert!(matches!(err, envy::Error::Custom(_)));
    }

    #[test]
    fn full_outbox_configuration_is_parsed() {
        let config = Config::from_vars(vars(&[
            ("DATABASE_URL", "postgres://localhost/library"),
            ("AWS_REGION", "eu-west-1"),
            ("OUTBOX_ENABLED", "true"),
            ("OUTBOX_WORKERS", "2"),
            ("OUTBOX_BATCH_SIZE", "10"),
            ("OUTBOX_WAIT_TIME_MS", "250"),
            ("OUTBOX_IN_PROGRESS_TTL_MS", "5000"),
            ("OUTBOX_BOOK_SEND_URL", "SQS::https://sqs.eu-west-1.amazonaws.com/0/books"),
            ("OUTBOX_AUTHOR_SEND_URL", "https://example.com/authors"),
            ("OUTBOX_ABORT_IN_FLIGHT", "true"),
        ]))
        .unwrap();

        let settings = config.outbox_settings();
        assert!(settings.enabled);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.wait_time, Duration::from_millis(250));
        assert_eq!(settings.in_progress_ttl, Duration::from_secs(5));
        assert!(config.outbox_abort_in_flight);
        assert_eq!(
            config.book_endpoint().unwrap(),
            Endpoint::Sqs("https://sqs.eu-west-1.amazonaws.com/0/books".to_string())
        );
        assert_eq!(
            config.author_endpoint().unwrap(),
            Endpoint::Http("https://example.com/authors".to_string())
        );
    }
}
