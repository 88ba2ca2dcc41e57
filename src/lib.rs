//! Library catalogue with a transactional outbox.
//!
//! Author and book changes are written together with an outbox event in
//! one Postgres transaction. A pool of sweeper workers later claims those
//! events and delivers them over HTTP, SQS or SNS.

pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod library;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod sweeper;
pub mod telemetry;
pub mod transactor;
