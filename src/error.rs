use aws_sdk_sns::error::SdkError as SnsSdkError;
use aws_sdk_sns::operation::publish::PublishError;
use aws_sdk_sqs::error::SdkError as SqsSdkError;
use aws_sdk_sqs::operation::send_message::SendMessageError;

use crate::models::OutboxKind;

/// Errors raised by the outbox store, dispatcher and sweeper.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unsupported outbox kind: {0}")]
    UnknownKind(String),

    #[error("no delivery handler registered for kind {0}")]
    UnregisteredKind(OutboxKind),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Failure of a single delivery attempt. Always local to one message.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("can not deserialize {kind} payload: {source}")]
    Payload {
        kind: OutboxKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to send request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("non success response: {status}, body: {body}")]
    Status { status: u16, body: String },

    #[error("failed to send message to SQS: {0}")]
    Sqs(#[from] SqsSdkError<SendMessageError>),

    #[error("failed to publish message to SNS: {0}")]
    Sns(#[from] SnsSdkError<PublishError>),

    #[error("no {0} client configured")]
    MissingTransport(&'static str),
}

/// Errors surfaced to callers of the library use cases.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("can not serialize entity snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("author not found")]
    AuthorNotFound,

    #[error("book not found")]
    BookNotFound,
}

impl LibraryError {
    /// Maps missing rows and foreign key violations to `not_found`.
    pub(crate) fn from_query(err: sqlx::Error, not_found: LibraryError) -> LibraryError {
        match &err {
            sqlx::Error::RowNotFound => not_found,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => not_found,
            _ => LibraryError::Database(err),
        }
    }
}
