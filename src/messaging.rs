use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::dispatcher::{DeliveryHandler, Dispatcher};
use crate::error::DeliveryError;
use crate::models::{Author, Book, Entity, OutboxKind};

const SNS_PREFIX: &str = "SNS::";
const SQS_PREFIX: &str = "SQS::";

/// Where notifications for one kind are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http(String),
    Sns(String),
    Sqs(String),
}

impl Endpoint {
    pub fn needs_aws(&self) -> bool {
        matches!(self, Endpoint::Sns(_) | Endpoint::Sqs(_))
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let address = address.trim();
        if let Some(arn) = address.strip_prefix(SNS_PREFIX) {
            return Ok(Endpoint::Sns(arn.to_string()));
        }
        if let Some(queue_url) = address.strip_prefix(SQS_PREFIX) {
            return Ok(Endpoint::Sqs(queue_url.to_string()));
        }
        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(Endpoint::Http(address.to_string()));
        }
        Err(format!("unsupported endpoint address `{address}`"))
    }
}

/// Clients shared by every handler.
#[derive(Debug, Clone)]
pub struct Transports {
    pub http: reqwest::Client,
    pub sqs: Option<SqsClient>,
    pub sns: Option<SnsClient>,
}

#[derive(Debug, Serialize)]
struct Notification {
    kind: OutboxKind,
    id: Uuid,
}

/// Announces an entity by id to its endpoint.
///
/// The body only carries kind and id so a receiver seeing the same
/// notification twice can recognise it.
pub struct EntityNotifier<E> {
    endpoint: Endpoint,
    transports: Arc<Transports>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityNotifier<E> {
    pub fn new(endpoint: Endpoint, transports: Arc<Transports>) -> Self {
        Self {
            endpoint,
            transports,
            _entity: PhantomData,
        }
    }

    async fn send(&self, body: String) -> Result<(), DeliveryError> {
        match &self.endpoint {
            Endpoint::Http(url) => send_http(&self.transports.http, url, body).await,
            Endpoint::Sqs(queue_url) => {
                let client = self
                    .transports
                    .sqs
                    .as_ref()
                    .ok_or(DeliveryError::MissingTransport("SQS"))?;
                send_message_to_sqs(client, queue_url, body).await
            }
            Endpoint::Sns(topic_arn) => {
                let client = self
                    .transports
                    .sns
                    .as_ref()
                    .ok_or(DeliveryError::MissingTransport("SNS"))?;
                publish_message_to_sns(client, topic_arn, body).await
            }
        }
    }
}

#[async_trait]
impl<E: Entity> DeliveryHandler for EntityNotifier<E> {
    async fn deliver(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        let entity: E = serde_json::from_slice(payload).map_err(|source| DeliveryError::Payload {
            kind: E::KIND,
            source,
        })?;
        let notification = Notification {
            kind: E::KIND,
            id: entity.id(),
        };
        let body = serde_json::to_string(&notification).map_err(|source| DeliveryError::Payload {
            kind: E::KIND,
            source,
        })?;

        self.send(body).await
    }
}

#[instrument(skip(client, body))]
async fn send_http(client: &reqwest::Client, url: &str, body: String) -> Result<(), DeliveryError> {
    let response = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        });
    }

    debug!(%status, "Notification accepted.");
    Ok(())
}

#[instrument(skip(client, body))]
async fn send_message_to_sqs(
    client: &SqsClient,
    queue_url: &str,
    body: String,
) -> Result<(), DeliveryError> {
    client
        .send_message()
        .queue_url(queue_url)
        .message_body(body)
        .send()
        .await?;

    Ok(())
}

#[instrument(skip(client, body))]
async fn publish_message_to_sns(
    client: &SnsClient,
    topic_arn: &str,
    body: String,
) -> Result<(), DeliveryError> {
    client
        .publish()
        .topic_arn(topic_arn)
        .message(body)
        .send()
        .await?;

    Ok(())
}

/// Builds the dispatcher with one notifier per kind.
pub fn build_dispatcher(
    book_endpoint: Endpoint,
    author_endpoint: Endpoint,
    transports: Arc<Transports>,
) -> Dispatcher {
    Dispatcher::new()
        .register(
            OutboxKind::Book,
            Arc::new(EntityNotifier::<Book>::new(book_endpoint, transports.clone())),
        )
        .register(
            OutboxKind::Author,
            Arc::new(EntityNotifier::<Author>::new(author_endpoint, transports)),
        )
}
