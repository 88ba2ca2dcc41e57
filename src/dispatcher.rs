use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeliveryError, OutboxError};
use crate::models::OutboxKind;

/// Delivers the payload of one outbox message.
///
/// A handler may be invoked more than once for the same payload (delivery
/// is at-least-once), so receivers must key on the entity id.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, payload: &[u8]) -> Result<(), DeliveryError>;
}

/// Registry from kind to handler, built once at startup.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<OutboxKind, Arc<dyn DeliveryHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: OutboxKind, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = OutboxKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Resolves the stored kind tag to its handler.
    pub fn resolve(&self, kind: &str) -> Result<&dyn DeliveryHandler, OutboxError> {
        let kind: OutboxKind = kind
            .parse()
            .map_err(|_| OutboxError::UnknownKind(kind.to_string()))?;

        self.handlers
            .get(&kind)
            .map(|handler| handler.as_ref())
            .ok_or(OutboxError::UnregisteredKind(kind))
    }
}
