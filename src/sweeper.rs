//! Delivery worker pool.
//!
//! Each worker polls on a fixed interval and, inside one transaction,
//! claims a batch, delivers every message through the dispatcher and
//! marks the successful ones as processed. Workers never coordinate in
//! memory; the claim query's row locks keep them apart, also across
//! processes.
//!
//! Deliveries run inside the claim transaction. If the transaction fails
//! after a delivery already reached the receiver, the message is claimed
//! again later and delivered a second time: delivery is at-least-once and
//! handlers must be idempotent on the receiving side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sqlx::PgConnection;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::config::OutboxSettings;
use crate::dispatcher::Dispatcher;
use crate::error::OutboxError;
use crate::metrics::{OutboxMetrics, kind_label};
use crate::models::OutboxMessage;
use crate::outbox::OutboxRepository;
use crate::transactor::Transactor;

/// Outcome of one sweep iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let in-flight iterations commit or roll back on their own.
    Drain,
    /// Interrupt in-flight iterations; their transactions roll back.
    Abort,
}

pub struct OutboxSweeper {
    transactor: Transactor,
    outbox: OutboxRepository,
    dispatcher: Dispatcher,
    metrics: Arc<dyn OutboxMetrics>,
    settings: OutboxSettings,
}

impl OutboxSweeper {
    pub fn new(
        transactor: Transactor,
        outbox: OutboxRepository,
        dispatcher: Dispatcher,
        metrics: Arc<dyn OutboxMetrics>,
        settings: OutboxSettings,
    ) -> Self {
        Self {
            transactor,
            outbox,
            dispatcher,
            metrics,
            settings,
        }
    }

    /// Spawns `settings.workers` polling loops.
    pub fn start(self: Arc<Self>) -> SweeperHandle {
        let abort = CancellationToken::new();
        let stop = abort.child_token();
        let enabled = Arc::new(AtomicBool::new(self.settings.enabled));
        let mut workers = JoinSet::new();

        for worker_id in 1..=self.settings.workers {
            let sweeper = Arc::clone(&self);
            let stop = stop.clone();
            let abort = abort.clone();
            let enabled = Arc::clone(&enabled);
            workers.spawn(
                async move { sweeper.run_worker(stop, abort, enabled).await }
                    .instrument(info_span!("outbox_worker", worker_id)),
            );
        }

        info!(
            workers = self.settings.workers,
            batch_size = self.settings.batch_size,
            wait_time_ms = self.settings.wait_time.as_millis() as u64,
            in_progress_ttl_ms = self.settings.in_progress_ttl.as_millis() as u64,
            "Outbox sweeper started."
        );

        SweeperHandle {
            stop,
            abort,
            enabled,
            workers,
        }
    }

    async fn run_worker(
        &self,
        stop: CancellationToken,
        abort: CancellationToken,
        enabled: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.settings.wait_time) => {}
            }

            if !enabled.load(Ordering::Relaxed) {
                continue;
            }

            tokio::select! {
                result = self.sweep_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "Outbox sweep failed, retrying next tick.");
                    }
                }
                _ = abort.cancelled() => {
                    warn!("Aborting in-flight outbox sweep.");
                    break;
                }
            }
        }

        debug!("Outbox worker stopped.");
    }

    /// Runs one claim, deliver, mark iteration in its own transaction.
    ///
    /// Store errors abort the iteration and roll it back. Delivery errors
    /// only affect their message, which stays claimable after the TTL.
    #[instrument(skip(self), fields(claimed = tracing::field::Empty))]
    pub async fn sweep_once(&self) -> Result<SweepReport, OutboxError> {
        let mut scope = self.transactor.begin(None).await?;
        let result = self.sweep_in(scope.conn()).await;
        let report = scope.finish(result).await?;

        if report.claimed > 0 {
            tracing::Span::current().record("claimed", report.claimed);
            info!(
                delivered = report.delivered,
                failed = report.failed,
                "Outbox sweep complete."
            );
        }
        Ok(report)
    }

    async fn sweep_in(&self, conn: &mut PgConnection) -> Result<SweepReport, OutboxError> {
        let messages = self
            .outbox
            .claim_batch(&mut *conn, self.settings.batch_size, self.settings.in_progress_ttl)
            .await
            .inspect_err(|e| error!(error = %e, "Can not fetch messages from outbox."))?;

        if messages.is_empty() {
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport {
            claimed: messages.len(),
            ..SweepReport::default()
        };
        let mut success_keys = Vec::with_capacity(messages.len());

        for message in messages {
            let span = info_span!(
                "outbox_delivery",
                kind = %message.kind,
                idempotency_key = %message.idempotency_key,
                trace_id = message.trace_id.as_deref().unwrap_or_default(),
            );

            match self.deliver(&message).instrument(span).await {
                Ok(()) => {
                    report.delivered += 1;
                    success_keys.push(message.idempotency_key);
                }
                Err(_) => report.failed += 1,
            }
        }

        self.outbox
            .mark_processed(&mut *conn, &success_keys)
            .await
            .inspect_err(|e| error!(error = %e, "Mark as processed outbox error."))?;

        Ok(report)
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<(), OutboxError> {
        let started = Instant::now();
        let label = kind_label(&message.kind);
        let outcome = match self.dispatcher.resolve(&message.kind) {
            Ok(handler) => handler
                .deliver(&message.payload)
                .await
                .map_err(OutboxError::from),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => {
                self.metrics.record_delivered(label, started.elapsed());
                debug!("Message delivered.");
            }
            Err(e) => {
                self.metrics.record_failed(label);
                error!(error = %e, "Message delivery failed.");
            }
        }

        outcome
    }
}

/// Control surface of a running worker pool.
pub struct SweeperHandle {
    stop: CancellationToken,
    abort: CancellationToken,
    enabled: Arc<AtomicBool>,
    workers: JoinSet<()>,
}

impl SweeperHandle {
    /// Workers keep polling but skip their iterations until resumed.
    pub fn pause(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        info!("Outbox sweeper paused.");
    }

    pub fn resume(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        info!("Outbox sweeper resumed.");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stops every worker and waits for them to exit.
    pub async fn shutdown(mut self, mode: ShutdownMode) {
        match mode {
            ShutdownMode::Drain => self.stop.cancel(),
            ShutdownMode::Abort => self.abort.cancel(),
        }

        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Outbox worker terminated abnormally.");
            }
        }

        info!(?mode, "Outbox sweeper shut down.");
    }
}
