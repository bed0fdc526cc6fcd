//! Email Queue Background Task
//!
//! Polls the queue on a fixed interval and hands each pass to
//! [`EmailService::process_email_queue`]. A pass in progress always
//! completes; the shutdown signal is only observed between passes.

use crate::config::EmailQueueConfig;
use crate::services::EmailService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Lifetime counters for the queue task.
#[derive(Debug, Default)]
pub struct EmailQueueMetrics {
    pub cycles: AtomicU64,
    pub sent: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
    /// Passes that could not fetch work plus items that could not be written.
    pub errors: AtomicU64,
}

impl EmailQueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EmailQueueSnapshot {
        EmailQueueSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailQueueSnapshot {
    pub cycles: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run queue passes until `shutdown_rx` flips to `true`.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(email_queue_task(service, EmailQueueConfig::from_env(), shutdown_rx));
/// // ...
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn email_queue_task(
    service: Arc<EmailService>,
    config: EmailQueueConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<EmailQueueMetrics> {
    let metrics = Arc::new(EmailQueueMetrics::new());

    let mut poll = interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        "Email queue task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Email queue task shutting down");
                    break;
                }
            }

            _ = poll.tick() => {
                run_pass(&service, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        sent = snapshot.sent,
        retried = snapshot.retried,
        failed = snapshot.failed,
        errors = snapshot.errors,
        "Email queue task completed"
    );

    metrics
}

async fn run_pass(service: &EmailService, metrics: &EmailQueueMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    match service.process_email_queue().await {
        Ok(stats) => {
            metrics.sent.fetch_add(stats.sent, Ordering::Relaxed);
            metrics.retried.fetch_add(stats.retried, Ordering::Relaxed);
            metrics.failed.fetch_add(stats.failed, Ordering::Relaxed);
            metrics.errors.fetch_add(stats.errors, Ordering::Relaxed);
            if stats.processed == 0 {
                tracing::trace!("Email queue pass found no work");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Email queue pass failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
