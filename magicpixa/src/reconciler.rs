//! Background reconciliation of credit reservations.
//!
//! Each pass does two things:
//!
//! - commits `delivered` reservations older than the grace period. These are jobs whose output
//!   reached the caller but whose commit failed or never ran.
//! - releases `held` reservations older than the reservation TTL. These are jobs that died before
//!   producing output. A job that was only slow can still deliver afterwards; the ledger takes the
//!   hold again and charges it.
//!
//! Commit is idempotent, so a reservation committed concurrently by its own request is only
//! charged once.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ReconcilerConfig,
    db::models::reservations::{EXPIRED_RELEASE_REASON, ReservationStatus},
    store::Store,
};

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub committed: usize,
    pub released: usize,
    pub errors: usize,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    grace_period: Duration,
    reservation_ttl: Duration,
    batch_size: i64,
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, config: &ReconcilerConfig, reservation_ttl: Duration) -> Self {
        Self {
            store,
            grace_period: config.grace_period,
            reservation_ttl,
            batch_size: config.batch_size,
        }
    }

    /// Run one pass. Errors on individual reservations are logged and counted, never returned.
    pub async fn tick(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        match self
            .store
            .stale_reservations(ReservationStatus::Delivered, cutoff(self.grace_period), self.batch_size)
            .await
        {
            Ok(delivered) => {
                for reservation in delivered {
                    match self.store.commit_reservation(reservation.id).await {
                        Ok(artifact) => {
                            tracing::info!(
                                reservation_id = %reservation.id,
                                artifact_id = %artifact.id,
                                credits = artifact.credits_used,
                                "Committed delivered reservation"
                            );
                            summary.committed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to commit delivered reservation");
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list delivered reservations");
                summary.errors += 1;
            }
        }

        match self
            .store
            .stale_reservations(ReservationStatus::Held, cutoff(self.reservation_ttl), self.batch_size)
            .await
        {
            Ok(held) => {
                for reservation in held {
                    match self.store.release_reservation(reservation.id, EXPIRED_RELEASE_REASON).await {
                        Ok(true) => {
                            tracing::info!(reservation_id = %reservation.id, amount = reservation.amount, "Released expired hold");
                            summary.released += 1;
                        }
                        // Moved on since we listed it
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to release expired hold");
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list held reservations");
                summary.errors += 1;
            }
        }

        counter!("magicpixa_reconciler_actions_total", "action" => "commit").increment(summary.committed as u64);
        counter!("magicpixa_reconciler_actions_total", "action" => "release").increment(summary.released as u64);
        if summary.errors > 0 {
            counter!("magicpixa_reconciler_errors_total").increment(summary.errors as u64);
        }
        summary
    }
}

/// Run reconciliation passes every `interval` until `shutdown` is cancelled.
pub async fn run_reconciler(reconciler: Reconciler, interval: Duration, shutdown: CancellationToken) {
    tracing::info!(interval = ?interval, "Starting reservation reconciler");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Reservation reconciler shutting down");
                return;
            }
        }

        let summary = reconciler.tick().await;
        if summary != ReconcileSummary::default() {
            tracing::debug!(?summary, "Reconciler pass finished");
        }
    }
}
