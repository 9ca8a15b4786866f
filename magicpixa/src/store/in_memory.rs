//! In-memory store.
//!
//! All state sits behind a single lock, so every operation is trivially atomic. Suitable for
//! development and tests; nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::Store;
use crate::{
    api::models::users::Role,
    db::{
        errors::{DbError, Result},
        models::{
            artifacts::ArtifactDBResponse,
            credits::{CreditGrantDBRequest, CreditTransactionDBResponse, CreditTransactionType},
            payments::{PaymentOrderCreateDBRequest, PaymentOrderDBResponse},
            quotas::QuotaOutcome,
            reservations::{
                Delivery, EXPIRED_RELEASE_REASON, ReservationDBResponse, ReservationStatus, ReserveDBRequest, ReserveOutcome,
            },
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{ArtifactId, DeviceId, ReservationId, UserId},
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserDBResponse>,
    emails: HashMap<String, UserId>,
    transactions: Vec<CreditTransactionDBResponse>,
    reservations: HashMap<ReservationId, ReservationDBResponse>,
    artifacts: HashMap<ArtifactId, ArtifactDBResponse>,
    quotas: HashMap<DeviceId, i64>,
    payment_orders: Vec<PaymentOrderDBResponse>,
}

impl State {
    fn user_mut(&mut self, id: UserId) -> Result<&mut UserDBResponse> {
        self.users.get_mut(&id).ok_or(DbError::NotFound)
    }

    fn push_transaction(
        &mut self,
        user_id: UserId,
        transaction_type: CreditTransactionType,
        amount: i64,
        balance_after: i64,
        source_id: String,
        description: Option<String>,
    ) -> CreditTransactionDBResponse {
        let tx = CreditTransactionDBResponse {
            id: Uuid::new_v4(),
            user_id,
            transaction_type,
            amount,
            balance_after,
            source_id,
            description,
            created_at: Utc::now(),
        };
        self.transactions.push(tx.clone());
        tx
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn page<T>(mut rows: Vec<T>, skip: i64, limit: i64) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let skip = skip.max(0) as usize;
    let limit = limit.max(0) as usize;
    let page = if skip >= rows.len() {
        Vec::new()
    } else {
        rows.drain(skip..).take(limit).collect()
    };
    (page, total)
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.read();
        Ok(state.emails.get(&email_key(email)).and_then(|id| state.users.get(id)).cloned())
    }

    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.write();
        let key = email_key(&request.email);
        if let Some(user) = state.emails.get(&key).and_then(|id| state.users.get(id)) {
            return Ok(user.clone());
        }

        let now = Utc::now();
        let bonus = request.signup_bonus.max(0);
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            email: request.email.trim().to_string(),
            display_name: request.display_name.clone(),
            credits: bonus,
            reserved_credits: 0,
            plan: request.plan.clone(),
            roles: request.roles.clone(),
            is_admin: request.is_admin,
            created_at: now,
            updated_at: now,
        };
        state.emails.insert(key, user.id);
        state.users.insert(user.id, user.clone());
        if bonus > 0 {
            state.push_transaction(
                user.id,
                CreditTransactionType::SignupBonus,
                bonus,
                bonus,
                format!("signup_{}", user.id),
                Some("Signup bonus".to_string()),
            );
        }
        tracing::info!(user_id = %user.id, bonus, "Created user account");
        Ok(user)
    }

    async fn set_roles(&self, id: UserId, roles: &[Role], is_admin: bool) -> Result<UserDBResponse> {
        let mut state = self.state.write();
        let user = state.user_mut(id)?;
        user.roles = roles.to_vec();
        user.is_admin = is_admin;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn reserve_credits(&self, request: &ReserveDBRequest) -> Result<ReserveOutcome> {
        let mut state = self.state.write();

        if let Some(key) = &request.idempotency_key {
            let existing = state
                .reservations
                .values_mut()
                .find(|r| r.user_id == request.user_id && r.idempotency_key.as_ref() == Some(key));
            if let Some(existing) = existing {
                if existing.request_fingerprint != request.request_fingerprint {
                    return Ok(ReserveOutcome::KeyReused);
                }
                match existing.status {
                    ReservationStatus::Held => return Ok(ReserveOutcome::InFlight),
                    ReservationStatus::Delivered | ReservationStatus::Committed => {
                        return Ok(ReserveOutcome::Replay(existing.clone()));
                    }
                    ReservationStatus::Released => existing.idempotency_key = None,
                }
            }
        }

        let user = state.user_mut(request.user_id)?;
        let available = (user.credits - user.reserved_credits).max(0);
        if available < request.amount {
            return Ok(ReserveOutcome::Insufficient { available });
        }
        user.reserved_credits += request.amount;
        user.updated_at = Utc::now();

        let now = Utc::now();
        let reservation = ReservationDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            feature: request.feature.clone(),
            amount: request.amount,
            status: ReservationStatus::Held,
            idempotency_key: request.idempotency_key.clone(),
            request_fingerprint: request.request_fingerprint.clone(),
            output_url: None,
            output_text: None,
            artifact_id: None,
            release_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(ReserveOutcome::Reserved(reservation))
    }

    async fn mark_delivered(&self, id: ReservationId, delivery: &Delivery) -> Result<ReservationDBResponse> {
        let mut state = self.state.write();
        let reservation = state.reservations.get(&id).cloned().ok_or(DbError::NotFound)?;
        match reservation.status {
            ReservationStatus::Held => {}
            ReservationStatus::Released if reservation.release_reason.as_deref() == Some(EXPIRED_RELEASE_REASON) => {
                let user = state.user_mut(reservation.user_id)?;
                user.reserved_credits += reservation.amount;
                user.updated_at = Utc::now();
            }
            status => {
                return Err(DbError::Other(anyhow::anyhow!(
                    "reservation {id} is {status:?} and cannot be marked delivered"
                )));
            }
        }

        let stored = state.reservations.get_mut(&id).ok_or(DbError::NotFound)?;
        stored.status = ReservationStatus::Delivered;
        stored.release_reason = None;
        stored.output_url = delivery.output_url.clone();
        stored.output_text = delivery.output_text.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn commit_reservation(&self, id: ReservationId) -> Result<ArtifactDBResponse> {
        let mut state = self.state.write();
        let reservation = state.reservations.get(&id).cloned().ok_or(DbError::NotFound)?;

        match reservation.status {
            ReservationStatus::Committed => {
                return reservation
                    .artifact_id
                    .and_then(|artifact_id| state.artifacts.get(&artifact_id).cloned())
                    .ok_or(DbError::NotFound);
            }
            ReservationStatus::Released => {
                return Err(DbError::Other(anyhow::anyhow!("reservation {id} was released and cannot be committed")));
            }
            ReservationStatus::Held | ReservationStatus::Delivered => {}
        }

        let now = Utc::now();
        let user = state.user_mut(reservation.user_id)?;
        let before = user.credits;
        user.credits = (user.credits - reservation.amount).max(0);
        user.reserved_credits = (user.reserved_credits - reservation.amount).max(0);
        user.updated_at = now;
        let after = user.credits;
        let debited = before - after;

        state.push_transaction(
            reservation.user_id,
            CreditTransactionType::Usage,
            debited,
            after,
            id.to_string(),
            Some(format!("{} job", reservation.feature)),
        );

        let artifact = ArtifactDBResponse {
            id: Uuid::new_v4(),
            user_id: reservation.user_id,
            reservation_id: id,
            feature: reservation.feature.clone(),
            output_url: reservation.output_url.clone(),
            output_text: reservation.output_text.clone(),
            credits_used: debited,
            created_at: now,
        };
        state.artifacts.insert(artifact.id, artifact.clone());

        if let Some(stored) = state.reservations.get_mut(&id) {
            stored.status = ReservationStatus::Committed;
            stored.artifact_id = Some(artifact.id);
            stored.updated_at = now;
        }
        Ok(artifact)
    }

    async fn release_reservation(&self, id: ReservationId, reason: &str) -> Result<bool> {
        let mut state = self.state.write();
        let Some(reservation) = state.reservations.get_mut(&id) else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Held {
            return Ok(false);
        }
        reservation.status = ReservationStatus::Released;
        reservation.release_reason = Some(reason.to_string());
        reservation.updated_at = Utc::now();
        let (user_id, amount) = (reservation.user_id, reservation.amount);

        let user = state.user_mut(user_id)?;
        user.reserved_credits = (user.reserved_credits - amount).max(0);
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationDBResponse>> {
        Ok(self.state.read().reservations.get(&id).cloned())
    }

    async fn stale_reservations(
        &self,
        status: ReservationStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReservationDBResponse>> {
        let state = self.state.read();
        let mut stale: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.status == status && r.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn grant_credits(&self, request: &CreditGrantDBRequest) -> Result<CreditTransactionDBResponse> {
        if !matches!(
            request.transaction_type,
            CreditTransactionType::AdminGrant | CreditTransactionType::AdminRemoval
        ) || request.amount < 0
        {
            return Err(DbError::Other(anyhow::anyhow!(
                "grant must be a non-negative admin_grant or admin_removal"
            )));
        }

        let mut state = self.state.write();
        if let Some(existing) = state.transactions.iter().find(|t| t.source_id == request.source_id) {
            return Ok(existing.clone());
        }

        let user = state.user_mut(request.user_id)?;
        let current = user.credits;
        let new_balance = if request.transaction_type.is_debit() {
            (current - request.amount).max(0)
        } else {
            current + request.amount
        };
        user.credits = new_balance;
        user.updated_at = Utc::now();

        Ok(state.push_transaction(
            request.user_id,
            request.transaction_type,
            (new_balance - current).abs(),
            new_balance,
            request.source_id.clone(),
            request.description.clone(),
        ))
    }

    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<CreditTransactionDBResponse>, i64)> {
        let state = self.state.read();
        // Insertion order is chronological, so reversing gives newest first
        let rows: Vec<_> = state.transactions.iter().rev().filter(|t| t.user_id == user_id).cloned().collect();
        Ok(page(rows, skip, limit))
    }

    async fn list_artifacts(&self, user_id: UserId, skip: i64, limit: i64) -> Result<(Vec<ArtifactDBResponse>, i64)> {
        let state = self.state.read();
        let mut rows: Vec<_> = state.artifacts.values().filter(|a| a.user_id == user_id).cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(rows, skip, limit))
    }

    async fn get_artifact(&self, id: ArtifactId) -> Result<Option<ArtifactDBResponse>> {
        Ok(self.state.read().artifacts.get(&id).cloned())
    }

    async fn anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        Ok(self.state.read().quotas.get(&device_id).copied().unwrap_or(allowance.max(0)))
    }

    async fn consume_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<QuotaOutcome> {
        let mut state = self.state.write();
        let remaining = state.quotas.entry(device_id).or_insert(allowance.max(0));
        if *remaining <= 0 {
            return Ok(QuotaOutcome::Exhausted);
        }
        *remaining -= 1;
        Ok(QuotaOutcome::Consumed { remaining: *remaining })
    }

    async fn refund_anonymous_quota(&self, device_id: DeviceId, allowance: i64) -> Result<i64> {
        let mut state = self.state.write();
        let allowance = allowance.max(0);
        match state.quotas.get_mut(&device_id) {
            Some(remaining) => {
                *remaining = (*remaining + 1).min(allowance);
                Ok(*remaining)
            }
            None => Ok(allowance),
        }
    }

    async fn record_payment_order(&self, request: &PaymentOrderCreateDBRequest) -> Result<PaymentOrderDBResponse> {
        let mut state = self.state.write();
        if !state.users.contains_key(&request.user_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some("payment_orders_user_id_fkey".to_string()),
                table: Some("payment_orders".to_string()),
                message: format!("user {} does not exist", request.user_id),
            });
        }
        if state
            .payment_orders
            .iter()
            .any(|o| o.provider == request.provider && o.provider_order_id == request.provider_order_id)
        {
            return Err(DbError::UniqueViolation {
                constraint: Some("payment_orders_provider_order_unique".to_string()),
                table: Some("payment_orders".to_string()),
                message: format!("order {} already recorded", request.provider_order_id),
            });
        }

        let order = PaymentOrderDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            provider: request.provider.clone(),
            provider_order_id: request.provider_order_id.clone(),
            amount: request.amount,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            status: request.status.clone(),
            receipt: request.receipt.clone(),
            created_at: Utc::now(),
        };
        state.payment_orders.push(order.clone());
        Ok(order)
    }
}
