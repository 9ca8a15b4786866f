//! HTTP handlers for credit transaction endpoints.

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        transactions::{CreditTransactionCreate, CreditTransactionResponse, ListTransactionsQuery},
        users::CurrentUser,
    },
    auth::permissions::{self, RequiresPermission, operation, resource},
    db::models::credits::CreditGrantDBRequest,
    errors::{Error, Result},
    types::{Operation, Permission, Resource},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

/// Create a new credit transaction
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Create a credit transaction",
    description = "Grant or remove credits (BillingManager role required). Removals stop at a zero balance. \
        Repeating a `source_id` returns the original transaction without changing the balance.",
    request_body = CreditTransactionCreate,
    responses(
        (status = 201, description = "Transaction created successfully", body = CreditTransactionResponse),
        (status = 400, description = "Bad request - invalid amount"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - requires BillingManager role"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_transaction(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Credits, operation::CreateAll>,
    Json(data): Json<CreditTransactionCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    if data.amount <= 0 {
        return Err(Error::BadRequest {
            message: "Amount must be greater than zero".to_string(),
        });
    }

    if state.store.get_user(data.user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: data.user_id.to_string(),
        });
    }

    let source_id = match data.source_id {
        Some(source_id) if !source_id.trim().is_empty() => source_id,
        _ => format!("admin_{}", Uuid::new_v4()),
    };

    let transaction = state
        .store
        .grant_credits(&CreditGrantDBRequest {
            user_id: data.user_id,
            transaction_type: data.transaction_type.into(),
            amount: data.amount,
            source_id,
            description: data.description,
        })
        .await?;

    tracing::info!(
        granted_by = %current_user.user.id,
        user_id = %transaction.user_id,
        amount = transaction.amount,
        balance_after = transaction.balance_after,
        "Applied administrative credit change"
    );
    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// List credit transactions
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    summary = "List credit transactions",
    description = "Paginated ledger history, newest first. Returns the current user's transactions unless `user_id` is \
        given, which requires the BillingManager role for other users.",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Paginated list of transactions", body = PaginatedResponse<CreditTransactionResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - cannot access other users' transactions"),
        (status = 500, description = "Internal server error"),
    ),
    security(("X-Magicpixa-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<CreditTransactionResponse>>> {
    let (skip, limit) = query.pagination.params();

    let user_id = match query.user_id {
        Some(requested) if requested != current_user.id => {
            if !permissions::has_permission(&current_user, Resource::Credits, Operation::ReadAll) {
                return Err(Error::InsufficientPermissions {
                    required: Permission::Allow(Resource::Credits, Operation::ReadAll),
                    action: Operation::ReadAll,
                    resource: "transactions".to_string(),
                });
            }
            requested
        }
        _ => {
            if !permissions::has_permission(&current_user, Resource::Credits, Operation::ReadOwn) {
                return Err(Error::InsufficientPermissions {
                    required: Permission::Allow(Resource::Credits, Operation::ReadOwn),
                    action: Operation::ReadOwn,
                    resource: "transactions".to_string(),
                });
            }
            current_user.id
        }
    };

    let (transactions, total_count) = state.store.list_transactions(user_id, skip, limit).await?;

    Ok(Json(PaginatedResponse::new(
        transactions.into_iter().map(CreditTransactionResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[cfg(test)]
mod tests {
    use crate::api::models::pagination::PaginatedResponse;
    use crate::api::models::transactions::CreditTransactionResponse;
    use crate::api::models::users::{Role, UserResponse};
    use crate::db::models::credits::CreditTransactionType;
    use crate::test_utils::{create_test_config, create_test_state, test_server};
    use axum::http::StatusCode;
    use serde_json::json;

    const USER: &str = "x-magicpixa-user";

    #[tokio::test]
    async fn billing_manager_grants_and_removes_credits() {
        let state = create_test_state(create_test_config()).await;
        let server = test_server(state.clone());

        let customer: UserResponse = server.get("/api/v1/users/current").add_header(USER, "customer@example.com").await.json();
        let manager: UserResponse = server.get("/api/v1/users/current").add_header(USER, "billing@example.com").await.json();
        state.store.set_roles(manager.id, &[Role::BillingManager], false).await.unwrap();

        let grant = server
            .post("/api/v1/transactions")
            .add_header(USER, "billing@example.com")
            .json(&json!({
                "user_id": customer.id,
                "transaction_type": "admin_grant",
                "amount": 15,
                "source_id": "promo-diwali",
                "description": "Festival promotion"
            }))
            .await;
        grant.assert_status(StatusCode::CREATED);
        let grant: CreditTransactionResponse = grant.json();
        assert_eq!(grant.balance_after, 25);

        // Same source id is a no-op
        let replay: CreditTransactionResponse = server
            .post("/api/v1/transactions")
            .add_header(USER, "billing@example.com")
            .json(&json!({
                "user_id": customer.id,
                "transaction_type": "admin_grant",
                "amount": 15,
                "source_id": "promo-diwali"
            }))
            .await
            .json();
        assert_eq!(replay.id, grant.id);

        let removal: CreditTransactionResponse = server
            .post("/api/v1/transactions")
            .add_header(USER, "billing@example.com")
            .json(&json!({ "user_id": customer.id, "transaction_type": "admin_removal", "amount": 100 }))
            .await
            .json();
        assert_eq!(removal.balance_after, 0);
        assert_eq!(removal.amount, 25);

        let history: PaginatedResponse<CreditTransactionResponse> = server
            .get(&format!("/api/v1/transactions?user_id={}", customer.id))
            .add_header(USER, "billing@example.com")
            .await
            .json();
        assert_eq!(history.total_count, 3);
        let types: Vec<_> = history.data.iter().map(|t| t.transaction_type).collect();
        assert_eq!(
            types,
            vec![
                CreditTransactionType::AdminRemoval,
                CreditTransactionType::AdminGrant,
                CreditTransactionType::SignupBonus
            ]
        );
    }

    #[tokio::test]
    async fn standard_users_only_see_their_own_history() {
        let state = create_test_state(create_test_config()).await;
        let server = test_server(state);

        let other: UserResponse = server.get("/api/v1/users/current").add_header(USER, "other@example.com").await.json();

        let own: PaginatedResponse<CreditTransactionResponse> = server
            .get("/api/v1/transactions")
            .add_header(USER, "me@example.com")
            .await
            .json();
        assert_eq!(own.total_count, 1);
        assert_eq!(own.data[0].transaction_type, CreditTransactionType::SignupBonus);

        server
            .get(&format!("/api/v1/transactions?user_id={}", other.id))
            .add_header(USER, "me@example.com")
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .post("/api/v1/transactions")
            .add_header(USER, "me@example.com")
            .json(&json!({ "user_id": other.id, "transaction_type": "admin_grant", "amount": 5 }))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts_and_unknown_users() {
        let state = create_test_state(create_test_config()).await;
        let server = test_server(state.clone());
        let manager: UserResponse = server.get("/api/v1/users/current").add_header(USER, "billing@example.com").await.json();
        state.store.set_roles(manager.id, &[Role::BillingManager], false).await.unwrap();

        server
            .post("/api/v1/transactions")
            .add_header(USER, "billing@example.com")
            .json(&json!({ "user_id": manager.id, "transaction_type": "admin_grant", "amount": 0 }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/api/v1/transactions")
            .add_header(USER, "billing@example.com")
            .json(&json!({ "user_id": uuid::Uuid::new_v4(), "transaction_type": "admin_grant", "amount": 5 }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
