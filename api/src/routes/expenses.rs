//! Expense endpoints (/data/expenses/*)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;
use tracing::error;

use super::auth::AuthUser;
use crate::AppState;
use crate::models::{Expense, ExpenseInput};
use crate::services::expenses::ExpenseError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/expenses", get(list_expenses).post(add_expense))
        .route(
            "/expenses/{id}",
            get(get_expense).put(update_expense).delete(delete_expense),
        )
}

fn expense_status(err: ExpenseError) -> StatusCode {
    match err {
        ExpenseError::Invalid => StatusCode::BAD_REQUEST,
        ExpenseError::NotFound => StatusCode::NOT_FOUND,
        ExpenseError::Storage => {
            error!(error = %err, "expense request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// GET /data/expenses - the caller's expenses, oldest first
async fn list_expenses(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
) -> Result<Json<Vec<Expense>>, StatusCode> {
    let expenses = state
        .expenses
        .get_expenses_for_user(&auth.user)
        .await
        .map_err(expense_status)?;

    Ok(Json(expenses))
}

/// POST /data/expenses
async fn add_expense(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Json(input): Json<ExpenseInput>,
) -> Result<(StatusCode, Json<Expense>), StatusCode> {
    let expense = state
        .expenses
        .add_expense(input, &auth.user)
        .await
        .map_err(expense_status)?;

    Ok((StatusCode::CREATED, Json(expense)))
}

/// GET /data/expenses/{id}
async fn get_expense(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Expense>, StatusCode> {
    let expense = state
        .expenses
        .get_expense(id, &auth.user)
        .await
        .map_err(expense_status)?;

    Ok(Json(expense))
}

/// PUT /data/expenses/{id}
async fn update_expense(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<ExpenseInput>,
) -> Result<Json<Expense>, StatusCode> {
    let expense = state
        .expenses
        .update_expense(id, input, &auth.user)
        .await
        .map_err(expense_status)?;

    Ok(Json(expense))
}

/// DELETE /data/expenses/{id}
async fn delete_expense(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state
        .expenses
        .delete_expense(id, &auth.user)
        .await
        .map_err(expense_status)?;

    Ok(StatusCode::NO_CONTENT)
}
