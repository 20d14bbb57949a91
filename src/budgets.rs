use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tower_sessions::Session;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::get_current_user;
use crate::constants::*;
use crate::database::Db;
use crate::models::{Budget, CreateBudgetPayload, MonthQuery, UpdateBudgetPayload};
use crate::realtime::{ChangeEvent, TABLE_BUDGETS};
use crate::utils::{
    ApiError, bad_request, db_error_with_context, db_failure, not_found, now_timestamp, trimmed,
    validate_month, validate_positive_amount, validate_string_length,
};

const SELECT_COLUMNS: &str = "id, user_id, category, amount, month, created_at, updated_at";

pub fn validate_budget_amount(amount: f64) -> Result<(), ApiError> {
    validate_positive_amount(amount, "Budget amount")
}

pub fn validate_budget_category(category: &str) -> Result<(), ApiError> {
    validate_string_length(category, "Budget category", MAX_CATEGORY_NAME_LENGTH)
}

pub fn extract_budget_from_row(row: libsql::Row) -> Result<Budget, ApiError> {
    let invalid = |_| db_error_with_context("invalid budget data");

    Ok(Budget {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        category: row.get(2).map_err(invalid)?,
        amount: row.get(3).map_err(invalid)?,
        month: row.get(4).map_err(invalid)?,
        created_at: row.get(5).map_err(invalid)?,
        updated_at: row.get(6).map_err(invalid)?,
    })
}

async fn find_budget(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Budget>, ApiError> {
    let mut rows = conn
        .query(
            &format!("SELECT {} FROM budgets WHERE id = ? AND user_id = ?", SELECT_COLUMNS),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load budget"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read budget row"))?
    {
        Some(row) => Ok(Some(extract_budget_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn query_budgets(
    db: &Db,
    user_id: &str,
    month: Option<&str>,
) -> Result<Vec<Budget>, ApiError> {
    let conn = db.read().await;
    let mut rows = match month {
        Some(month) => {
            validate_month(month)?;
            conn.query(
                &format!(
                    "SELECT {} FROM budgets WHERE user_id = ? AND month = ? ORDER BY month DESC, created_at DESC",
                    SELECT_COLUMNS
                ),
                (user_id, month),
            )
            .await
        }
        None => {
            conn.query(
                &format!(
                    "SELECT {} FROM budgets WHERE user_id = ? ORDER BY month DESC, created_at DESC",
                    SELECT_COLUMNS
                ),
                [user_id],
            )
            .await
        }
    }
    .map_err(db_failure("failed to query budgets"))?;

    let mut budgets = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read budget row"))?
    {
        budgets.push(extract_budget_from_row(row)?);
    }
    Ok(budgets)
}

pub async fn insert_budget(
    db: &Db,
    user_id: &str,
    payload: &CreateBudgetPayload,
) -> Result<Budget, ApiError> {
    validate_budget_category(&payload.category)?;
    validate_budget_amount(payload.amount)?;
    validate_month(payload.month.trim())?;

    let now = now_timestamp();
    let budget = Budget {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        category: payload.category.trim().to_string(),
        amount: payload.amount,
        month: payload.month.trim().to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let conn = db.write().await;
    conn.execute(
        "INSERT INTO budgets (id, user_id, category, amount, month, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            budget.id.as_str(),
            budget.user_id.as_str(),
            budget.category.as_str(),
            budget.amount,
            budget.month.as_str(),
            budget.created_at.as_str(),
            budget.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("budget creation failed"))?;

    Ok(budget)
}

pub async fn modify_budget(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &UpdateBudgetPayload,
) -> Result<(Budget, Budget), ApiError> {
    if payload.category.is_none() && payload.amount.is_none() && payload.month.is_none() {
        return Err(bad_request(ERR_NO_UPDATE_FIELDS));
    }
    if let Some(category) = &payload.category {
        validate_budget_category(category)?;
    }
    if let Some(amount) = payload.amount {
        validate_budget_amount(amount)?;
    }
    if let Some(month) = &payload.month {
        validate_month(month.trim())?;
    }

    let conn = db.write().await;
    let existing = find_budget(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Budget"))?;

    let updated = Budget {
        category: trimmed(&payload.category).unwrap_or_else(|| existing.category.clone()),
        amount: payload.amount.unwrap_or(existing.amount),
        month: trimmed(&payload.month).unwrap_or_else(|| existing.month.clone()),
        updated_at: now_timestamp(),
        ..existing.clone()
    };

    conn.execute(
        "UPDATE budgets SET category = ?, amount = ?, month = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (
            updated.category.as_str(),
            updated.amount,
            updated.month.as_str(),
            updated.updated_at.as_str(),
            id,
            user_id,
        ),
    )
    .await
    .map_err(db_failure("budget update failed"))?;

    Ok((existing, updated))
}

pub async fn remove_budget(db: &Db, user_id: &str, id: &str) -> Result<Budget, ApiError> {
    let conn = db.write().await;
    let existing = find_budget(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Budget"))?;

    conn.execute("DELETE FROM budgets WHERE id = ? AND user_id = ?", (id, user_id))
        .await
        .map_err(db_failure("budget deletion failed"))?;

    Ok(existing)
}

pub async fn list_budgets(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MonthQuery>,
) -> Result<(StatusCode, Json<Vec<Budget>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let budgets = query_budgets(&db, &user.id, query.month.as_deref()).await?;
    Ok((StatusCode::OK, Json(budgets)))
}

pub async fn create_budget(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateBudgetPayload>,
) -> Result<(StatusCode, Json<Budget>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let budget = insert_budget(&db, &user.id, &payload).await?;
    tracing::info!(user_id = %user.id, budget_id = %budget.id, month = %budget.month, "budget created");
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_BUDGETS, &user.id, &budget));

    Ok((StatusCode::CREATED, Json(budget)))
}

pub async fn update_budget(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<UpdateBudgetPayload>,
) -> Result<(StatusCode, Json<Budget>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_budget(&db, &user.id, &id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::update(TABLE_BUDGETS, &user.id, &before, &after));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_budget(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let removed = remove_budget(&db, &user.id, &id).await?;
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_BUDGETS, &user.id, &removed));

    Ok(StatusCode::NO_CONTENT)
}
