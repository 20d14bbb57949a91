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
use crate::models::{CreatePlannedPayload, MonthQuery, PlannedTransaction, UpdatePlannedPayload};
use crate::realtime::{ChangeEvent, TABLE_PLANNED};
use crate::summary::{MonthlyPlannedTotals, planned_totals_by_month};
use crate::utils::{
    ApiError, bad_request, db_error_with_context, db_failure, not_found, now_timestamp, trimmed,
    validate_max_length, validate_month, validate_positive_amount, validate_string_length,
};

const SELECT_COLUMNS: &str =
    "id, user_id, month, type, category, amount, description, created_at, updated_at";

pub fn validate_planned_amount(amount: f64) -> Result<(), ApiError> {
    validate_positive_amount(amount, "Planned amount")
}

pub fn validate_planned_category(category: &str) -> Result<(), ApiError> {
    validate_string_length(category, "Category", MAX_CATEGORY_NAME_LENGTH)
}

pub fn validate_planned_description(description: &str) -> Result<(), ApiError> {
    validate_max_length(description, "Description", MAX_DESCRIPTION_LENGTH)
}

pub fn extract_planned_from_row(row: libsql::Row) -> Result<PlannedTransaction, ApiError> {
    let invalid = |_| db_error_with_context("invalid planned transaction data");
    let kind: String = row.get(3).map_err(invalid)?;

    Ok(PlannedTransaction {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        month: row.get(2).map_err(invalid)?,
        kind: kind
            .parse()
            .map_err(|_| db_error_with_context("invalid planned transaction type"))?,
        category: row.get(4).map_err(invalid)?,
        amount: row.get(5).map_err(invalid)?,
        description: row.get(6).map_err(invalid)?,
        created_at: row.get(7).map_err(invalid)?,
        updated_at: row.get(8).map_err(invalid)?,
    })
}

async fn find_planned(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<PlannedTransaction>, ApiError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM planned_transactions WHERE id = ? AND user_id = ?",
                SELECT_COLUMNS
            ),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load planned transaction"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read planned transaction row"))?
    {
        Some(row) => Ok(Some(extract_planned_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn query_planned(
    db: &Db,
    user_id: &str,
    month: Option<&str>,
) -> Result<Vec<PlannedTransaction>, ApiError> {
    let conn = db.read().await;
    let mut rows = match month {
        Some(month) => {
            validate_month(month)?;
            conn.query(
                &format!(
                    "SELECT {} FROM planned_transactions WHERE user_id = ? AND month = ? ORDER BY month ASC, created_at DESC",
                    SELECT_COLUMNS
                ),
                (user_id, month),
            )
            .await
        }
        None => {
            conn.query(
                &format!(
                    "SELECT {} FROM planned_transactions WHERE user_id = ? ORDER BY month ASC, created_at DESC",
                    SELECT_COLUMNS
                ),
                [user_id],
            )
            .await
        }
    }
    .map_err(db_failure("failed to query planned transactions"))?;

    let mut planned = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read planned transaction row"))?
    {
        planned.push(extract_planned_from_row(row)?);
    }
    Ok(planned)
}

pub async fn insert_planned(
    db: &Db,
    user_id: &str,
    payload: &CreatePlannedPayload,
) -> Result<PlannedTransaction, ApiError> {
    validate_month(payload.month.trim())?;
    validate_planned_category(&payload.category)?;
    validate_planned_amount(payload.amount)?;
    validate_planned_description(&payload.description)?;

    let now = now_timestamp();
    let planned = PlannedTransaction {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        month: payload.month.trim().to_string(),
        kind: payload.kind,
        category: payload.category.trim().to_string(),
        amount: payload.amount,
        description: payload.description.trim().to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let conn = db.write().await;
    conn.execute(
        "INSERT INTO planned_transactions (id, user_id, month, type, category, amount, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            planned.id.as_str(),
            planned.user_id.as_str(),
            planned.month.as_str(),
            planned.kind.as_str(),
            planned.category.as_str(),
            planned.amount,
            planned.description.as_str(),
            planned.created_at.as_str(),
            planned.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("planned transaction creation failed"))?;

    Ok(planned)
}

pub async fn modify_planned(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &UpdatePlannedPayload,
) -> Result<(PlannedTransaction, PlannedTransaction), ApiError> {
    if payload.month.is_none()
        && payload.kind.is_none()
        && payload.category.is_none()
        && payload.amount.is_none()
        && payload.description.is_none()
    {
        return Err(bad_request(ERR_NO_UPDATE_FIELDS));
    }
    if let Some(month) = &payload.month {
        validate_month(month.trim())?;
    }
    if let Some(category) = &payload.category {
        validate_planned_category(category)?;
    }
    if let Some(amount) = payload.amount {
        validate_planned_amount(amount)?;
    }
    if let Some(description) = &payload.description {
        validate_planned_description(description)?;
    }

    let conn = db.write().await;
    let existing = find_planned(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Planned transaction"))?;

    let updated = PlannedTransaction {
        month: trimmed(&payload.month).unwrap_or_else(|| existing.month.clone()),
        kind: payload.kind.unwrap_or(existing.kind),
        category: trimmed(&payload.category).unwrap_or_else(|| existing.category.clone()),
        amount: payload.amount.unwrap_or(existing.amount),
        description: trimmed(&payload.description)
            .unwrap_or_else(|| existing.description.clone()),
        updated_at: now_timestamp(),
        ..existing.clone()
    };

    conn.execute(
        "UPDATE planned_transactions SET month = ?, type = ?, category = ?, amount = ?, description = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (
            updated.month.as_str(),
            updated.kind.as_str(),
            updated.category.as_str(),
            updated.amount,
            updated.description.as_str(),
            updated.updated_at.as_str(),
            id,
            user_id,
        ),
    )
    .await
    .map_err(db_failure("planned transaction update failed"))?;

    Ok((existing, updated))
}

pub async fn remove_planned(
    db: &Db,
    user_id: &str,
    id: &str,
) -> Result<PlannedTransaction, ApiError> {
    let conn = db.write().await;
    let existing = find_planned(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Planned transaction"))?;

    conn.execute(
        "DELETE FROM planned_transactions WHERE id = ? AND user_id = ?",
        (id, user_id),
    )
    .await
    .map_err(db_failure("planned transaction deletion failed"))?;

    Ok(existing)
}

pub async fn list_planned(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MonthQuery>,
) -> Result<(StatusCode, Json<Vec<PlannedTransaction>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let planned = query_planned(&db, &user.id, query.month.as_deref()).await?;
    Ok((StatusCode::OK, Json(planned)))
}

pub async fn create_planned(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreatePlannedPayload>,
) -> Result<(StatusCode, Json<PlannedTransaction>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let planned = insert_planned(&db, &user.id, &payload).await?;
    tracing::info!(user_id = %user.id, month = %planned.month, "planned transaction created");
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_PLANNED, &user.id, &planned));

    Ok((StatusCode::CREATED, Json(planned)))
}

pub async fn update_planned(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePlannedPayload>,
) -> Result<(StatusCode, Json<PlannedTransaction>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_planned(&db, &user.id, &id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::update(TABLE_PLANNED, &user.id, &before, &after));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_planned(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let removed = remove_planned(&db, &user.id, &id).await?;
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_PLANNED, &user.id, &removed));

    Ok(StatusCode::NO_CONTENT)
}

/// Planned income and expense per month, oldest month first.
pub async fn monthly_summary(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Vec<MonthlyPlannedTotals>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let planned = query_planned(&db, &user.id, None).await?;
    Ok((StatusCode::OK, Json(planned_totals_by_month(&planned))))
}
