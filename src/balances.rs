use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use libsql::Value;
use serde::Serialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::get_current_user;
use crate::constants::*;
use crate::database::Db;
use crate::models::{
    Balance, BalanceCategory, BalanceCategoryPayload, BalanceCategoryRef, CreateBalancePayload,
    UpdateBalancePayload,
};
use crate::realtime::{ChangeEvent, TABLE_BALANCE_CATEGORIES, TABLE_BALANCES};
use crate::summary::balance_total;
use crate::utils::{
    ApiError, bad_request, db_error_with_context, db_failure, not_found, now_timestamp,
    validate_finite_amount, validate_string_length,
};

const CATEGORY_COLUMNS: &str = "id, user_id, name, created_at, updated_at";
const BALANCE_SELECT: &str = "SELECT b.id, b.user_id, b.category_id, b.amount, b.created_at, b.updated_at, c.id, c.name FROM balances b LEFT JOIN balance_categories c ON c.id = b.category_id";

pub fn validate_balance_category_name(name: &str) -> Result<(), ApiError> {
    validate_string_length(name, "Balance category name", MAX_CATEGORY_NAME_LENGTH)
}

pub fn validate_balance_amount(amount: f64) -> Result<(), ApiError> {
    validate_finite_amount(amount, "Balance amount")
}

pub fn extract_balance_category_from_row(row: libsql::Row) -> Result<BalanceCategory, ApiError> {
    let invalid = |_| db_error_with_context("invalid balance category data");

    Ok(BalanceCategory {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        name: row.get(2).map_err(invalid)?,
        created_at: row.get(3).map_err(invalid)?,
        updated_at: row.get(4).map_err(invalid)?,
    })
}

fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, ApiError> {
    match row
        .get_value(idx)
        .map_err(|_| db_error_with_context("invalid balance data"))?
    {
        Value::Text(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

/// Reads a balance row joined with its (possibly missing) category.
pub fn extract_balance_from_row(row: libsql::Row) -> Result<Balance, ApiError> {
    let invalid = |_| db_error_with_context("invalid balance data");
    let category = match (optional_text(&row, 6)?, optional_text(&row, 7)?) {
        (Some(id), Some(name)) => Some(BalanceCategoryRef { id, name }),
        _ => None,
    };

    Ok(Balance {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        category_id: row.get(2).map_err(invalid)?,
        amount: row.get(3).map_err(invalid)?,
        created_at: row.get(4).map_err(invalid)?,
        updated_at: row.get(5).map_err(invalid)?,
        category,
    })
}

async fn find_balance_category(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<BalanceCategory>, ApiError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM balance_categories WHERE id = ? AND user_id = ?",
                CATEGORY_COLUMNS
            ),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load balance category"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read balance category row"))?
    {
        Some(row) => Ok(Some(extract_balance_category_from_row(row)?)),
        None => Ok(None),
    }
}

async fn ensure_balance_category_name_available(
    conn: &libsql::Connection,
    user_id: &str,
    name: &str,
    exclude_id: Option<&str>,
) -> Result<(), ApiError> {
    let mut rows = conn
        .query(
            "SELECT id FROM balance_categories WHERE user_id = ? AND LOWER(name) = LOWER(?) AND id != ?",
            (user_id, name, exclude_id.unwrap_or("")),
        )
        .await
        .map_err(db_failure("failed to check existing balance category"))?;

    if rows
        .next()
        .await
        .map_err(db_failure("failed to read balance category row"))?
        .is_some()
    {
        return Err((
            StatusCode::CONFLICT,
            "Balance category name already exists (case-insensitive)".to_string(),
        ));
    }
    Ok(())
}

async fn find_balance(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Balance>, ApiError> {
    let mut rows = conn
        .query(
            &format!("{} WHERE b.id = ? AND b.user_id = ?", BALANCE_SELECT),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load balance"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read balance row"))?
    {
        Some(row) => Ok(Some(extract_balance_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn query_balance_categories(db: &Db, user_id: &str) -> Result<Vec<BalanceCategory>, ApiError> {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM balance_categories WHERE user_id = ? ORDER BY name ASC",
                CATEGORY_COLUMNS
            ),
            [user_id],
        )
        .await
        .map_err(db_failure("failed to query balance categories"))?;

    let mut categories = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read balance category row"))?
    {
        categories.push(extract_balance_category_from_row(row)?);
    }
    Ok(categories)
}

pub async fn insert_balance_category(
    db: &Db,
    user_id: &str,
    payload: &BalanceCategoryPayload,
) -> Result<BalanceCategory, ApiError> {
    validate_balance_category_name(&payload.name)?;

    let now = now_timestamp();
    let category = BalanceCategory {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: payload.name.trim().to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let conn = db.write().await;
    ensure_balance_category_name_available(&conn, user_id, &category.name, None).await?;
    conn.execute(
        "INSERT INTO balance_categories (id, user_id, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        (
            category.id.as_str(),
            category.user_id.as_str(),
            category.name.as_str(),
            category.created_at.as_str(),
            category.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("balance category creation failed"))?;

    Ok(category)
}

pub async fn modify_balance_category(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &BalanceCategoryPayload,
) -> Result<(BalanceCategory, BalanceCategory), ApiError> {
    validate_balance_category_name(&payload.name)?;

    let conn = db.write().await;
    let existing = find_balance_category(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Balance category"))?;
    let updated = BalanceCategory {
        name: payload.name.trim().to_string(),
        updated_at: now_timestamp(),
        ..existing.clone()
    };
    ensure_balance_category_name_available(&conn, user_id, &updated.name, Some(id)).await?;

    conn.execute(
        "UPDATE balance_categories SET name = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (updated.name.as_str(), updated.updated_at.as_str(), id, user_id),
    )
    .await
    .map_err(db_failure("balance category update failed"))?;

    Ok((existing, updated))
}

/// Deletes the category together with every balance recorded against it.
pub async fn remove_balance_category(
    db: &Db,
    user_id: &str,
    id: &str,
) -> Result<(BalanceCategory, Vec<Balance>), ApiError> {
    let conn = db.write().await;
    let existing = find_balance_category(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Balance category"))?;

    let mut rows = conn
        .query(
            &format!("{} WHERE b.category_id = ? AND b.user_id = ?", BALANCE_SELECT),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load category balances"))?;
    let mut removed = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read balance row"))?
    {
        removed.push(extract_balance_from_row(row)?);
    }
    drop(rows);

    let tx = conn
        .transaction()
        .await
        .map_err(db_failure("failed to start transaction"))?;
    tx.execute(
        "DELETE FROM balances WHERE category_id = ? AND user_id = ?",
        (id, user_id),
    )
    .await
    .map_err(db_failure("balance deletion failed"))?;
    tx.execute(
        "DELETE FROM balance_categories WHERE id = ? AND user_id = ?",
        (id, user_id),
    )
    .await
    .map_err(db_failure("balance category deletion failed"))?;
    tx.commit()
        .await
        .map_err(db_failure("failed to commit balance category deletion"))?;

    Ok((existing, removed))
}

pub async fn query_balances(db: &Db, user_id: &str) -> Result<Vec<Balance>, ApiError> {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            &format!("{} WHERE b.user_id = ? ORDER BY b.created_at ASC", BALANCE_SELECT),
            [user_id],
        )
        .await
        .map_err(db_failure("failed to query balances"))?;

    let mut balances = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read balance row"))?
    {
        balances.push(extract_balance_from_row(row)?);
    }
    Ok(balances)
}

pub async fn insert_balance(
    db: &Db,
    user_id: &str,
    payload: &CreateBalancePayload,
) -> Result<Balance, ApiError> {
    validate_balance_amount(payload.amount)?;
    let category_id = payload.category_id.trim();
    if category_id.is_empty() {
        return Err(bad_request("Balance category id cannot be empty"));
    }

    let conn = db.write().await;
    let category = find_balance_category(&conn, user_id, category_id)
        .await?
        .ok_or_else(|| bad_request("Balance category does not exist"))?;

    let now = now_timestamp();
    let balance = Balance {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        category_id: category.id.clone(),
        amount: payload.amount,
        created_at: now.clone(),
        updated_at: now,
        category: Some(BalanceCategoryRef {
            id: category.id,
            name: category.name,
        }),
    };

    conn.execute(
        "INSERT INTO balances (id, user_id, category_id, amount, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        (
            balance.id.as_str(),
            balance.user_id.as_str(),
            balance.category_id.as_str(),
            balance.amount,
            balance.created_at.as_str(),
            balance.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("balance creation failed"))?;

    Ok(balance)
}

pub async fn modify_balance(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &UpdateBalancePayload,
) -> Result<(Balance, Balance), ApiError> {
    if payload.category_id.is_none() && payload.amount.is_none() {
        return Err(bad_request(ERR_NO_UPDATE_FIELDS));
    }
    if let Some(amount) = payload.amount {
        validate_balance_amount(amount)?;
    }

    let conn = db.write().await;
    let existing = find_balance(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Balance"))?;

    let (category_id, category) = match payload.category_id.as_deref().map(str::trim) {
        Some(category_id) => {
            let found = find_balance_category(&conn, user_id, category_id)
                .await?
                .ok_or_else(|| bad_request("Balance category does not exist"))?;
            (
                found.id.clone(),
                Some(BalanceCategoryRef {
                    id: found.id,
                    name: found.name,
                }),
            )
        }
        None => (existing.category_id.clone(), existing.category.clone()),
    };

    let updated = Balance {
        category_id,
        category,
        amount: payload.amount.unwrap_or(existing.amount),
        updated_at: now_timestamp(),
        ..existing.clone()
    };

    conn.execute(
        "UPDATE balances SET category_id = ?, amount = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (
            updated.category_id.as_str(),
            updated.amount,
            updated.updated_at.as_str(),
            id,
            user_id,
        ),
    )
    .await
    .map_err(db_failure("balance update failed"))?;

    Ok((existing, updated))
}

pub async fn remove_balance(db: &Db, user_id: &str, id: &str) -> Result<Balance, ApiError> {
    let conn = db.write().await;
    let existing = find_balance(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Balance"))?;

    conn.execute("DELETE FROM balances WHERE id = ? AND user_id = ?", (id, user_id))
        .await
        .map_err(db_failure("balance deletion failed"))?;

    Ok(existing)
}

pub async fn list_balance_categories(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Vec<BalanceCategory>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let categories = query_balance_categories(&db, &user.id).await?;
    Ok((StatusCode::OK, Json(categories)))
}

pub async fn create_balance_category(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<BalanceCategoryPayload>,
) -> Result<(StatusCode, Json<BalanceCategory>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let category = insert_balance_category(&db, &user.id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_BALANCE_CATEGORIES, &user.id, &category));

    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn rename_balance_category(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<BalanceCategoryPayload>,
) -> Result<(StatusCode, Json<BalanceCategory>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_balance_category(&db, &user.id, &id, &payload).await?;
    state.feed.publish(ChangeEvent::update(
        TABLE_BALANCE_CATEGORIES,
        &user.id,
        &before,
        &after,
    ));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_balance_category(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (category, balances) = remove_balance_category(&db, &user.id, &id).await?;
    tracing::info!(
        user_id = %user.id,
        category = %category.name,
        balances = balances.len(),
        "balance category deleted"
    );
    for balance in &balances {
        state
            .feed
            .publish(ChangeEvent::delete(TABLE_BALANCES, &user.id, balance));
    }
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_BALANCE_CATEGORIES, &user.id, &category));

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_balances(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<Vec<Balance>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let balances = query_balances(&db, &user.id).await?;
    Ok((StatusCode::OK, Json(balances)))
}

pub async fn create_balance(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateBalancePayload>,
) -> Result<(StatusCode, Json<Balance>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let balance = insert_balance(&db, &user.id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_BALANCES, &user.id, &balance));

    Ok((StatusCode::CREATED, Json(balance)))
}

pub async fn update_balance(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<UpdateBalancePayload>,
) -> Result<(StatusCode, Json<Balance>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_balance(&db, &user.id, &id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::update(TABLE_BALANCES, &user.id, &before, &after));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_balance(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let removed = remove_balance(&db, &user.id, &id).await?;
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_BALANCES, &user.id, &removed));

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Debug)]
pub struct BalanceTotalResponse {
    pub total: f64,
    pub accounts: usize,
}

pub async fn balance_total_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<BalanceTotalResponse>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let balances = query_balances(&db, &user.id).await?;
    Ok((
        StatusCode::OK,
        Json(BalanceTotalResponse {
            total: balance_total(&balances),
            accounts: balances.len(),
        }),
    ))
}
