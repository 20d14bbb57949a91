use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use libsql::{Value, params::Params};
use tower_sessions::Session;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::get_current_user;
use crate::constants::*;
use crate::database::Db;
use crate::models::{
    CreateTransactionPayload, ListTransactionsQuery, ListTransactionsResponse, Transaction,
    UpdateTransactionPayload,
};
use crate::realtime::{ChangeEvent, TABLE_TRANSACTIONS};
use crate::utils::{
    ApiError, bad_request, db_error_with_context, db_failure, not_found, now_timestamp, trimmed,
    validate_date, validate_max_length, validate_month, validate_offset, validate_positive_amount,
    validate_string_length, validate_transactions_limit,
};

const SELECT_COLUMNS: &str =
    "id, user_id, type, amount, category, description, date, created_at, updated_at";

pub fn validate_transaction_amount(amount: f64) -> Result<(), ApiError> {
    validate_positive_amount(amount, "Transaction amount")
}

pub fn validate_transaction_category(category: &str) -> Result<(), ApiError> {
    validate_string_length(category, "Category", MAX_CATEGORY_NAME_LENGTH)
}

pub fn validate_transaction_description(description: &str) -> Result<(), ApiError> {
    validate_max_length(description, "Description", MAX_DESCRIPTION_LENGTH)
}

pub fn validate_create_transaction(payload: &CreateTransactionPayload) -> Result<(), ApiError> {
    validate_transaction_amount(payload.amount)?;
    validate_transaction_category(&payload.category)?;
    validate_transaction_description(&payload.description)?;
    validate_date(payload.date.trim())
}

pub fn validate_update_transaction(payload: &UpdateTransactionPayload) -> Result<(), ApiError> {
    if payload.kind.is_none()
        && payload.amount.is_none()
        && payload.category.is_none()
        && payload.description.is_none()
        && payload.date.is_none()
    {
        return Err(bad_request(ERR_NO_UPDATE_FIELDS));
    }
    if let Some(amount) = payload.amount {
        validate_transaction_amount(amount)?;
    }
    if let Some(category) = &payload.category {
        validate_transaction_category(category)?;
    }
    if let Some(description) = &payload.description {
        validate_transaction_description(description)?;
    }
    if let Some(date) = &payload.date {
        validate_date(date.trim())?;
    }
    Ok(())
}

pub fn extract_transaction_from_row(row: libsql::Row) -> Result<Transaction, ApiError> {
    let invalid = |_| db_error_with_context("invalid transaction data");
    let kind: String = row.get(2).map_err(invalid)?;

    Ok(Transaction {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        kind: kind
            .parse()
            .map_err(|_| db_error_with_context("invalid transaction type"))?,
        amount: row.get(3).map_err(invalid)?,
        category: row.get(4).map_err(invalid)?,
        description: row.get(5).map_err(invalid)?,
        date: row.get(6).map_err(invalid)?,
        created_at: row.get(7).map_err(invalid)?,
        updated_at: row.get(8).map_err(invalid)?,
    })
}

/// Builds the shared WHERE clause for listing and counting.
fn filter_clause(user_id: &str, query: &ListTransactionsQuery) -> Result<(String, Vec<Value>), ApiError> {
    let mut clause = String::from("WHERE user_id = ?");
    let mut values = vec![Value::Text(user_id.to_string())];

    if let Some(kind) = query.kind {
        clause.push_str(" AND type = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        clause.push_str(" AND category = ?");
        values.push(Value::Text(category.to_string()));
    }
    if let Some(month) = &query.month {
        validate_month(month)?;
        clause.push_str(" AND substr(date, 1, 7) = ?");
        values.push(Value::Text(month.clone()));
    }
    if let Some(start) = &query.start_date {
        validate_date(start)?;
        clause.push_str(" AND date >= ?");
        values.push(Value::Text(start.clone()));
    }
    if let Some(end) = &query.end_date {
        validate_date(end)?;
        clause.push_str(" AND date <= ?");
        values.push(Value::Text(end.clone()));
    }
    if let (Some(start), Some(end)) = (&query.start_date, &query.end_date) {
        if start > end {
            return Err(bad_request("start_date cannot be after end_date"));
        }
    }

    Ok((clause, values))
}

pub async fn query_transactions(
    db: &Db,
    user_id: &str,
    query: &ListTransactionsQuery,
) -> Result<ListTransactionsResponse, ApiError> {
    let limit = validate_transactions_limit(query.limit)?;
    let offset = validate_offset(query.offset)?;
    let (clause, values) = filter_clause(user_id, query)?;

    let conn = db.read().await;

    let mut count_rows = conn
        .query(
            &format!("SELECT COUNT(*) FROM transactions {}", clause),
            Params::Positional(values.clone()),
        )
        .await
        .map_err(db_failure("failed to count transactions"))?;
    let total_count: u32 = match count_rows
        .next()
        .await
        .map_err(db_failure("failed to read count row"))?
    {
        Some(row) => row.get(0).map_err(db_failure("failed to read count value"))?,
        None => 0,
    };

    let mut list_values = values;
    list_values.push(Value::Integer(i64::from(limit)));
    list_values.push(Value::Integer(i64::from(offset)));
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM transactions {} ORDER BY date DESC, created_at DESC, id DESC LIMIT ? OFFSET ?",
                SELECT_COLUMNS, clause
            ),
            Params::Positional(list_values),
        )
        .await
        .map_err(db_failure("failed to query transactions"))?;

    let mut transactions = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read transaction row"))?
    {
        transactions.push(extract_transaction_from_row(row)?);
    }

    Ok(ListTransactionsResponse {
        transactions,
        total_count,
    })
}

/// Every transaction of the user, newest first; used by the aggregation views.
pub async fn all_transactions(db: &Db, user_id: &str) -> Result<Vec<Transaction>, ApiError> {
    let conn = db.read().await;
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM transactions WHERE user_id = ? ORDER BY date DESC, created_at DESC, id DESC",
                SELECT_COLUMNS
            ),
            [user_id],
        )
        .await
        .map_err(db_failure("failed to query transactions"))?;

    let mut transactions = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read transaction row"))?
    {
        transactions.push(extract_transaction_from_row(row)?);
    }
    Ok(transactions)
}

async fn find_transaction(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Transaction>, ApiError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM transactions WHERE id = ? AND user_id = ?",
                SELECT_COLUMNS
            ),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load transaction"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read transaction row"))?
    {
        Some(row) => Ok(Some(extract_transaction_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn get_transaction(
    db: &Db,
    user_id: &str,
    id: &str,
) -> Result<Option<Transaction>, ApiError> {
    let conn = db.read().await;
    find_transaction(&conn, user_id, id).await
}

pub async fn insert_transaction(
    db: &Db,
    user_id: &str,
    payload: &CreateTransactionPayload,
) -> Result<Transaction, ApiError> {
    validate_create_transaction(payload)?;

    let now = now_timestamp();
    let transaction = Transaction {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        kind: payload.kind,
        amount: payload.amount,
        category: payload.category.trim().to_string(),
        description: payload.description.trim().to_string(),
        date: payload.date.trim().to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    let conn = db.write().await;
    conn.execute(
        "INSERT INTO transactions (id, user_id, type, amount, category, description, date, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            transaction.id.as_str(),
            transaction.user_id.as_str(),
            transaction.kind.as_str(),
            transaction.amount,
            transaction.category.as_str(),
            transaction.description.as_str(),
            transaction.date.as_str(),
            transaction.created_at.as_str(),
            transaction.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("transaction creation failed"))?;

    Ok(transaction)
}

/// Applies a partial update, returning `(before, after)`.
pub async fn modify_transaction(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &UpdateTransactionPayload,
) -> Result<(Transaction, Transaction), ApiError> {
    validate_update_transaction(payload)?;

    let conn = db.write().await;
    let existing = find_transaction(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Transaction"))?;

    let updated = Transaction {
        kind: payload.kind.unwrap_or(existing.kind),
        amount: payload.amount.unwrap_or(existing.amount),
        category: trimmed(&payload.category).unwrap_or_else(|| existing.category.clone()),
        description: trimmed(&payload.description)
            .unwrap_or_else(|| existing.description.clone()),
        date: trimmed(&payload.date).unwrap_or_else(|| existing.date.clone()),
        updated_at: now_timestamp(),
        ..existing.clone()
    };

    conn.execute(
        "UPDATE transactions SET type = ?, amount = ?, category = ?, description = ?, date = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (
            updated.kind.as_str(),
            updated.amount,
            updated.category.as_str(),
            updated.description.as_str(),
            updated.date.as_str(),
            updated.updated_at.as_str(),
            id,
            user_id,
        ),
    )
    .await
    .map_err(db_failure("transaction update failed"))?;

    Ok((existing, updated))
}

pub async fn remove_transaction(db: &Db, user_id: &str, id: &str) -> Result<Transaction, ApiError> {
    let conn = db.write().await;
    let existing = find_transaction(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Transaction"))?;

    conn.execute(
        "DELETE FROM transactions WHERE id = ? AND user_id = ?",
        (id, user_id),
    )
    .await
    .map_err(db_failure("transaction deletion failed"))?;

    Ok(existing)
}

pub async fn list_transactions(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<(StatusCode, Json<ListTransactionsResponse>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let response = query_transactions(&db, &user.id, &query).await?;
    Ok((StatusCode::OK, Json(response)))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateTransactionPayload>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let transaction = insert_transaction(&db, &user.id, &payload).await?;
    tracing::info!(
        user_id = %user.id,
        transaction_id = %transaction.id,
        kind = %transaction.kind,
        "transaction created"
    );
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_TRANSACTIONS, &user.id, &transaction));

    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTransactionPayload>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_transaction(&db, &user.id, &id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::update(TABLE_TRANSACTIONS, &user.id, &before, &after));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let removed = remove_transaction(&db, &user.id, &id).await?;
    tracing::info!(user_id = %user.id, transaction_id = %id, "transaction deleted");
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_TRANSACTIONS, &user.id, &removed));

    Ok(StatusCode::NO_CONTENT)
}
