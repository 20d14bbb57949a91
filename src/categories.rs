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
use crate::models::{Category, CreateCategoryPayload, ListCategoriesQuery, UpdateCategoryPayload};
use crate::realtime::{ChangeEvent, TABLE_CATEGORIES};
use crate::utils::{
    ApiError, bad_request, db_error_with_context, db_failure, not_found, now_timestamp, trimmed,
    validate_max_length, validate_string_length,
};

const SELECT_COLUMNS: &str = "id, user_id, name, type, color, icon, created_at, updated_at";

pub fn validate_category_name(name: &str) -> Result<(), ApiError> {
    validate_string_length(name, "Category name", MAX_CATEGORY_NAME_LENGTH)
}

pub fn validate_category_color(color: &str) -> Result<(), ApiError> {
    validate_max_length(color, "Category color", MAX_COLOR_LENGTH)
}

pub fn validate_category_icon(icon: &str) -> Result<(), ApiError> {
    validate_max_length(icon, "Category icon", MAX_ICON_LENGTH)
}

pub fn extract_category_from_row(row: libsql::Row) -> Result<Category, ApiError> {
    let invalid = |_| db_error_with_context("invalid category data");
    let kind: String = row.get(3).map_err(invalid)?;

    Ok(Category {
        id: row.get(0).map_err(invalid)?,
        user_id: row.get(1).map_err(invalid)?,
        name: row.get(2).map_err(invalid)?,
        kind: kind
            .parse()
            .map_err(|_| db_error_with_context("invalid category type"))?,
        color: row.get(4).map_err(invalid)?,
        icon: row.get(5).map_err(invalid)?,
        created_at: row.get(6).map_err(invalid)?,
        updated_at: row.get(7).map_err(invalid)?,
    })
}

/// Case-insensitive name clash check, ignoring `exclude_id` when renaming.
async fn ensure_name_available(
    conn: &libsql::Connection,
    user_id: &str,
    name: &str,
    exclude_id: Option<&str>,
) -> Result<(), ApiError> {
    let mut rows = conn
        .query(
            "SELECT id FROM categories WHERE user_id = ? AND LOWER(name) = LOWER(?) AND id != ?",
            (user_id, name, exclude_id.unwrap_or("")),
        )
        .await
        .map_err(db_failure("failed to check existing category"))?;

    if rows
        .next()
        .await
        .map_err(db_failure("failed to read category row"))?
        .is_some()
    {
        return Err((
            StatusCode::CONFLICT,
            "Category name already exists (case-insensitive)".to_string(),
        ));
    }
    Ok(())
}

async fn find_category(
    conn: &libsql::Connection,
    user_id: &str,
    id: &str,
) -> Result<Option<Category>, ApiError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {} FROM categories WHERE id = ? AND user_id = ?",
                SELECT_COLUMNS
            ),
            (id, user_id),
        )
        .await
        .map_err(db_failure("failed to load category"))?;

    match rows
        .next()
        .await
        .map_err(db_failure("failed to read category row"))?
    {
        Some(row) => Ok(Some(extract_category_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn query_categories(
    db: &Db,
    user_id: &str,
    query: &ListCategoriesQuery,
) -> Result<Vec<Category>, ApiError> {
    let conn = db.read().await;
    let mut rows = match query.kind {
        Some(kind) => conn
            .query(
                &format!(
                    "SELECT {} FROM categories WHERE user_id = ? AND type IN (?, 'both') ORDER BY name ASC",
                    SELECT_COLUMNS
                ),
                (user_id, kind.as_str()),
            )
            .await,
        None => conn
            .query(
                &format!(
                    "SELECT {} FROM categories WHERE user_id = ? ORDER BY name ASC",
                    SELECT_COLUMNS
                ),
                [user_id],
            )
            .await,
    }
    .map_err(db_failure("failed to query categories"))?;

    let mut categories = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(db_failure("failed to read category row"))?
    {
        categories.push(extract_category_from_row(row)?);
    }
    Ok(categories)
}

pub async fn insert_category(
    db: &Db,
    user_id: &str,
    payload: &CreateCategoryPayload,
) -> Result<Category, ApiError> {
    validate_category_name(&payload.name)?;
    let color = trimmed(&payload.color)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string());
    let icon = trimmed(&payload.icon)
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY_ICON.to_string());
    validate_category_color(&color)?;
    validate_category_icon(&icon)?;

    let now = now_timestamp();
    let category = Category {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: payload.name.trim().to_string(),
        kind: payload.kind,
        color,
        icon,
        created_at: now.clone(),
        updated_at: now,
    };

    // Hold the write lock across check and insert
    let conn = db.write().await;
    ensure_name_available(&conn, user_id, &category.name, None).await?;

    conn.execute(
        "INSERT INTO categories (id, user_id, name, type, color, icon, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            category.id.as_str(),
            category.user_id.as_str(),
            category.name.as_str(),
            category.kind.as_str(),
            category.color.as_str(),
            category.icon.as_str(),
            category.created_at.as_str(),
            category.updated_at.as_str(),
        ),
    )
    .await
    .map_err(db_failure("category creation failed"))?;

    Ok(category)
}

pub async fn modify_category(
    db: &Db,
    user_id: &str,
    id: &str,
    payload: &UpdateCategoryPayload,
) -> Result<(Category, Category), ApiError> {
    if payload.name.is_none()
        && payload.kind.is_none()
        && payload.color.is_none()
        && payload.icon.is_none()
    {
        return Err(bad_request(ERR_NO_UPDATE_FIELDS));
    }
    if let Some(name) = &payload.name {
        validate_category_name(name)?;
    }
    if let Some(color) = &payload.color {
        validate_category_color(color.trim())?;
    }
    if let Some(icon) = &payload.icon {
        validate_category_icon(icon.trim())?;
    }

    let conn = db.write().await;
    let existing = find_category(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Category"))?;

    let updated = Category {
        name: trimmed(&payload.name).unwrap_or_else(|| existing.name.clone()),
        kind: payload.kind.unwrap_or(existing.kind),
        color: trimmed(&payload.color)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| existing.color.clone()),
        icon: trimmed(&payload.icon)
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| existing.icon.clone()),
        updated_at: now_timestamp(),
        ..existing.clone()
    };

    if payload.name.is_some() {
        ensure_name_available(&conn, user_id, &updated.name, Some(id)).await?;
    }

    conn.execute(
        "UPDATE categories SET name = ?, type = ?, color = ?, icon = ?, updated_at = ? WHERE id = ? AND user_id = ?",
        (
            updated.name.as_str(),
            updated.kind.as_str(),
            updated.color.as_str(),
            updated.icon.as_str(),
            updated.updated_at.as_str(),
            id,
            user_id,
        ),
    )
    .await
    .map_err(db_failure("category update failed"))?;

    Ok((existing, updated))
}

/// Transactions keep their category name after the category is deleted.
pub async fn remove_category(db: &Db, user_id: &str, id: &str) -> Result<Category, ApiError> {
    let conn = db.write().await;
    let existing = find_category(&conn, user_id, id)
        .await?
        .ok_or_else(|| not_found("Category"))?;

    conn.execute(
        "DELETE FROM categories WHERE id = ? AND user_id = ?",
        (id, user_id),
    )
    .await
    .map_err(db_failure("category deletion failed"))?;

    Ok(existing)
}

pub async fn list_categories(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ListCategoriesQuery>,
) -> Result<(StatusCode, Json<Vec<Category>>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let categories = query_categories(&db, &user.id, &query).await?;
    Ok((StatusCode::OK, Json(categories)))
}

pub async fn create_category(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<CreateCategoryPayload>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let category = insert_category(&db, &user.id, &payload).await?;
    tracing::info!(user_id = %user.id, category = %category.name, "category created");
    state
        .feed
        .publish(ChangeEvent::insert(TABLE_CATEGORIES, &user.id, &category));

    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    Json(payload): Json<UpdateCategoryPayload>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let (before, after) = modify_category(&db, &user.id, &id, &payload).await?;
    state
        .feed
        .publish(ChangeEvent::update(TABLE_CATEGORIES, &user.id, &before, &after));

    Ok((StatusCode::OK, Json(after)))
}

pub async fn delete_category(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = get_current_user(&session).await?;
    let db = state.user_db(&user.id).await?;

    let removed = remove_category(&db, &user.id, &id).await?;
    tracing::info!(user_id = %user.id, category = %removed.name, "category deleted");
    state
        .feed
        .publish(ChangeEvent::delete(TABLE_CATEGORIES, &user.id, &removed));

    Ok(StatusCode::NO_CONTENT)
}
