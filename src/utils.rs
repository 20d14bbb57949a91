use axum::http::StatusCode;
use std::fmt::Display;
use time::{Date, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

use crate::constants::*;

pub type ApiError = (StatusCode, String);

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

pub fn db_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ERR_DATABASE_OPERATION.to_string(),
    )
}

pub fn db_error_with_context(context: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Database error: {}", context),
    )
}

/// Logs the underlying error and returns a generic 500 for the client.
pub fn db_failure<E: Display>(context: &'static str) -> impl FnOnce(E) -> ApiError {
    move |e| {
        tracing::error!(error = %e, context, "database operation failed");
        db_error_with_context(context)
    }
}

pub fn not_found(entity: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{} not found", entity))
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, message.into())
}

pub fn validate_string_length(
    value: &str,
    field_name: &str,
    max_length: usize,
) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} cannot be empty", field_name)));
    }
    validate_max_length(value, field_name, max_length)
}

/// Like `validate_string_length` but an empty value is accepted.
pub fn validate_max_length(
    value: &str,
    field_name: &str,
    max_length: usize,
) -> Result<(), ApiError> {
    if value.chars().count() > max_length {
        return Err(bad_request(format!(
            "{} must be less than {} characters",
            field_name, max_length
        )));
    }
    Ok(())
}

pub fn validate_positive_amount(amount: f64, field_name: &str) -> Result<(), ApiError> {
    if !amount.is_finite() {
        return Err(bad_request(format!("{} must be a finite number", field_name)));
    }
    if amount <= 0.0 {
        return Err(bad_request(format!("{} must be greater than zero", field_name)));
    }
    if amount > MAX_AMOUNT {
        return Err(bad_request(format!("{} cannot exceed {}", field_name, MAX_AMOUNT)));
    }
    Ok(())
}

/// Balances may be zero or negative (overdrawn accounts).
pub fn validate_finite_amount(amount: f64, field_name: &str) -> Result<(), ApiError> {
    if !amount.is_finite() {
        return Err(bad_request(format!("{} must be a finite number", field_name)));
    }
    if amount.abs() > MAX_AMOUNT {
        return Err(bad_request(format!("{} cannot exceed {}", field_name, MAX_AMOUNT)));
    }
    Ok(())
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn parse_date(value: &str) -> Option<Date> {
    let bytes = value.as_bytes();
    if value.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    if !all_digits(&value[0..4]) || !all_digits(&value[5..7]) || !all_digits(&value[8..10]) {
        return None;
    }
    Date::parse(value, DATE_FORMAT).ok()
}

pub fn validate_date(value: &str) -> Result<(), ApiError> {
    match parse_date(value) {
        Some(_) => Ok(()),
        None => Err(bad_request("Date must be a valid YYYY-MM-DD date")),
    }
}

/// Returns `(year, month)` for a `YYYY-MM` string.
pub fn parse_month(value: &str) -> Option<(i32, u8)> {
    if value.len() != 7 || value.as_bytes()[4] != b'-' {
        return None;
    }
    let (year, month) = (&value[0..4], &value[5..7]);
    if !all_digits(year) || !all_digits(month) {
        return None;
    }
    let month: u8 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year.parse().ok()?, month))
}

pub fn validate_month(value: &str) -> Result<(), ApiError> {
    match parse_month(value) {
        Some(_) => Ok(()),
        None => Err(bad_request("Month must use the YYYY-MM format")),
    }
}

pub fn format_month(year: i32, month: u8) -> String {
    format!("{:04}-{:02}", year, month)
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn current_month() -> String {
    let today = today();
    format_month(today.year(), u8::from(today.month()))
}

/// Resolves an optional `?month=` parameter, defaulting to the current UTC month.
pub fn month_or_current(month: Option<&str>) -> Result<String, ApiError> {
    match month {
        Some(m) => {
            validate_month(m)?;
            Ok(m.to_string())
        }
        None => Ok(current_month()),
    }
}

/// Fixed-width UTC timestamp so stored values sort lexically.
pub fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

pub fn validate_limit(limit: Option<u32>, default: u32) -> Result<u32, ApiError> {
    match limit {
        Some(0) => Err(bad_request("Limit must be greater than 0")),
        Some(l) if l > MAX_LIMIT => Err(bad_request(format!("Limit cannot exceed {}", MAX_LIMIT))),
        Some(l) => Ok(l),
        None => Ok(default),
    }
}

pub fn validate_transactions_limit(limit: Option<u32>) -> Result<u32, ApiError> {
    validate_limit(limit, DEFAULT_TRANSACTIONS_LIMIT)
}

pub fn validate_offset(offset: Option<u32>) -> Result<u32, ApiError> {
    match offset {
        Some(o) if o > MAX_OFFSET => Err(bad_request(format!("Offset cannot exceed {}", MAX_OFFSET))),
        Some(o) => Ok(o),
        None => Ok(0),
    }
}

/// Trimmed copy of an optional update field; `None` stays `None`.
pub fn trimmed(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|v| v.trim().to_string())
}
