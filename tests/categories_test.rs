use axum::http::StatusCode;
use personal_finance::categories::{
    insert_category, modify_category, query_categories, remove_category, validate_category_name,
};
use personal_finance::constants::{DEFAULT_CATEGORY_COLOR, DEFAULT_CATEGORY_ICON};
use personal_finance::models::{
    CategoryType, CreateCategoryPayload, ListCategoriesQuery, TransactionType, UpdateCategoryPayload,
};
use personal_finance::transactions::all_transactions;

mod common;
use common::*;

fn category_payload(name: &str, kind: CategoryType) -> CreateCategoryPayload {
    CreateCategoryPayload {
        name: name.to_string(),
        kind,
        color: None,
        icon: None,
    }
}

#[tokio::test]
async fn create_applies_defaults_and_trims() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let category = insert_category(&db, &user_id, &category_payload("  Groceries ", CategoryType::Expense))
        .await
        .unwrap();
    assert_eq!(category.name, "Groceries");
    assert_eq!(category.color, DEFAULT_CATEGORY_COLOR);
    assert_eq!(category.icon, DEFAULT_CATEGORY_ICON);
    assert_eq!(category.user_id, user_id);
}

#[tokio::test]
async fn names_are_unique_case_insensitively() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    insert_category(&db, &user_id, &category_payload("Food", CategoryType::Expense))
        .await
        .unwrap();
    let (status, _) = insert_category(&db, &user_id, &category_payload("FOOD", CategoryType::Income))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);

    // Another user may reuse the name
    insert_category(&db, "other-user", &category_payload("food", CategoryType::Expense))
        .await
        .unwrap();
}

#[tokio::test]
async fn rename_to_own_name_with_different_case_is_allowed() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let food = insert_category(&db, &user_id, &category_payload("Food", CategoryType::Expense))
        .await
        .unwrap();
    insert_category(&db, &user_id, &category_payload("Rent", CategoryType::Expense))
        .await
        .unwrap();

    let recase = UpdateCategoryPayload {
        name: Some("FOOD".to_string()),
        ..Default::default()
    };
    let (_, after) = modify_category(&db, &user_id, &food.id, &recase).await.unwrap();
    assert_eq!(after.name, "FOOD");

    let clash = UpdateCategoryPayload {
        name: Some("rent".to_string()),
        ..Default::default()
    };
    let (status, _) = modify_category(&db, &user_id, &food.id, &clash).await.unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn type_filter_includes_both() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    for (name, kind) in [
        ("Salary", CategoryType::Income),
        ("Food", CategoryType::Expense),
        ("Transfers", CategoryType::Both),
    ] {
        insert_category(&db, &user_id, &category_payload(name, kind)).await.unwrap();
    }

    let expense = ListCategoriesQuery {
        kind: Some(TransactionType::Expense),
    };
    let names: Vec<String> = query_categories(&db, &user_id, &expense)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Food".to_string(), "Transfers".to_string()]);

    let all = query_categories(&db, &user_id, &ListCategoriesQuery::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn deleting_a_category_keeps_transactions() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let food = insert_category(&db, &user_id, &category_payload("Food", CategoryType::Expense))
        .await
        .unwrap();
    create_test_transaction(&db, &user_id, TransactionType::Expense, 12.0, "Food", "2024-03-01").await;

    remove_category(&db, &user_id, &food.id).await.unwrap();
    let transactions = all_transactions(&db, &user_id).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].category, "Food");

    let (status, _) = remove_category(&db, &user_id, &food.id).await.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn category_name_validation() {
    assert!(validate_category_name("Food").is_ok());
    assert!(validate_category_name("").is_err());
    assert!(validate_category_name("   ").is_err());
    assert!(validate_category_name(&"x".repeat(101)).is_err());
    assert!(validate_category_name(&"x".repeat(100)).is_ok());
}
