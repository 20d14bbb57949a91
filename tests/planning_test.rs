/*!
 * Budgets, Balances and Planned Transactions
 *
 * Integration tests for the planning side of the data model, including the
 * balance-category cascade and the planning summary computed from stored rows.
 */

mod common;

use axum::http::StatusCode;
use common::*;
use personal_finance::balances::{
    insert_balance, insert_balance_category, modify_balance, modify_balance_category, query_balances,
    remove_balance_category,
};
use personal_finance::budgets::{insert_budget, modify_budget, query_budgets, remove_budget};
use personal_finance::models::{
    BalanceCategoryPayload, CreateBalancePayload, CreateBudgetPayload, CreatePlannedPayload,
    TransactionType, UpdateBalancePayload, UpdateBudgetPayload, UpdatePlannedPayload,
};
use personal_finance::planned::{insert_planned, modify_planned, query_planned, remove_planned};
use personal_finance::summary::{balance_total, planned_totals_by_month, planning_summary};
use personal_finance::transactions::all_transactions;

fn budget_payload(category: &str, amount: f64, month: &str) -> CreateBudgetPayload {
    CreateBudgetPayload {
        category: category.to_string(),
        amount,
        month: month.to_string(),
    }
}

fn planned_payload(kind: TransactionType, amount: f64, month: &str) -> CreatePlannedPayload {
    CreatePlannedPayload {
        month: month.to_string(),
        kind,
        category: "Rent".to_string(),
        amount,
        description: String::new(),
    }
}

#[tokio::test]
async fn budgets_filter_by_month() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    insert_budget(&db, &user_id, &budget_payload("Food", 300.0, "2024-03")).await.unwrap();
    insert_budget(&db, &user_id, &budget_payload("Fun", 100.0, "2024-03")).await.unwrap();
    insert_budget(&db, &user_id, &budget_payload("Food", 250.0, "2024-04")).await.unwrap();

    assert_eq!(query_budgets(&db, &user_id, Some("2024-03")).await.unwrap().len(), 2);
    assert_eq!(query_budgets(&db, &user_id, None).await.unwrap().len(), 3);

    let (status, _) = query_budgets(&db, &user_id, Some("March")).await.unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn budget_validation_and_updates() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let (status, _) = insert_budget(&db, &user_id, &budget_payload("Food", 0.0, "2024-03"))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = insert_budget(&db, &user_id, &budget_payload("Food", 10.0, "2024-3"))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let budget = insert_budget(&db, &user_id, &budget_payload("Food", 300.0, "2024-03"))
        .await
        .unwrap();
    let patch = UpdateBudgetPayload {
        month: Some("2024-05".to_string()),
        ..Default::default()
    };
    let (_, after) = modify_budget(&db, &user_id, &budget.id, &patch).await.unwrap();
    assert_eq!(after.month, "2024-05");
    assert_eq!(after.amount, 300.0);

    remove_budget(&db, &user_id, &budget.id).await.unwrap();
    assert!(query_budgets(&db, &user_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn balances_join_their_category() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let savings = insert_balance_category(
        &db,
        &user_id,
        &BalanceCategoryPayload {
            name: "Savings".to_string(),
        },
    )
    .await
    .unwrap();

    let balance = insert_balance(
        &db,
        &user_id,
        &CreateBalancePayload {
            category_id: savings.id.clone(),
            amount: -25.0,
        },
    )
    .await
    .unwrap();
    assert_eq!(balance.category.as_ref().unwrap().name, "Savings");

    modify_balance_category(
        &db,
        &user_id,
        &savings.id,
        &BalanceCategoryPayload {
            name: "Emergency fund".to_string(),
        },
    )
    .await
    .unwrap();

    let balances = query_balances(&db, &user_id).await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].category.as_ref().unwrap().name, "Emergency fund");

    let patch = UpdateBalancePayload {
        amount: Some(125.0),
        ..Default::default()
    };
    modify_balance(&db, &user_id, &balance.id, &patch).await.unwrap();
    assert_eq!(balance_total(&query_balances(&db, &user_id).await.unwrap()), 125.0);
}

#[tokio::test]
async fn balance_requires_existing_category() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let (status, _) = insert_balance(
        &db,
        &user_id,
        &CreateBalancePayload {
            category_id: "missing".to_string(),
            amount: 10.0,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_balance_category_cascades() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    let cash = insert_balance_category(&db, &user_id, &BalanceCategoryPayload { name: "Cash".to_string() })
        .await
        .unwrap();
    let bank = insert_balance_category(&db, &user_id, &BalanceCategoryPayload { name: "Bank".to_string() })
        .await
        .unwrap();
    for (category, amount) in [(&cash, 10.0), (&cash, 20.0), (&bank, 500.0)] {
        insert_balance(
            &db,
            &user_id,
            &CreateBalancePayload {
                category_id: category.id.clone(),
                amount,
            },
        )
        .await
        .unwrap();
    }

    let (removed_category, removed) = remove_balance_category(&db, &user_id, &cash.id).await.unwrap();
    assert_eq!(removed_category.id, cash.id);
    assert_eq!(removed.len(), 2);

    let remaining = query_balances(&db, &user_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].category_id, bank.id);

    let duplicate = insert_balance_category(&db, &user_id, &BalanceCategoryPayload { name: "BANK".to_string() })
        .await
        .unwrap_err();
    assert_eq!(duplicate.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn planned_transactions_group_by_month() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    insert_planned(&db, &user_id, &planned_payload(TransactionType::Expense, 400.0, "2024-04")).await.unwrap();
    insert_planned(&db, &user_id, &planned_payload(TransactionType::Income, 900.0, "2024-03")).await.unwrap();
    let rent = insert_planned(&db, &user_id, &planned_payload(TransactionType::Expense, 500.0, "2024-03"))
        .await
        .unwrap();

    let march = query_planned(&db, &user_id, Some("2024-03")).await.unwrap();
    assert_eq!(march.len(), 2);

    let patch = UpdatePlannedPayload {
        amount: Some(550.0),
        ..Default::default()
    };
    modify_planned(&db, &user_id, &rent.id, &patch).await.unwrap();

    let all = query_planned(&db, &user_id, None).await.unwrap();
    let monthly = planned_totals_by_month(&all);
    assert_eq!(monthly.len(), 2);
    assert_eq!(monthly[0].month, "2024-03");
    assert_eq!(monthly[0].income, 900.0);
    assert_eq!(monthly[0].expense, 550.0);
    assert_eq!(monthly[1].expense, 400.0);

    remove_planned(&db, &user_id, &rent.id).await.unwrap();
    assert_eq!(query_planned(&db, &user_id, Some("2024-03")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn planning_summary_from_stored_rows() {
    let (data_path, user_id, _dir) = setup_test_environment().await;
    let db = open_user_db(&data_path, &user_id).await;

    insert_budget(&db, &user_id, &budget_payload("Food", 600.0, "2024-03")).await.unwrap();
    insert_budget(&db, &user_id, &budget_payload("Rent", 400.0, "2024-03")).await.unwrap();
    create_test_transaction(&db, &user_id, TransactionType::Income, 2000.0, "Salary", "2024-03-01").await;
    create_test_transaction(&db, &user_id, TransactionType::Expense, 300.0, "Food", "2024-03-05").await;
    create_test_transaction(&db, &user_id, TransactionType::Expense, 99.0, "Food", "2024-02-05").await;
    insert_planned(&db, &user_id, &planned_payload(TransactionType::Expense, 200.0, "2024-03")).await.unwrap();

    let budgets = query_budgets(&db, &user_id, None).await.unwrap();
    let transactions = all_transactions(&db, &user_id).await.unwrap();
    let planned = query_planned(&db, &user_id, None).await.unwrap();

    let summary = planning_summary("2024-03", &budgets, &transactions, &planned);
    assert_eq!(summary.total_budget, 1000.0);
    assert_eq!(summary.real_expenses, 300.0);
    assert_eq!(summary.planned_expenses, 200.0);
    assert_eq!(summary.total_income, 2000.0);
    assert_eq!(summary.available, 1500.0);
    assert_eq!(summary.budget_usage_percentage, 50.0);
}
