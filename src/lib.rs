pub mod app;
pub mod auth;
pub mod balances;
pub mod budgets;
pub mod categories;
pub mod config;
pub mod constants;
pub mod currency;
pub mod database;
pub mod models;
pub mod planned;
pub mod realtime;
pub mod summary;
pub mod sync;
pub mod transactions;
pub mod utils;
