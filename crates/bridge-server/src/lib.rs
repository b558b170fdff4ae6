//! Bridge Server - wallet, escrow and billing ledger
//!
//! This crate provides the ledger core (double-entry wallets, fee engine,
//! goods escrow and installment plans) and the REST API in front of it.

pub mod authz;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod routes;
pub mod store;

pub use error::AppError;
pub use ledger::{Ledger, LedgerError, LedgerSettings};
pub use routes::{create_router, AppState};
