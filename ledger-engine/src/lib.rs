//! Ledger Engine - double-entry bookkeeping with per-date balance snapshot propagation.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
pub mod store;

pub use engine::Ledger;
pub use error::LedgerError;
