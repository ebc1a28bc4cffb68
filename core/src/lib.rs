//! Core library for Panel, a side-by-side multi-model chat aggregator.
//!
//! Each module is intentionally kept lightweight so that the boundaries
//! between responsibilities remain obvious when exploring the codebase:
//! - [`accounts`] models subscription tiers and the expiry sweep.
//! - [`api`] exposes the request-handler surface the web layer invokes.
//! - [`catalog`] owns the model catalog records and lookups.
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`dispatch`] fans a message out to the selected models concurrently.
//! - [`errors`] keeps the central error catalogue with human friendly metadata.
//! - [`logging`] writes structured diagnostics to the event log table.
//! - [`provider`] calls the hosted completion endpoint.
//! - [`resolver`] maps client-supplied model ids to catalog records.
//! - [`settings`] reads and writes the global system settings.
//! - [`store`] persists chat sessions and conversation turns.
//! - [`turn`] assembles dispatch outcomes into conversation turns.
//! - [`workers`] implements synchronous background jobs such as the
//!   subscription sweep.

pub mod accounts;
pub mod api;
pub mod catalog;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod provider;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod turn;
pub mod workers;
