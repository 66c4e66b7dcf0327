//! `PostgreSQL` backends for warden.
//!
//! This crate provides `PostgreSQL` implementations of the core warden
//! traits:
//!
//! - [`Log`] - An implementation of [`warden_core::log::EventLog`] and
//!   [`warden_core::log::SubscribableLog`]
//! - [`Tables`] - An implementation of
//!   [`warden_core::projection::StatementExecutor`]
//!
//! Both use the same database and can share a connection pool.

mod config;
mod error;
mod log;
mod projection;

pub use config::DatabaseConfig;
pub use error::Error;
pub use log::Log;
pub use projection::Tables;
