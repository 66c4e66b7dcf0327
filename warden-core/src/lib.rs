//! Core traits and types for the warden event-sourced IAM core.
//!
//! - [`log`] - Event log contract (`EventLog`, `SubscribableLog`) and the in-memory log
//! - [`write_model`] - Command-side state replay (`WriteModel`, `Apply`, `Replay`)
//! - [`command`] - Command pipeline (`Intent`, `Pipeline`, `CommandError`)
//! - [`projection`] - Read-side materialization (`Projection`, `Reducers`, `Projector`)
//! - [`worker`] - Background projection workers
//! - [`event`] - Event types (`DomainEvent`, `EventSet`, `Event`)
//! - [`concurrency`] - Optimistic concurrency (`ExpectedSequence`)
//!
//! # Example
//!
//! ```
//! use warden_core::{command::Pipeline, log::inmemory};
//!
//! let pipeline = Pipeline::new(inmemory::Log::new());
//! ```
//!
//! Most users should depend on the `warden` crate, which re-exports these
//! types together with the identity-provider domain.

pub mod command;
pub mod concurrency;
pub mod config;
pub mod event;
pub mod log;
pub mod projection;
pub mod worker;
pub mod write_model;
