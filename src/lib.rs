#![doc = include_str!("../README.md")]

// Derive output refers to `::warden::...`, which must also resolve inside
// this crate.
extern crate self as warden;

#[cfg(feature = "test-util")]
pub use warden_core::test;
pub use warden_core::{
    command,
    command::{CommandContext, CommandError, ObjectDetails, Pipeline},
    concurrency,
    concurrency::{ConcurrencyConflict, ExpectedSequence},
    event,
    event::{DomainEvent, Event, PendingEvent},
    log,
    log::EventLog,
    projection,
    projection::{Projection, Projector},
    worker,
    worker::ProjectionWorker,
    write_model,
    write_model::{Apply, WriteModel},
};
// Re-export proc macro derives so consumers only depend on `warden`.
pub use warden_macros::{DomainEvent, WriteModel};

pub mod commands;
pub mod config;
pub mod crypto;
pub mod id;
pub mod idp;
pub mod tenant;

pub use commands::Commands;
pub use config::Config;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use warden_postgres::{DatabaseConfig, Error, Log, Tables};
}
