//! Top-level settings.

use serde::{Deserialize, Serialize};
use warden_core::config::ProjectionConfig;

/// Settings for a warden deployment. Every section falls back to its
/// defaults when absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[cfg(feature = "postgres")]
    pub database: warden_postgres::DatabaseConfig,
    pub projection: ProjectionConfig,
}

impl Config {
    /// Parse settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
