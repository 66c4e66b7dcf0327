//! Identifier generation collaborator.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("failed to generate id: {0}")]
    Generation(String),
}

/// Hands out aggregate ids. Called once per add command.
pub trait IdGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns [`IdError`] if no id can be produced.
    fn next_id(&self) -> Result<String, IdError>;
}

impl<T: IdGenerator + ?Sized> IdGenerator for std::sync::Arc<T> {
    fn next_id(&self) -> Result<String, IdError> {
        (**self).next_id()
    }
}

/// Random UUID v4 ids in simple (hyphen-less) form.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> Result<String, IdError> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}

/// Deterministic ids `"{prefix}1"`, `"{prefix}2"`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new("idp-")
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Result<String, IdError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(format!("{}{n}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidGenerator;
        let a = ids.next_id().unwrap();
        let b = ids.next_id().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new("x");
        assert_eq!(ids.next_id().unwrap(), "x1");
        assert_eq!(ids.next_id().unwrap(), "x2");
    }
}
