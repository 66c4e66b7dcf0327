//! Optimistic concurrency control for pushes.
//!
//! Every [`Commit`](crate::log::Commit) states which stream version it was
//! built against. The log rejects the whole push if any stream moved on in
//! the meantime; the caller reloads and retries.

use thiserror::Error;

use crate::event::AggregateRef;

/// Version a commit expects its target stream to be at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedSequence {
    /// Append regardless of the current version.
    ///
    /// Only suitable for single-writer streams such as tenant lifecycle
    /// events emitted by tooling.
    Any,
    /// The stream's last sequence must equal this value. `Exact(0)` expects
    /// an empty stream.
    Exact(u64),
}

impl ExpectedSequence {
    /// Whether a stream currently at `actual` satisfies the expectation.
    #[must_use]
    pub const fn admits(self, actual: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == actual,
        }
    }
}

/// Error indicating a concurrency conflict during push.
///
/// Another writer appended to `aggregate` after the pushing command loaded
/// its state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_conflict(.aggregate, .expected, .actual))]
pub struct ConcurrencyConflict {
    pub aggregate: AggregateRef,
    /// The sequence the command was built against. `0` means a new stream.
    pub expected: u64,
    /// The stream's sequence at push time.
    pub actual: u64,
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(aggregate: &AggregateRef, expected: &u64, actual: &u64) -> String {
    if *expected == 0 {
        format!(
            "concurrency conflict on {aggregate}: expected new stream, found sequence {actual} \
             (hint: another process created this aggregate; reload and retry)"
        )
    } else {
        format!(
            "concurrency conflict on {aggregate}: expected sequence {expected}, found {actual} \
             (hint: stream was modified; reload and retry)"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate() -> AggregateRef {
        AggregateRef::new("idp", "1", "inst")
    }

    #[test]
    fn exact_admits_only_matching_sequence() {
        assert!(ExpectedSequence::Exact(3).admits(3));
        assert!(!ExpectedSequence::Exact(3).admits(4));
        assert!(ExpectedSequence::Exact(0).admits(0));
    }

    #[test]
    fn any_admits_everything() {
        assert!(ExpectedSequence::Any.admits(0));
        assert!(ExpectedSequence::Any.admits(99));
    }

    #[test]
    fn conflict_expected_new_stream_mentions_hint() {
        let conflict = ConcurrencyConflict {
            aggregate: aggregate(),
            expected: 0,
            actual: 2,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected new stream"));
        assert!(msg.contains("reload and retry"));
        assert!(msg.contains("idp/1@inst"));
    }

    #[test]
    fn conflict_expected_sequence_includes_both_versions() {
        let conflict = ConcurrencyConflict {
            aggregate: aggregate(),
            expected: 5,
            actual: 10,
        };
        let msg = conflict.to_string();
        assert!(msg.contains("expected sequence 5"));
        assert!(msg.contains("found 10"));
    }
}
