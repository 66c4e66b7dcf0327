/// Error type for `PostgreSQL` log and projection operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored position or sequence that does not fit a `u64`.
    #[error("invalid position value from database: {0}")]
    InvalidPosition(i64),
    /// A caller-supplied position or sequence beyond the `BIGINT` range.
    #[error("position {0} is out of range for the database")]
    PositionOutOfRange(u64),
    /// Insert operation returned no positions for written events.
    #[error("database did not return an inserted position")]
    MissingReturnedPosition,
}

pub(crate) fn to_db(value: u64) -> Result<i64, Error> {
    i64::try_from(value).map_err(|_| Error::PositionOutOfRange(value))
}

pub(crate) fn from_db(value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::InvalidPosition(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_convert_within_range() {
        assert_eq!(to_db(7).unwrap(), 7);
        assert_eq!(from_db(7).unwrap(), 7);
    }

    #[test]
    fn negative_database_values_are_rejected() {
        assert!(matches!(from_db(-1), Err(Error::InvalidPosition(-1))));
    }

    #[test]
    fn oversized_positions_are_rejected() {
        assert!(matches!(
            to_db(u64::MAX),
            Err(Error::PositionOutOfRange(u64::MAX))
        ));
    }
}
