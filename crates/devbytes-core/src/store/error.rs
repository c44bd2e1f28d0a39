use thiserror::Error;

/// Errors from the offline store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error(
        "Database schema version {db_version} is newer than supported version {latest_supported}"
    )]
    UnsupportedSchemaVersion { db_version: u32, latest_supported: u32 },
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => {
                StoreError::Unavailable("connection closed".to_string())
            }
            tokio_rusqlite::Error::Close((_, e)) => StoreError::Unavailable(e.to_string()),
            tokio_rusqlite::Error::Rusqlite(e) => match e {
                rusqlite::Error::SqliteFailure(ref sqlite_err, _)
                    if matches!(
                        sqlite_err.code,
                        rusqlite::ErrorCode::CannotOpen
                            | rusqlite::ErrorCode::ReadOnly
                            | rusqlite::ErrorCode::DiskFull
                            | rusqlite::ErrorCode::DatabaseBusy
                            | rusqlite::ErrorCode::DatabaseLocked
                            | rusqlite::ErrorCode::SystemIoFailure
                    ) =>
                {
                    StoreError::Unavailable(e.to_string())
                }
                other => StoreError::Query(other.to_string()),
            },
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cannot_open_maps_to_unavailable() {
        let sqlite_err = rusqlite::ffi::Error {
            code: rusqlite::ErrorCode::CannotOpen,
            extended_code: rusqlite::ffi::SQLITE_CANTOPEN,
        };
        let err = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(sqlite_err, None));
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_closed_connection_maps_to_unavailable() {
        let err = tokio_rusqlite::Error::ConnectionClosed;
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_other_errors_map_to_query() {
        let err = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(StoreError::from(err), StoreError::Query(_)));
    }
}
