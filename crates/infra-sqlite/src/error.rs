// sqlx::Error -> AppError mapping
//
// Orphan rules keep `From<sqlx::Error> for AppError` out of this crate.

use persistq_core::error::AppError;

/// Convert sqlx::Error to AppError::Storage with SQLite result-code context
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code() {
                Some(code) => match code.as_ref() {
                    "5" => AppError::Storage(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Storage(format!("Database full: {}", db_err.message())),
                    "8" => AppError::Storage(format!(
                        "Database is read-only: {}",
                        db_err.message()
                    )),
                    "11" => AppError::Storage(format!(
                        "Database file is corrupt: {}",
                        db_err.message()
                    )),
                    other => AppError::Storage(format!(
                        "Database error [{}]: {}",
                        other,
                        db_err.message()
                    )),
                },
                None => AppError::Storage(format!("Database error: {}", db_err.message())),
            }
        }
        sqlx::Error::Io(io_err) => AppError::Storage(format!("Database I/O error: {}", io_err)),
        sqlx::Error::PoolClosed => AppError::Storage("Store is closed".to_string()),
        sqlx::Error::RowNotFound => AppError::Storage("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Storage(format!("Column not found: {}", col))
        }
        _ => {
            // Connection, pool, protocol errors
            AppError::Storage(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_pool_maps_to_storage() {
        let err = map_sqlx_error(sqlx::Error::PoolClosed);
        assert!(err.is_io_failure());
        assert_eq!(err.to_string(), "Storage error: Store is closed");
    }

    #[test]
    fn test_row_not_found() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Storage(msg) if msg == "Row not found"));
    }
}
