use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A persisted value no longer parses (schema drift, manual edits).
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<StoreError> for qce_core::QceError {
    fn from(e: StoreError) -> Self {
        match e {
            // Keep not-found structured so callers can answer 404 instead of
            // pattern-matching display text.
            StoreError::NotFound { what } => qce_core::QceError::NotFound { what },
            other => qce_core::QceError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_stays_structured_across_conversion() {
        let e: qce_core::QceError = StoreError::NotFound {
            what: "task t1".into(),
        }
        .into();
        assert!(matches!(e, qce_core::QceError::NotFound { ref what } if what == "task t1"));
        assert_eq!(e.code(), "NOT_FOUND");
    }

    #[test]
    fn database_errors_convert_to_storage() {
        let e: qce_core::QceError = StoreError::Corrupt("bad row".into()).into();
        assert!(matches!(e, qce_core::QceError::Storage(_)));
        assert_eq!(e.code(), "STORAGE");
    }
}
