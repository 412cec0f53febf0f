use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Store(#[from] qce_store::StoreError),

    #[error(transparent)]
    Core(#[from] qce_core::QceError),
}

impl From<SchedulerError> for qce_core::QceError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(s) => s.into(),
            SchedulerError::Core(c) => c,
            other => qce_core::QceError::Validation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
