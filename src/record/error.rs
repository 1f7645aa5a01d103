use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Block full: capacity={0} records")]
    BlockFull(usize),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

pub type RecordResult<T> = Result<T, RecordError>;
