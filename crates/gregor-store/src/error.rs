use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Core(#[from] gregor_core::GregorError),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid time column value {0}")]
    InvalidTime(i64),

    #[error("unexpected NULL {0} column")]
    NullColumn(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;
