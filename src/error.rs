use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("poll '{0}' was not found")]
    NotFound(String),

    #[error("a vote has already been cast for this poll and it does not allow changing votes")]
    Conflict,

    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::ExternalService(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::ExternalService(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
