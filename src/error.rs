use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A portal value did not have the shape the row contract requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {found} for {field}, expected {expected}")]
pub struct ValidationError {
    pub field: String,
    pub index: Option<usize>,
    pub found: String,
    pub expected: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, found: impl Into<String>, expected: &str) -> Self {
        Self {
            field: field.into(),
            index: None,
            found: found.into(),
            expected: expected.to_string(),
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("marshal error: {0}")]
    Marshal(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Stable code used in IPC error objects.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Marshal(_) => "marshal_error",
            Self::Authentication(_) => "authentication_error",
            Self::Transport(_) => "transport_error",
            Self::Persistence(_) => "persistence_error",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Transport(format!("request timed out: {e}"));
        }
        Self::Transport(e.to_string())
    }
}
