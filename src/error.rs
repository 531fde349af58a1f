use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Request-time failures. These travel through the dispatch loop as the
/// accumulated layer error and end up in the terminal handler if nothing
/// handles them.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Failed to decode param '{0}'")]
    Decode(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        headers: Vec<(String, String)>,
    },
    #[error("Cannot send a response after it has been finalized")]
    HeadersSent,
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Panic: {0}")]
    PanicError(String),
    #[error("IO error: {0}")]
    IoError(Arc<io::Error>),
}

impl ServerError {
    /// Builds an error carrying an explicit status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        ServerError::Http {
            status,
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// Attaches a header to an [`ServerError::Http`] error. Other variants
    /// are converted into one first, keeping their declared status.
    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match self {
            ServerError::Http {
                status,
                message,
                mut headers,
            } => {
                headers.push((name.into(), value.into()));
                ServerError::Http {
                    status,
                    message,
                    headers,
                }
            }
            other => {
                let status = other.status_code();
                ServerError::Http {
                    status,
                    message: other.to_string(),
                    headers: vec![(name.into(), value.into())],
                }
            }
        }
    }

    /// The status the error itself declares, if any.
    pub fn declared_status(&self) -> Option<u16> {
        match self {
            ServerError::Decode(_) | ServerError::BadRequest(_) => Some(400),
            ServerError::Unauthorized(_) => Some(401),
            ServerError::Forbidden(_) => Some(403),
            ServerError::NotFound => Some(404),
            ServerError::Conflict(_) => Some(409),
            ServerError::TooManyRequests => Some(429),
            ServerError::Http { status, .. } => Some(*status),
            ServerError::HeadersSent
            | ServerError::InternalError(_)
            | ServerError::PanicError(_)
            | ServerError::IoError(_) => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.declared_status().unwrap_or(500)
    }

    pub fn headers(&self) -> &[(String, String)] {
        match self {
            ServerError::Http { headers, .. } => headers,
            _ => &[],
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::IoError(Arc::new(err))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Setup-time failure compiling a route string. Registration should not
/// proceed past one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("missing parameter name at offset {offset} in route '{pattern}'")]
    MissingName { pattern: String, offset: usize },
    #[error("duplicate parameter ':{name}' in route '{pattern}'")]
    DuplicateName { pattern: String, name: String },
    #[error("unsupported character '{ch}' at offset {offset} in route '{pattern}'")]
    Unsupported {
        pattern: String,
        ch: char,
        offset: usize,
    },
}
