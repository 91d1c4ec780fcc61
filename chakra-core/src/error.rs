use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Failed to bind UDP port {port}: {source}")]
    BindFailure {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code, used when errors cross node boundaries.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::NegotiationFailure(_) => "negotiation_failure",
            Self::Unauthorized(_) => "unauthorized",
            Self::BindFailure { .. } => "bind_failure",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unavailable(_) => "unavailable",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }

    /// Rebuild an error from a code produced by [`Error::code`] on another node.
    ///
    /// `BindFailure` and `Serialization` carry non-portable sources and come back as `Internal`.
    #[must_use]
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "resource_exhausted" => Self::ResourceExhausted(message),
            "conflict" => Self::Conflict(message),
            "not_found" => Self::NotFound(message),
            "negotiation_failure" => Self::NegotiationFailure(message),
            "unauthorized" => Self::Unauthorized(message),
            "invalid_input" => Self::InvalidInput(message),
            "unavailable" => Self::Unavailable(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ResourceExhausted(msg) => Self::resource_exhausted(msg),
            Error::Conflict(msg) => Self::already_exists(msg),
            Error::NotFound(msg) => Self::not_found(msg),
            Error::NegotiationFailure(msg) => Self::failed_precondition(msg),
            Error::Unauthorized(msg) => Self::unauthenticated(msg),
            Error::InvalidInput(msg) => Self::invalid_argument(msg),
            Error::Unavailable(msg) => Self::unavailable(msg),
            Error::BindFailure { port, source } => {
                tracing::error!(port, error = %source, "UDP bind failure");
                Self::unavailable(format!("failed to bind UDP port {port}"))
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Data processing error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal("Internal server error")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
