use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmvoxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Upstream(#[from] ClientError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EmvoxError>;

/// Failure buckets for external service calls. Every stored task error is
/// prefixed with the uppercase category so operators (and the timeout
/// counter) can slice failures without parsing free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Timeout,
    Upstream4xx,
    Upstream5xx,
    ParseError,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "TIMEOUT",
            FailureCategory::Upstream4xx => "UPSTREAM_4XX",
            FailureCategory::Upstream5xx => "UPSTREAM_5XX",
            FailureCategory::ParseError => "PARSE_ERROR",
            FailureCategory::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the external emotion / transcription clients.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{service} request timed out: {message}")]
    Timeout {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned status {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} response could not be parsed: {message}")]
    Parse {
        service: &'static str,
        message: String,
    },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn category(&self) -> FailureCategory {
        match self {
            ClientError::Timeout { .. } => FailureCategory::Timeout,
            ClientError::Status { status, .. } if (400..500).contains(&(*status as i32)) => {
                FailureCategory::Upstream4xx
            }
            ClientError::Status { .. } => FailureCategory::Upstream5xx,
            ClientError::Parse { .. } => FailureCategory::ParseError,
            ClientError::Transport { message, .. } => {
                if looks_like_timeout(message) {
                    FailureCategory::Timeout
                } else {
                    FailureCategory::Unknown
                }
            }
        }
    }

    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ClientError::Timeout {
                service,
                message: err.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return ClientError::Status {
                service,
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return ClientError::Parse {
                service,
                message: err.to_string(),
            };
        }
        ClientError::Transport {
            service,
            message: err.to_string(),
        }
    }
}

/// Classify an arbitrary pipeline error into a failure bucket. Upstream
/// failures carry their own category; everything else is sniffed for
/// timeout wording, then falls through to `Unknown`.
pub fn classify(err: &EmvoxError) -> FailureCategory {
    match err {
        EmvoxError::Upstream(client) => client.category(),
        other => {
            if looks_like_timeout(&other.to_string()) {
                FailureCategory::Timeout
            } else {
                FailureCategory::Unknown
            }
        }
    }
}

fn looks_like_timeout(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}

/// Render an error as the stored task message: `CATEGORY:` prefix plus the
/// original text truncated to `max_len` characters.
pub fn stored_error_message(category: FailureCategory, message: &str, max_len: usize) -> String {
    let mut truncated = message.trim().to_string();
    if truncated.chars().count() > max_len {
        truncated = truncated.chars().take(max_len).collect();
    }
    format!("{}:{}", category.as_str(), truncated)
}
