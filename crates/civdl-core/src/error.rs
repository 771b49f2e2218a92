use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid Civitai URL: {0}")]
    InvalidUrl(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by the API after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("server error (HTTP {status}) after {attempts} attempt(s)")]
    Server { status: u16, attempts: u32 },

    #[error("transfer failed for '{file}': {reason}")]
    Transfer { file: String, reason: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("unsupported model type: {0}")]
    UnsupportedType(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
