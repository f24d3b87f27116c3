use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LitlinkError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Message reads as a phrase after "export", e.g. "json: disk full".
    #[error("export {0}")]
    Export(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LitlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_error_message() {
        let err = LitlinkError::Export("format 'ris' is not supported".to_string());
        assert_eq!(err.to_string(), "export format 'ris' is not supported");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: LitlinkError = io.into();
        assert!(matches!(err, LitlinkError::Io(_)));
    }
}
