use std::path::PathBuf;
use thiserror::Error;

/// Broad classes of failure, in the order they can occur during a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad local setup, raised before any network activity and never worth retrying
    Configuration,
    /// Local file checks (missing file, oversized file)
    Precondition,
    /// Transport failure or a non-success answer from the remote side
    Transport,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Item has no file or url to upload")]
    MissingPayload,

    #[error("Item is not attached to a saved stream")]
    MissingStream,

    #[error("{0} has no remote id yet")]
    MissingIdentity(&'static str),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported thumbnail format: {}", path.display())]
    InvalidThumbnail { path: PathBuf },

    #[error("Config error: {0}")]
    Config(String),

    #[error("ENOENT, no such file '{}'", path.display())]
    FileNotFound { path: PathBuf },

    #[error("EFBIG, '{}' is {size} bytes, limit is {limit} bytes", path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("{status}: {text}")]
    Api { status: u16, text: String },

    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl UploadError {
    pub fn api_error(status: u16, text: impl Into<String>) -> Self {
        Self::Api {
            status,
            text: text.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable code for errors that carry one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::FileNotFound { .. } => Some("ENOENT"),
            Self::FileTooLarge { .. } => Some("EFBIG"),
            Self::InvalidThumbnail { .. } => Some("EFORMAT"),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingPayload
            | Self::MissingStream
            | Self::MissingIdentity(_)
            | Self::InvalidUrl(_)
            | Self::InvalidThumbnail { .. }
            | Self::Config(_)
            | Self::ConfigParse(_) => ErrorKind::Configuration,
            Self::FileNotFound { .. } | Self::FileTooLarge { .. } => ErrorKind::Precondition,
            Self::Api { .. } | Self::Http(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Transport,
        }
    }

    /// Local path the error refers to, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::FileNotFound { path }
            | Self::FileTooLarge { path, .. }
            | Self::InvalidThumbnail { path } => Some(path),
            _ => None,
        }
    }

    /// HTTP status for remote failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_codes() {
        let err = UploadError::FileTooLarge {
            path: PathBuf::from("big.bin"),
            size: 300,
            limit: 200,
        };
        assert_eq!(err.code(), Some("EFBIG"));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.path(), Some(std::path::Path::new("big.bin")));
        assert!(err.to_string().contains("limit is 200 bytes"));

        let err = UploadError::FileNotFound { path: PathBuf::from("nope") };
        assert_eq!(err.code(), Some("ENOENT"));
    }

    #[test]
    fn test_api_error_display() {
        let err = UploadError::api_error(404, "not found");
        assert_eq!(err.to_string(), "404: not found");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), None);
    }
}
