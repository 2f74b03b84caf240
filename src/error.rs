use std::path::PathBuf;

use thiserror::Error;

use crate::diagram::DiagramError;

#[derive(Error, Debug)]
pub enum BlogError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Page size must be greater than zero")]
    InvalidPageSize,
    #[error(transparent)]
    Diagram(#[from] DiagramError),
}

impl BlogError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BlogError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlogError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::decode_payload;

    #[test]
    fn diagram_errors_convert() {
        fn decode(payload: &str) -> Result<String> {
            Ok(decode_payload(payload)?)
        }

        let err = decode("@@@").unwrap_err();
        assert!(matches!(err, BlogError::Diagram(DiagramError::Payload(_))));
        assert!(err.to_string().starts_with("invalid diagram payload"));
    }
}
