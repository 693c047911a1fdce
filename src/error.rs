//! Error types for the scanning core.
//!
//! Expected absences (no document, no match, empty region) are not errors; they are
//! reported through `DetectionResult::detected`, `MatchOutcome::failure` and empty region
//! content. What lives here are the conditions a caller must actually handle.

use thiserror::Error;

/// Errors raised by the feature-set codec
#[derive(Error, Debug)]
pub enum FeatureStoreError {
    /// Blob does not start with the expected magic bytes
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic {
        /// Expected magic
        expected: [u8; 4],
        /// Magic found in the blob
        found: [u8; 4],
    },

    /// Blob was written by a newer codec
    #[error("unsupported feature store version {0}")]
    UnsupportedVersion(u32),

    /// Blob ended before a complete record could be read
    #[error("truncated blob: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Byte offset of the failed read
        offset: usize,
        /// Bytes needed
        needed: usize,
        /// Bytes left
        available: usize,
    },

    /// Header fields are inconsistent
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// IO error
    #[error("io")]
    Io(#[from] std::io::Error),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum ScanError {
    /// IO error
    #[error("io")]
    Io(#[from] std::io::Error),

    /// Image decode/encode failure
    #[error("image")]
    Image(#[from] image::ImageError),

    /// Persisted feature blob could not be read or written
    #[error("feature store")]
    FeatureStore(#[from] FeatureStoreError),

    /// Caller supplied unusable input
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Segmentation collaborator failed
    #[error("segmentation")]
    Segmentation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Worker pool could not be built
    #[error("thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// OCR or barcode collaborator failed
    #[error("recognition: {message}")]
    Recognition {
        /// Collaborator message
        message: String,
    },
}

impl ScanError {
    /// Creates an `InvalidInput` error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a `Config` error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Recognition` error
    pub fn recognition(message: impl Into<String>) -> Self {
        Self::Recognition {
            message: message.into(),
        }
    }

    /// Wraps a segmentation collaborator error
    pub fn segmentation<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Segmentation(Box::new(error))
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        Self::config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ScanError::invalid_input("empty frame");
        assert_eq!(err.to_string(), "invalid input: empty frame");

        let err: ScanError = FeatureStoreError::UnsupportedVersion(9).into();
        assert!(matches!(err, ScanError::FeatureStore(_)));

        let err = FeatureStoreError::Truncated {
            offset: 8,
            needed: 4,
            available: 1,
        };
        assert!(err.to_string().contains("offset 8"));
    }
}
