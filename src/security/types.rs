use super::directories::TrustTier;
use std::path::PathBuf;
use thiserror::Error;

/// Why a candidate model file was refused
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path contains a parent-directory traversal: {0}")]
    Traversal(PathBuf),

    #[error("path is not inside an allowed model directory: {0}")]
    OutsideWhitelist(PathBuf),

    #[error("model file does not exist: {0}")]
    Missing(PathBuf),

    #[error("model path is not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("model file too large: {size} bytes (max {max})")]
    Oversized { size: u64, max: u64 },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("models in user-writable directories need a checksum: {0}")]
    ChecksumRequired(PathBuf),

    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SecurityError {
    /// Stable reason code, used as a structured log field
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::Traversal(_) => "traversal",
            SecurityError::OutsideWhitelist(_) => "outside-whitelist",
            SecurityError::Missing(_) => "missing",
            SecurityError::NotRegularFile(_) => "not-regular-file",
            SecurityError::Oversized { .. } => "oversized",
            SecurityError::ChecksumMismatch { .. } => "checksum-mismatch",
            SecurityError::ChecksumRequired(_) => "checksum-required",
            SecurityError::Io { .. } => "io",
        }
    }
}

/// Whether the file contents were checked against a known digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    Unverified,
}

/// Non-fatal findings recorded on an accepted model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityWarning {
    /// File extension is not `.onnx`
    BadExtension(Option<String>),
    /// No expected checksum was supplied
    Unverified,
}

/// Outcome of a successful validation
#[derive(Debug, Clone)]
pub struct SecurityVerdict {
    /// Canonical path of the accepted file
    pub path: PathBuf,
    /// Trust tier of the whitelist entry the file was found under
    pub tier: TrustTier,
    pub size: u64,
    pub integrity: Integrity,
    pub warnings: Vec<SecurityWarning>,
}

impl SecurityVerdict {
    pub fn is_verified(&self) -> bool {
        self.integrity == Integrity::Verified
    }
}
