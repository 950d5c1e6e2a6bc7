use super::checksum::verify_checksum;
use super::directories::{ModelDirectories, TrustTier};
use super::types::{Integrity, SecurityError, SecurityVerdict, SecurityWarning};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Hard cap on model file size, checked before any parsing
pub const MAX_MODEL_SIZE: u64 = 500 * 1024 * 1024;

const MODEL_EXTENSION: &str = "onnx";

/// Extra rules layered on top of the base checks
#[derive(Debug, Clone, Default)]
pub struct GatePolicy {
    /// Refuse unverified models found in user-writable directories
    pub require_checksum_for_user_dirs: bool,
}

/// Validates model paths and contents against a directory whitelist
#[derive(Debug, Clone)]
pub struct SecurityGate {
    directories: ModelDirectories,
    policy: GatePolicy,
}

impl SecurityGate {
    pub fn new(directories: ModelDirectories) -> Self {
        Self {
            directories,
            policy: GatePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn directories(&self) -> &ModelDirectories {
        &self.directories
    }

    /// Validate a candidate model file
    ///
    /// Checks run in order: traversal tokens, whitelist membership of the
    /// resolved path, regular file, size cap, extension (warning only), and
    /// finally the content digest when `expected_sha256` is given. The file
    /// is only opened for the digest; nothing is ever written.
    pub fn validate(
        &self,
        path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<SecurityVerdict, SecurityError> {
        let _span = tracing::debug_span!("security_validate").entered();

        let result = self.check(path, expected_sha256);
        match &result {
            Ok(verdict) => {
                tracing::info!(
                    tier = ?verdict.tier,
                    verified = verdict.is_verified(),
                    "Model path validated: {}",
                    verdict.path.display()
                );
            }
            Err(err) => {
                tracing::error!(reason = err.code(), "Model rejected: {}", err);
            }
        }
        result
    }

    fn check(
        &self,
        path: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<SecurityVerdict, SecurityError> {
        if contains_traversal(path) {
            return Err(SecurityError::Traversal(path.to_path_buf()));
        }

        let resolved = fs::canonicalize(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SecurityError::Missing(path.to_path_buf())
            } else {
                SecurityError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let tier = self
            .matching_tier(&resolved)
            .ok_or_else(|| SecurityError::OutsideWhitelist(resolved.clone()))?;

        let metadata = fs::metadata(&resolved).map_err(|source| SecurityError::Io {
            path: resolved.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(SecurityError::NotRegularFile(resolved));
        }

        let size = metadata.len();
        if size > MAX_MODEL_SIZE {
            return Err(SecurityError::Oversized {
                size,
                max: MAX_MODEL_SIZE,
            });
        }

        let mut warnings = Vec::new();
        let extension = resolved
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        if extension.as_deref() != Some(MODEL_EXTENSION) {
            tracing::warn!(
                "Model file does not have .{} extension: {}",
                MODEL_EXTENSION,
                resolved.display()
            );
            warnings.push(SecurityWarning::BadExtension(extension));
        }

        let integrity = match expected_sha256.filter(|hash| !hash.trim().is_empty()) {
            Some(expected) => {
                verify_checksum(&resolved, expected)?;
                Integrity::Verified
            }
            None if self.policy.require_checksum_for_user_dirs && tier == TrustTier::User => {
                return Err(SecurityError::ChecksumRequired(resolved));
            }
            None => {
                tracing::warn!(
                    "Loading model without checksum verification: {}",
                    resolved.display()
                );
                warnings.push(SecurityWarning::Unverified);
                Integrity::Unverified
            }
        };

        Ok(SecurityVerdict {
            path: resolved,
            tier,
            size,
            integrity,
            warnings,
        })
    }

    fn matching_tier(&self, resolved: &Path) -> Option<TrustTier> {
        self.directories
            .iter()
            .find(|allowed| is_path_in_directory(resolved, &allowed.path))
            .map(|allowed| allowed.tier)
    }
}

/// True if any component of `path` is a parent-directory token
///
/// Both separators are considered so `..\` sequences are caught on
/// platforms where the backslash is an ordinary filename character.
/// Only whole `..` components count; names such as `v1..2.onnx` are allowed.
pub fn contains_traversal(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
        || path
            .to_string_lossy()
            .split(['/', '\\'])
            .any(|part| part == "..")
}

/// True if `path` resolves to a location strictly inside `dir`
///
/// Both sides are canonicalized, so symlinks that point out of the directory
/// are judged by their target.
pub fn is_path_in_directory(path: &Path, dir: &Path) -> bool {
    let (Ok(path), Ok(dir)) = (fs::canonicalize(path), fs::canonicalize(dir)) else {
        return false;
    };

    match path.strip_prefix(&dir) {
        Ok(relative) => {
            relative.components().next().is_some()
                && !relative
                    .components()
                    .any(|c| matches!(c, Component::ParentDir))
        }
        Err(_) => false,
    }
}

/// Strip traversal tokens and redundant separators from a user-supplied path
///
/// The result is lexically normalised and never contains `..`.
pub fn sanitize_path(raw: &str) -> PathBuf {
    let mut sanitized = raw.replace('\\', "/");
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", "");
    }
    while sanitized.contains("//") {
        sanitized = sanitized.replace("//", "/");
    }

    Path::new(&sanitized)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_detection() {
        assert!(contains_traversal(Path::new("../../etc/passwd")));
        assert!(contains_traversal(Path::new("/models/../secret.onnx")));
        assert!(contains_traversal(Path::new("models\\..\\secret.onnx")));
        assert!(!contains_traversal(Path::new("/models/u2net.onnx")));
        assert!(!contains_traversal(Path::new("/models/v1..2.onnx")));
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("../../etc/passwd"), PathBuf::from("/etc/passwd"));
        assert_eq!(
            sanitize_path("models\\\\u2net.onnx"),
            PathBuf::from("models/u2net.onnx")
        );
        assert_eq!(sanitize_path("./a/./b"), PathBuf::from("a/b"));
        assert!(!contains_traversal(&sanitize_path("a/..../b")));
    }

    #[test]
    fn test_directory_itself_is_not_inside() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_path_in_directory(dir.path(), dir.path()));
    }

    #[test]
    fn test_nested_file_is_inside() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sub");
        fs::create_dir(&nested).unwrap();
        let file = nested.join("m.onnx");
        fs::write(&file, b"x").unwrap();
        assert!(is_path_in_directory(&file, dir.path()));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_outside() {
        let root = tempfile::tempdir().unwrap();
        let allowed = root.path().join("models");
        let sibling = root.path().join("models-evil");
        fs::create_dir(&allowed).unwrap();
        fs::create_dir(&sibling).unwrap();
        let file = sibling.join("m.onnx");
        fs::write(&file, b"x").unwrap();
        assert!(!is_path_in_directory(&file, &allowed));
    }
}
