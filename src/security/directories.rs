use std::path::{Path, PathBuf};

const PLUGIN_NAME: &str = "obs-background-filter";

/// Who controls the contents of a whitelisted directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustTier {
    /// Writable by the current user
    User,
    /// Installed system-wide, writable only by an administrator
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedDirectory {
    pub path: PathBuf,
    pub tier: TrustTier,
}

/// Whitelist of directories models may be loaded from
#[derive(Debug, Clone, Default)]
pub struct ModelDirectories {
    entries: Vec<AllowedDirectory>,
}

impl ModelDirectories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard locations of the host: per-user plugin data and the
    /// system-wide plugin share directories
    pub fn host_defaults() -> Self {
        let mut dirs = Self::new();

        if let Some(home) = std::env::var_os("HOME") {
            let data = Path::new(&home)
                .join(".config/obs-studio/plugins")
                .join(PLUGIN_NAME)
                .join("data");
            dirs.push(data.join("models"), TrustTier::User);
            dirs.push(data, TrustTier::User);
        }

        dirs.push(
            Path::new("/usr/share/obs/obs-plugins")
                .join(PLUGIN_NAME)
                .join("models"),
            TrustTier::System,
        );
        dirs.push(
            Path::new("/usr/local/share/obs/obs-plugins")
                .join(PLUGIN_NAME)
                .join("models"),
            TrustTier::System,
        );

        dirs
    }

    pub fn push<P: Into<PathBuf>>(&mut self, path: P, tier: TrustTier) {
        self.entries.push(AllowedDirectory {
            path: path.into(),
            tier,
        });
    }

    pub fn with_user<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.push(path, TrustTier::User);
        self
    }

    pub fn with_system<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.push(path, TrustTier::System);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllowedDirectory> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
