//! Model artifact validation.
//!
//! Every model file passes through [`SecurityGate::validate`] before any of
//! its bytes are handed to an inference runtime.

mod checksum;
mod directories;
mod gate;
pub mod types;

pub use checksum::{sha256_file, verify_checksum};
pub use directories::{AllowedDirectory, ModelDirectories, TrustTier};
pub use gate::{
    contains_traversal, is_path_in_directory, sanitize_path, GatePolicy, SecurityGate,
    MAX_MODEL_SIZE,
};
pub use types::{Integrity, SecurityError, SecurityVerdict, SecurityWarning};
