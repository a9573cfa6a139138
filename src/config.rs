//! Codec configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! max_frame_size = 1048576
//! max_path_depth = 16
//! ```

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum frame size (64MB) - prevents OOM from malicious/corrupted frames
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of path segments in a section header
pub const DEFAULT_MAX_PATH_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Largest frame the encoder will emit and the decoder will accept.
    pub max_frame_size: usize,
    /// Largest number of path segments in a section header.
    pub max_path_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
        }
    }
}

impl CodecConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| CodecError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded codec config from {}", path.display());
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        // A frame must at least fit a marker byte
        if self.max_frame_size == 0 {
            return Err(CodecError::Config(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
