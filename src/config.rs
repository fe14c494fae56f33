//! Buffer sizing for [`StreamFanout`](crate::StreamFanout).
//!
//! Can be built in code or loaded from a TOML file:
//!
//! ```toml
//! buffer_size = 1048576
//! min_read_size = 65536
//! ```

use crate::error::{FanoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default size of the shared circular buffer (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default minimum free space before the source is read again (8KB)
pub const DEFAULT_MIN_READ_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FanoutConfig {
    /// How many bytes the buffer holds at once. This is how far the slowest
    /// reader can fall behind the fastest one before the fastest blocks.
    ///
    /// A running transfer allocates this twice: once for the shared buffer
    /// and once for the scratch space source reads land in before they are
    /// published, so readers never wait on a source read in progress.
    pub buffer_size: usize,

    /// Free space the producer waits for before issuing another read.
    /// Must be smaller than `buffer_size`.
    pub min_read_size: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            min_read_size: DEFAULT_MIN_READ_SIZE,
        }
    }
}

impl FanoutConfig {
    pub fn new(buffer_size: usize, min_read_size: usize) -> Self {
        Self {
            buffer_size,
            min_read_size,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_min_read_size(mut self, min_read_size: usize) -> Self {
        self.min_read_size = min_read_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_read_size == 0 {
            return Err(FanoutError::Config(
                "min_read_size must be greater than zero".to_string(),
            ));
        }
        if self.buffer_size <= self.min_read_size {
            return Err(FanoutError::Config(format!(
                "buffer_size ({}) must be larger than min_read_size ({})",
                self.buffer_size, self.min_read_size
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: FanoutConfig =
            toml::from_str(s).map_err(|e| FanoutError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FanoutError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }
}
