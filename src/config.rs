//! Runtime configuration types.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default pool size: 256 KiB per data region, 256 Ki words of text.
pub const DEFAULT_POOL: usize = 256 * 1024;

/// Runtime configuration for the VM.
///
/// Read from the `[runtime]` table of `yvm.toml`. Every field is optional in
/// the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the text region in words.
    pub text_words: usize,
    /// Capacity of the static data region in bytes.
    pub data_bytes: usize,
    /// Size of the stack in bytes, rounded down to whole words.
    pub stack_bytes: usize,
    /// Size of the allocation arena behind MALC.
    pub heap_bytes: usize,
    /// Trap after this many instructions (None = unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,
    /// Emit a trace event per dispatched instruction.
    pub trace: bool,
    /// Run the verifier before executing.
    pub verify: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            text_words: DEFAULT_POOL,
            data_bytes: DEFAULT_POOL,
            stack_bytes: DEFAULT_POOL,
            heap_bytes: DEFAULT_POOL,
            max_cycles: None,
            trace: false,
            verify: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Only the `[runtime]` table matters here; other tables are ignored.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeConfig,
}

impl RuntimeConfig {
    /// Load the `[runtime]` table from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.runtime.validate()?;
        Ok(file.runtime)
    }

    /// Reject configurations no program could run under.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_bytes < crate::vm::WORD_BYTES {
            return Err(ConfigError::Invalid(format!(
                "stack_bytes must be at least {} (got {})",
                crate::vm::WORD_BYTES,
                self.stack_bytes
            )));
        }
        let limit = crate::vm::MAX_REGION_BYTES;
        for (field, bytes) in [
            ("text_words", self.text_words.saturating_mul(crate::vm::WORD_BYTES)),
            ("data_bytes", self.data_bytes),
            ("stack_bytes", self.stack_bytes),
            ("heap_bytes", self.heap_bytes),
        ] {
            if bytes > limit {
                return Err(ConfigError::Invalid(format!(
                    "{} is {} bytes, above the {} byte limit",
                    field, bytes, limit
                )));
            }
        }
        if self.max_cycles == Some(0) {
            return Err(ConfigError::Invalid("max_cycles must be positive".to_string()));
        }
        Ok(())
    }
}
