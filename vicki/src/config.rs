//! Runtime configuration
//!
//! Loaded from TOML. Every field has a default so an empty file (or no file)
//! yields a working engine.

use crate::error::{VickiError, VickiResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vicki_script::speech::DEFAULT_MAX_SPEECH_BYTES;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VickiConfig {
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    pub response: ResponseConfig,
    pub sandbox: SandboxConfig,
    pub native: NativeConfig,
    pub logging: LoggingConfig,
}

impl VickiConfig {
    pub fn from_toml_str(content: &str) -> VickiResult<Self> {
        toml::from_str(content).map_err(|e| VickiError::Config(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> VickiResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VickiError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> VickiResult<String> {
        toml::to_string_pretty(self).map_err(|e| VickiError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Bound on how long one handler may take to claim or decline a turn.
    pub handler_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 8_000,
        }
    }
}

impl DispatchConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a suspended `send_and_listen` waits for the user.
    pub continuation_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            continuation_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn continuation_timeout(&self) -> Duration {
        Duration::from_millis(self.continuation_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub max_speech_bytes: usize,
    pub invocation_name: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            max_speech_bytes: DEFAULT_MAX_SPEECH_BYTES,
            invocation_name: "vicki".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub mailbox_capacity: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
    pub exec_timeout_ms: u64,
    pub node_binary: String,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 4,
            exec_timeout_ms: 30_000,
            node_binary: "node".to_string(),
        }
    }
}

impl NativeConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "vicki=info".to_string(),
            ansi: true,
        }
    }
}
