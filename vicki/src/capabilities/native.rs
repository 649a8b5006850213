//! Native companion boundary
//!
//! Process execution and node-hosted JavaScript. The permission check and the
//! exit-code policy live in the proxy; a backend only reports what happened.

use crate::config::NativeConfig;
use crate::error::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecOptions {
    /// Reject the call when the process exits with a non-zero code.
    pub fail_on_non_zero_exit_code: bool,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            fail_on_non_zero_exit_code: true,
            cwd: None,
            env: HashMap::new(),
            timeout: None,
        }
    }
}

impl ExecOptions {
    pub fn allow_non_zero_exit(mut self) -> Self {
        self.fail_on_non_zero_exit_code = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Platform name in the browser's `PlatformOs` vocabulary.
pub fn platform_os() -> String {
    match std::env::consts::OS {
        "macos" => "mac",
        "windows" => "win",
        other => other,
    }
    .to_string()
}

#[async_trait]
pub trait NativeBackend: Send + Sync {
    async fn available(&self) -> bool;

    fn os(&self) -> String {
        platform_os()
    }

    async fn exec(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput, UpstreamError>;

    async fn run_js(&self, code: &str, params: &[JsonValue]) -> Result<JsonValue, UpstreamError>;
}

/// Stand-in when no companion is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNativeCompanion;

#[async_trait]
impl NativeBackend for NoNativeCompanion {
    async fn available(&self) -> bool {
        false
    }

    async fn exec(&self, _command: &str, _options: &ExecOptions) -> Result<ExecOutput, UpstreamError> {
        Err(UpstreamError::NativeUnavailable)
    }

    async fn run_js(&self, _code: &str, _params: &[JsonValue]) -> Result<JsonValue, UpstreamError> {
        Err(UpstreamError::NativeUnavailable)
    }
}

/// Runs commands through the platform shell and JavaScript through `node`.
#[derive(Debug, Clone)]
pub struct ProcessNativeBackend {
    config: NativeConfig,
    permits: Arc<Semaphore>,
}

impl ProcessNativeBackend {
    pub fn new(config: NativeConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }

    async fn run(&self, mut cmd: Command, timeout: Duration) -> Result<ExecOutput, UpstreamError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| UpstreamError::Spawn("native backend is shut down".to_string()))?;

        cmd.stdin(Stdio::null()).kill_on_drop(true);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))?
            .map_err(|e| UpstreamError::Spawn(e.to_string()))?;

        Ok(ExecOutput {
            // Killed by a signal: no code to report.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Node program that evaluates the script's code, calls it with the params
/// when it is a function, and prints the JSON result.
fn js_wrapper(code: &str, params: &[JsonValue]) -> Result<String, UpstreamError> {
    let code = serde_json::to_string(code).map_err(|e| UpstreamError::InvalidArguments(e.to_string()))?;
    let params = serde_json::to_string(params).map_err(|e| UpstreamError::InvalidArguments(e.to_string()))?;
    Ok(format!(
        "const __code = {code};\n\
         const __params = {params};\n\
         Promise.resolve()\n\
           .then(() => {{ const v = eval(__code); return typeof v === 'function' ? v(...__params) : v; }})\n\
           .then(\n\
             (v) => process.stdout.write(JSON.stringify(v === undefined ? null : v)),\n\
             (e) => {{ process.stderr.write(String((e && e.stack) || e)); process.exit(1); }}\n\
           );\n"
    ))
}

#[async_trait]
impl NativeBackend for ProcessNativeBackend {
    async fn available(&self) -> bool {
        self.config.enabled
    }

    async fn exec(&self, command: &str, options: &ExecOptions) -> Result<ExecOutput, UpstreamError> {
        let mut cmd = Self::shell_command(command);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&options.env);
        let timeout = options.timeout.unwrap_or_else(|| self.config.exec_timeout());
        self.run(cmd, timeout).await
    }

    async fn run_js(&self, code: &str, params: &[JsonValue]) -> Result<JsonValue, UpstreamError> {
        let mut cmd = Command::new(&self.config.node_binary);
        cmd.arg("-e").arg(js_wrapper(code, params)?);
        let output = self.run(cmd, self.config.exec_timeout()).await?;
        if output.exit_code != 0 {
            return Err(UpstreamError::RunJs(output.stderr.trim().to_string()));
        }
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_str(stdout).map_err(|e| UpstreamError::RunJs(format!("unreadable result: {}", e)))
    }
}
