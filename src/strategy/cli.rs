// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CLI communication strategy.
//!
//! Spawns `executable` with `default_args ++ request.args`, streams stdout and
//! stderr into bounded buffers, and enforces a wall-clock timeout.
//!
//! - Output past `max_buffer_size` is truncated with a marker and the process
//!   is sent the configured kill signal.
//! - On timeout the process is sent the kill signal and the response is
//!   marked `timedOut`, whatever the exit code.
//! - A process that survives the signal for `kill_grace_ms` is force-killed.
//! - A process killed by a signal reports `exit code = 128 + signal`.

use std::collections::BTreeMap;
use std::future::pending;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Sleep};
use tracing::{debug, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::{codes, ProviderError};
use crate::types::{CommunicationRequest, CommunicationResponse, ConfigMap};

use super::CommunicationStrategy;

/// Marker appended to truncated stdout.
pub const OUTPUT_TRUNCATED_MARKER: &str = "[OUTPUT TRUNCATED]";

/// Marker appended to truncated stderr.
pub const ERROR_OUTPUT_TRUNCATED_MARKER: &str = "[ERROR OUTPUT TRUNCATED]";

/// Exit code shells use for "command not found".
pub const COMMAND_NOT_FOUND: i32 = 127;

const DEFAULT_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_KILL_GRACE_MS: u64 = 5_000;
const VERSION_CHECK_TIMEOUT_MS: u64 = 10_000;

/// How long to keep reading pipes after the process exited. Grandchildren
/// can hold them open indefinitely.
const PIPE_DRAIN_MS: u64 = 250;

const READ_CHUNK: usize = 8 * 1024;

/// CLI strategy configuration.
///
/// Deserializes from the CLI preset keys (`executable`, `args`,
/// `workingDirectory`, `env`) plus process-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    pub executable: String,

    /// Arguments placed before every request's arguments.
    #[serde(default, rename = "args")]
    pub default_args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Environment defaults; values are coerced to strings, `null` unsets.
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Start from the parent's environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,

    /// Wall-clock timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Per-stream output bound in bytes.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Signal sent on timeout or overflow, e.g. `"SIGTERM"`.
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,

    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_kill_signal() -> String {
    "SIGTERM".to_string()
}

fn default_kill_grace() -> u64 {
    DEFAULT_KILL_GRACE_MS
}

impl CliConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            default_args: Vec::new(),
            working_directory: None,
            env: BTreeMap::new(),
            inherit_env: true,
            timeout: DEFAULT_TIMEOUT_MS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            kill_signal: default_kill_signal(),
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }

    /// Build from a provider configuration map.
    pub fn from_config(config: &ConfigMap) -> Result<Self, ProviderError> {
        serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
            ProviderError::configuration(codes::INVALID_CONFIG, format!("Invalid CLI config: {e}"))
                .with_cause(e)
        })
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_kill_signal(mut self, signal: impl Into<String>) -> Self {
        self.kill_signal = signal.into();
        self
    }

    pub fn with_kill_grace(mut self, grace_ms: u64) -> Self {
        self.kill_grace_ms = grace_ms;
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }
}

/// Coerce an environment value to a string; `None` means unset.
fn env_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Resolve a signal name (`"SIGTERM"`, `"term"`, `"9"`) to its number.
#[cfg(unix)]
fn resolve_signal(name: &str) -> Result<i32, ProviderError> {
    use nix::sys::signal::Signal;
    use std::str::FromStr;

    let invalid = || {
        ProviderError::configuration(codes::INVALID_CONFIG, format!("Unknown signal: {name}"))
    };
    if let Ok(number) = name.parse::<i32>() {
        return Signal::try_from(number).map(|s| s as i32).map_err(|_| invalid());
    }
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map(|s| s as i32).map_err(|_| invalid())
}

#[cfg(not(unix))]
fn resolve_signal(_name: &str) -> Result<i32, ProviderError> {
    Ok(9)
}

#[cfg(unix)]
fn signal_name(number: i32) -> String {
    nix::sys::signal::Signal::try_from(number)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {number}"))
}

#[cfg(not(unix))]
fn signal_name(number: i32) -> String {
    format!("signal {number}")
}

/// Deliver `signal` to the child. Falls back to a hard kill when the signal
/// cannot be delivered.
fn send_signal(child: &mut Child, signal: i32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let (Some(pid), Ok(sig)) = (child.id(), Signal::try_from(signal)) {
            let pid = Pid::from_raw(pid as i32);
            match kill(pid, sig) {
                Ok(()) => return,
                Err(e) => warn!(pid = pid.as_raw(), error = %e, "Failed to signal process"),
            }
        }
    }
    let _ = child.start_kill();
}

fn exit_code_of(status: &ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, Some(signal));
        }
    }
    (-1, None)
}

/// Output buffer that stops accepting bytes at `limit`.
struct BoundedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk. Returns `true` the first time the limit is exceeded.
    fn push(&mut self, chunk: &[u8]) -> bool {
        if self.truncated {
            return false;
        }
        let remaining = self.limit.saturating_sub(self.data.len());
        if chunk.len() <= remaining {
            self.data.extend_from_slice(chunk);
            false
        } else {
            self.data.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
            true
        }
    }

    fn into_string(self, marker: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(marker);
        }
        text
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

async fn wait_optional(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.await,
        None => pending().await,
    }
}

/// Everything collected from one process run.
struct ProcessOutcome {
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
    exit_code: i32,
    exit_signal: Option<i32>,
    timed_out: bool,
    killed: bool,
    pid: Option<u32>,
}

/// CLI communication strategy.
pub struct CliStrategy {
    config: CliConfig,
    kill_signal: i32,
}

impl CliStrategy {
    /// Create a strategy; fails on an unknown kill signal.
    pub fn new(config: CliConfig) -> Result<Self, ProviderError> {
        if config.executable.trim().is_empty() {
            return Err(ProviderError::configuration(
                codes::INVALID_CONFIG,
                "executable must not be empty",
            ));
        }
        let kill_signal = resolve_signal(&config.kill_signal)?;
        Ok(Self {
            config,
            kill_signal,
        })
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    /// Request directory, else configured directory, else the current one.
    /// Relative paths resolve against the configured directory, then the
    /// current directory.
    pub fn resolve_working_directory(&self, requested: Option<&str>) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let base = match &self.config.working_directory {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => cwd.join(dir),
            None => cwd,
        };
        match requested {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => base.join(dir),
            None => base,
        }
    }

    /// Merged environment, parent first (when inherited), then configured
    /// defaults, then request overrides.
    pub fn build_env(&self, overrides: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = if self.config.inherit_env {
            std::env::vars().collect()
        } else {
            BTreeMap::new()
        };
        for (key, value) in self.config.env.iter().chain(overrides.iter()) {
            match env_value(value) {
                Some(v) => {
                    env.insert(key.clone(), v);
                }
                None => {
                    env.remove(key);
                }
            }
        }
        env
    }

    fn build_command(&self, request: &CommunicationRequest, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.default_args)
            .args(&request.args)
            .current_dir(cwd)
            .stdin(if request.body.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.env_clear();
        cmd.envs(self.build_env(&request.env));
        cmd
    }

    async fn run(
        &self,
        mut child: Child,
        stdin_body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<ProcessOutcome, ProviderError> {
        let pid = child.id();

        if let (Some(mut stdin), Some(body)) = (child.stdin.take(), stdin_body) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&body).await {
                    debug!(error = %e, "Failed to write process stdin");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out = BoundedBuffer::new(self.config.max_buffer_size);
        let mut err = BoundedBuffer::new(self.config.max_buffer_size);
        let mut out_chunk = vec![0u8; READ_CHUNK];
        let mut err_chunk = vec![0u8; READ_CHUNK];

        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let mut escalation: Option<Pin<Box<Sleep>>> = None;
        let mut drain: Option<Pin<Box<Sleep>>> = None;

        let mut status: Option<ExitStatus> = None;
        let mut timed_out = false;
        let mut killed = false;

        loop {
            if status.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }

            let mut kill_now = false;
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_chunk), if stdout.is_some() => {
                    match read {
                        Ok(0) | Err(_) => stdout = None,
                        Ok(n) => {
                            if out.push(&out_chunk[..n]) {
                                warn!(limit = self.config.max_buffer_size, "Process stdout exceeded buffer limit");
                                kill_now = true;
                            }
                        }
                    }
                }
                read = read_chunk(&mut stderr, &mut err_chunk), if stderr.is_some() => {
                    match read {
                        Ok(0) | Err(_) => stderr = None,
                        Ok(n) => {
                            if err.push(&err_chunk[..n]) {
                                warn!(limit = self.config.max_buffer_size, "Process stderr exceeded buffer limit");
                                kill_now = true;
                            }
                        }
                    }
                }
                exit = child.wait(), if status.is_none() => {
                    status = Some(exit?);
                    drain = Some(Box::pin(sleep(Duration::from_millis(PIPE_DRAIN_MS))));
                }
                _ = &mut deadline, if !timed_out && status.is_none() => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Process timed out");
                    timed_out = true;
                    kill_now = true;
                }
                _ = wait_optional(&mut escalation), if status.is_none() => {
                    warn!("Process ignored kill signal, forcing termination");
                    let _ = child.start_kill();
                    escalation = None;
                }
                _ = wait_optional(&mut drain) => {
                    debug!("Output pipes still open after exit, abandoning them");
                    break;
                }
            }

            if kill_now && !killed && status.is_none() {
                killed = true;
                send_signal(&mut child, self.kill_signal);
                escalation = Some(Box::pin(sleep(Duration::from_millis(
                    self.config.kill_grace_ms,
                ))));
            }
        }

        let (exit_code, exit_signal) = match status {
            Some(status) => exit_code_of(&status),
            None => (-1, None),
        };

        Ok(ProcessOutcome {
            stdout: out,
            stderr: err,
            exit_code,
            exit_signal,
            timed_out,
            killed,
            pid,
        })
    }

    fn not_found_response(&self, message: String, status: i32) -> CommunicationResponse {
        let mut metadata = ConfigMap::new();
        metadata.insert("executable".into(), json!(self.config.executable));
        metadata.insert("exitCode".into(), json!(status));
        metadata.insert("timedOut".into(), json!(false));
        CommunicationResponse {
            status,
            headers: Default::default(),
            body: Value::String(String::new()),
            error: Some(message),
            success: false,
            duration: Some(0),
            metadata,
        }
    }
}

#[async_trait]
impl CommunicationStrategy for CliStrategy {
    fn name(&self) -> &str {
        "cli"
    }

    async fn execute(
        &self,
        request: CommunicationRequest,
    ) -> Result<CommunicationResponse, ProviderError> {
        let start = Instant::now();
        let cwd = self.resolve_working_directory(request.working_directory.as_deref());
        let timeout = Duration::from_millis(request.timeout.unwrap_or(self.config.timeout));
        let stdin_body = match &request.body {
            None => None,
            Some(Value::String(text)) => Some(text.clone().into_bytes()),
            Some(other) => Some(serde_json::to_vec(other)?),
        };

        if !cwd.is_dir() {
            let message = format!("Working directory does not exist: {}", cwd.display());
            return Err(if request.working_directory.is_some() {
                ProviderError::validation(codes::INVALID_OPTION, message)
            } else {
                ProviderError::configuration(codes::INVALID_CONFIG, message)
            }
            .with_details(json!({ "workingDirectory": cwd.display().to_string() })));
        }

        debug!(
            executable = %self.config.executable,
            args = ?request.args,
            cwd = %cwd.display(),
            "Spawning process"
        );

        let child = match self.build_command(&request, &cwd).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.not_found_response(
                    format!("Command not found: {}", self.config.executable),
                    COMMAND_NOT_FOUND,
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(self.not_found_response(
                    format!("Permission denied: {}", self.config.executable),
                    126,
                ));
            }
            Err(e) => {
                return Err(ProviderError::communication(
                    codes::SPAWN_FAILED,
                    format!("Failed to spawn {}: {e}", self.config.executable),
                )
                .with_cause(e));
            }
        };

        let outcome = self.run(child, stdin_body, timeout).await?;
        let duration = start.elapsed();

        let stdout_truncated = outcome.stdout.truncated;
        let stdout = outcome.stdout.into_string(OUTPUT_TRUNCATED_MARKER);
        let stderr_truncated = outcome.stderr.truncated;
        let stderr = outcome.stderr.into_string(ERROR_OUTPUT_TRUNCATED_MARKER);
        let success = outcome.exit_code == 0 && !outcome.timed_out;

        let error = if success {
            None
        } else if !stderr.trim().is_empty() {
            Some(stderr.clone())
        } else if outcome.timed_out {
            Some(format!("Process timed out after {}ms", timeout.as_millis()))
        } else if let Some(signal) = outcome.exit_signal {
            Some(format!("Process killed by {}", signal_name(signal)))
        } else {
            Some(format!("Process exited with code {}", outcome.exit_code))
        };

        let mut metadata = ConfigMap::new();
        metadata.insert("executable".into(), json!(self.config.executable));
        metadata.insert(
            "args".into(),
            json!(self
                .config
                .default_args
                .iter()
                .chain(request.args.iter())
                .collect::<Vec<_>>()),
        );
        metadata.insert("workingDirectory".into(), json!(cwd.display().to_string()));
        metadata.insert("exitCode".into(), json!(outcome.exit_code));
        metadata.insert("timedOut".into(), json!(outcome.timed_out));
        metadata.insert("killed".into(), json!(outcome.killed));
        metadata.insert("stdoutTruncated".into(), json!(stdout_truncated));
        metadata.insert("stderrTruncated".into(), json!(stderr_truncated));
        metadata.insert("stderr".into(), json!(stderr));
        metadata.insert("durationMs".into(), json!(duration.as_millis() as u64));
        if let Some(signal) = outcome.exit_signal {
            metadata.insert("signal".into(), json!(signal_name(signal)));
        }
        if let Some(pid) = outcome.pid {
            metadata.insert("pid".into(), json!(pid));
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("cli.execute", duration);

        Ok(CommunicationResponse {
            status: outcome.exit_code,
            headers: Default::default(),
            body: Value::String(stdout),
            error,
            success,
            duration: Some(duration.as_millis() as u64),
            metadata,
        })
    }

    /// Runs `<executable> --version`. Any exit other than 127 means the
    /// executable exists, even if it rejects the flag.
    async fn test_connection(&self) -> bool {
        let probe = CliStrategy {
            config: CliConfig {
                default_args: Vec::new(),
                timeout: VERSION_CHECK_TIMEOUT_MS.min(self.config.timeout),
                ..self.config.clone()
            },
            kill_signal: self.kill_signal,
        };
        match probe
            .execute(CommunicationRequest::cli(["--version"]))
            .await
        {
            Ok(response) => response.status != COMMAND_NOT_FOUND,
            Err(e) => {
                debug!(executable = %self.config.executable, error = %e, "CLI connection test failed");
                false
            }
        }
    }
}
