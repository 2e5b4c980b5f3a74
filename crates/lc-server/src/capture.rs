//! Capture-session lifecycle.
//!
//! A capture session is a long-running background recording process spawned
//! detached from the handling request. Per token the manager keeps exactly
//! two files under the captures directory:
//!
//! - `capture-{token}.pid` — exists while the session is believed Running;
//!   its presence is the single source of truth for liveness.
//! - `capture-{token}.log` — the recorded output, retained after stop until
//!   an explicit delete.
//!
//! State machine per token: Idle -> Running (start) -> Stopped (stop,
//! pid file removed) -> Deleted (delete, log file removed). Deleted is
//! terminal.
//!
//! Tokens are `{resource}-{uuid}`, which ties a session to its resource and
//! preserves the one-active-session-per-resource rule: `start` refuses while
//! any pid file for the resource exists, and a per-resource mutex keeps
//! concurrent starts from racing that check.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lc_core::config::Settings;
use lc_core::error::{LcError, LcResult};
use lc_core::model::{merged_attrs, Board, CommandKind, Resource, ResourceKind};
use lc_core::template;
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

/// Manages background recording processes identified by opaque tokens.
pub struct CaptureManager {
    captures_dir: PathBuf,
    poll_interval: Duration,
    term_wait: Duration,
    kill_wait: Duration,
    start_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CaptureManager {
    /// Create the manager, making sure the captures directory exists.
    pub fn new(settings: &Settings) -> LcResult<Self> {
        let captures_dir = settings.captures_dir();
        std::fs::create_dir_all(&captures_dir)
            .map_err(|e| LcError::storage(&format!("create {}", captures_dir.display()), e))?;
        Ok(Self {
            captures_dir,
            poll_interval: Duration::from_millis(settings.stop_poll_interval_ms),
            term_wait: Duration::from_secs(settings.stop_term_wait_secs),
            kill_wait: Duration::from_secs(settings.stop_kill_wait_secs),
            start_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding pid and log files (also used for put-data scratch
    /// files).
    pub fn dir(&self) -> &Path {
        &self.captures_dir
    }

    fn pid_path(&self, token: &str) -> PathBuf {
        self.captures_dir.join(format!("capture-{}.pid", token))
    }

    fn log_path(&self, token: &str) -> PathBuf {
        self.captures_dir.join(format!("capture-{}.log", token))
    }

    /// Extract the resource name a token belongs to.
    ///
    /// Tokens are `{resource}-{uuid simple}`; the uuid part is always 32 hex
    /// characters, so the resource name may itself contain dashes.
    pub fn resource_of_token(token: &str) -> Option<&str> {
        let (resource, tail) = token.rsplit_once('-')?;
        if resource.is_empty() || tail.len() != 32 {
            return None;
        }
        if !tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(resource)
    }

    fn start_lock(&self, resource: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.start_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(resource.to_string()).or_default().clone()
    }

    /// Find a Running session's token for a resource, if any.
    async fn running_token_for(&self, resource: &str) -> LcResult<Option<String>> {
        let mut entries = fs::read_dir(&self.captures_dir).await.map_err(|e| {
            LcError::storage(&format!("read {}", self.captures_dir.display()), e)
        })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LcError::storage("read captures dir", e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(token) = file_name
                .strip_prefix("capture-")
                .and_then(|s| s.strip_suffix(".pid"))
            else {
                continue;
            };
            if Self::resource_of_token(token) == Some(resource) {
                return Ok(Some(token.to_string()));
            }
        }
        Ok(None)
    }

    /// Start a capture session: Idle -> Running.
    ///
    /// Resolves the resource's capture template with an injected `logfile`
    /// variable, spawns the process detached, records its pid, and returns
    /// the fresh token immediately — not when capture completes.
    pub async fn start(&self, board: &Board, resource: &Resource) -> LcResult<String> {
        let template = resource
            .command_template(CommandKind::Capture)
            .ok_or_else(|| {
                LcError::Validation(format!(
                    "resource '{}' has no capture command",
                    resource.name
                ))
            })?;

        let lock = self.start_lock(&resource.name);
        let _guard = lock.lock().await;

        if let Some(token) = self.running_token_for(&resource.name).await? {
            return Err(LcError::Conflict(format!(
                "resource '{}' already has a running capture session ({})",
                resource.name, token
            )));
        }

        let token = format!("{}-{}", resource.name, Uuid::new_v4().simple());
        let log_path = self.log_path(&token);

        let mut vars = merged_attrs(board, resource);
        vars.insert("logfile".into(), log_path.display().to_string());
        let argv = template::resolve(template, &vars)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| LcError::Validation("empty capture command".into()))?;

        // The log file backs the child's stdout/stderr, so output ends up
        // there even when the command ignores {logfile}.
        let log_file = std::fs::File::create(&log_path)
            .map_err(|e| LcError::storage(&format!("create {}", log_path.display()), e))?;
        let log_err = log_file
            .try_clone()
            .map_err(|e| LcError::storage("clone log handle", e))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| {
                LcError::Execution(format!("failed to spawn capture '{}': {}", program, e))
            })?;

        let pid = child.id().ok_or_else(|| {
            LcError::Execution(format!("capture '{}' exited before pid was recorded", program))
        })?;

        fs::write(self.pid_path(&token), format!("{}\n", pid))
            .await
            .map_err(|e| LcError::storage("write pid file", e))?;

        // The child is deliberately not awaited; dropping the handle leaves
        // the process running past this request's lifetime.
        drop(child);

        tracing::info!(resource = %resource.name, token = %token, pid, "capture session started");
        Ok(token)
    }

    /// Stop a Running session: Running -> Stopped.
    ///
    /// Sends SIGTERM and polls for exit; after the configured wait escalates
    /// to SIGKILL, and after a further wait reports a timeout instead of
    /// hanging the caller. On confirmed exit the pid file is removed and the
    /// log file left untouched.
    pub async fn stop(&self, token: &str) -> LcResult<()> {
        let pid_path = self.pid_path(token);
        let text = match fs::read_to_string(&pid_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LcError::NotFound(format!(
                    "no running capture session for token '{}'",
                    token
                )));
            }
            Err(e) => return Err(LcError::storage("read pid file", e)),
        };
        let pid: i32 = text
            .trim()
            .parse()
            .map_err(|_| LcError::Storage(format!("corrupt pid file for token '{}'", token)))?;
        // kill() with pid 0 or a negative value addresses whole process
        // groups; a pid file naming one is corrupt, not a session.
        if pid <= 1 {
            return Err(LcError::Storage(format!(
                "corrupt pid file for token '{}' (pid {})",
                token, pid
            )));
        }

        if is_pid_alive(pid) {
            send_signal(pid, libc::SIGTERM);
            if !self.poll_until_gone(pid, self.term_wait).await {
                tracing::warn!(token, pid, "capture ignored SIGTERM, escalating to SIGKILL");
                send_signal(pid, libc::SIGKILL);
                if !self.poll_until_gone(pid, self.kill_wait).await {
                    return Err(LcError::Timeout(format!(
                        "capture process {} for token '{}' survived SIGKILL",
                        pid, token
                    )));
                }
            }
        }

        fs::remove_file(&pid_path)
            .await
            .map_err(|e| LcError::storage("remove pid file", e))?;
        tracing::info!(token, pid, "capture session stopped");
        Ok(())
    }

    async fn poll_until_gone(&self, pid: i32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if !is_pid_alive(pid) {
                return true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        !is_pid_alive(pid)
    }

    /// Fetch captured data: valid in Running and Stopped.
    ///
    /// Power-measurement logs are normalized line by line from raw
    /// `timestamp,milli_volts,milli_amps` records into volts and amps; other
    /// kinds return the raw text. No integrity check is made — a partially
    /// written log yields whatever bytes are on disk.
    pub async fn fetch(&self, token: &str, kind: ResourceKind) -> LcResult<serde_json::Value> {
        let log_path = self.log_path(token);
        let raw = match fs::read_to_string(&log_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LcError::NotFound(format!(
                    "no capture data for token '{}'",
                    token
                )));
            }
            Err(e) => return Err(LcError::storage("read capture log", e)),
        };

        match kind {
            ResourceKind::PowerMeasurement => Ok(normalize_power_log(&raw)),
            _ => Ok(serde_json::Value::String(raw)),
        }
    }

    /// Delete a Stopped session's log: Stopped -> Deleted (terminal).
    pub async fn delete(&self, token: &str) -> LcResult<()> {
        let log_path = self.log_path(token);
        match fs::remove_file(&log_path).await {
            Ok(()) => {
                tracing::info!(token, "capture data deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LcError::NotFound(format!(
                "no capture data for token '{}'",
                token
            ))),
            Err(e) => Err(LcError::storage("remove capture log", e)),
        }
    }
}

/// Turn raw `timestamp,milli_volts,milli_amps` lines into normalized records.
/// Lines that do not parse (for example a partially written tail) are
/// dropped from the normalized view.
fn normalize_power_log(raw: &str) -> serde_json::Value {
    let mut records = Vec::new();
    for line in raw.lines() {
        let mut parts = line.trim().splitn(3, ',');
        let (Some(ts), Some(mv), Some(ma)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(mv), Ok(ma)) = (mv.trim().parse::<f64>(), ma.trim().parse::<f64>()) else {
            continue;
        };
        records.push(serde_json::json!({
            "timestamp": ts.trim(),
            "voltage": mv / 1000.0,
            "current": ma / 1000.0,
        }));
    }
    serde_json::Value::Array(records)
}

/// kill(pid, 0) probes for existence without sending a signal.
///
/// There is no identity check beyond the recorded pid: a pid recycled by the
/// OS after the capture process died would be probed (and on stop, signaled)
/// in its place. Pid files are removed on every confirmed stop, which keeps
/// the window to sessions that ended without one.
fn is_pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn send_signal(pid: i32, signal: i32) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}
