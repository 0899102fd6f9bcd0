//! Typed configuration: optional TOML file, then environment overrides.
//!
//! Loaded once at startup and validated before anything runs. A bad worker
//! executable is fatal here rather than a string of failed jobs later.
//! The API token is wrapped in `SecretString` so it never lands in logs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::OrchestratorConfig;
use crate::error::{Error, Result};

/// Which worker execution strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    InProcess,
    Process,
}

impl FromStr for WorkerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_process" | "in-process" | "task" => Ok(WorkerMode::InProcess),
            "process" | "out_of_process" => Ok(WorkerMode::Process),
            other => Err(Error::Config(format!("unknown worker mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    /// Executable run per job in `process` mode.
    pub command: Option<PathBuf>,
    /// Arguments placed before the handoff path.
    pub args: Vec<String>,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Bearer token required on every route except `/health`.
    pub api_token: Option<SecretString>,
}

#[derive(Debug)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub worker: WorkerConfig,
    pub server: ServerConfig,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            worker: WorkerConfig {
                mode: WorkerMode::InProcess,
                command: None,
                args: Vec::new(),
            },
            server: ServerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 8420)),
                api_token: None,
            },
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file plus the process environment.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("cannot read config file {}: {e}", path.display()))
            })?),
            None => None,
        };
        Self::from_sources(file.as_deref(), |name| std::env::var(name).ok())
    }

    /// Environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Build from TOML text and an environment lookup, then validate.
    pub fn from_sources(
        toml_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();
        if let Some(text) = toml_text {
            let file: FileConfig = toml::from_str(text)
                .map_err(|e| Error::Config(format!("bad config file: {e}")))?;
            file.apply(&mut config)?;
        }
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let o = &mut self.orchestrator;
        if let Some(n) = parse_var(&env, "INGESTQ_MAX_CONCURRENT_JOBS")? {
            o.max_concurrent_jobs = n;
        }
        if let Some(secs) = parse_var(&env, "INGESTQ_DEDUP_INTERVAL_SECONDS")? {
            o.dedup_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&env, "INGESTQ_DISPATCH_INTERVAL_MS")? {
            o.dispatch_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&env, "INGESTQ_PROGRESS_INTERVAL_MS")? {
            o.progress_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = env("INGESTQ_STATE_DIR") {
            o.state_dir = PathBuf::from(dir);
        }
        if let Some(keep) = parse_var(&env, "INGESTQ_KEEP_STATUS_LOGS")? {
            o.keep_status_logs = keep;
        }
        if let Some(mode) = parse_var(&env, "INGESTQ_WORKER_MODE")? {
            self.worker.mode = mode;
        }
        if let Some(command) = env("INGESTQ_WORKER_COMMAND") {
            self.worker.command = Some(PathBuf::from(command));
        }
        if let Some(bind) = parse_var(&env, "INGESTQ_BIND")? {
            self.server.bind = bind;
        }
        if let Some(token) = env("INGESTQ_API_TOKEN") {
            self.server.api_token = Some(SecretString::from(token));
        }
        if let Some(endpoint) = env("OTEL_ENDPOINT") {
            self.otel_endpoint = Some(endpoint);
        }
        if let Some(level) = env("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if o.dispatch_interval.is_zero() || o.progress_interval.is_zero() {
            return Err(Error::Config("poll intervals must be non-zero".to_string()));
        }
        if self.worker.mode == WorkerMode::Process {
            let command = self.worker.command.as_ref().ok_or_else(|| {
                Error::Config("worker mode `process` requires a worker command".to_string())
            })?;
            if !command.is_file() {
                return Err(Error::Config(format!(
                    "worker command {} does not exist or is not a file",
                    command.display()
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}")))
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// TOML file layout
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    orchestrator: FileOrchestrator,
    worker: FileWorker,
    server: FileServer,
    telemetry: FileTelemetry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileOrchestrator {
    max_concurrent_jobs: Option<usize>,
    dedup_interval_seconds: Option<u64>,
    dispatch_interval_ms: Option<u64>,
    progress_interval_ms: Option<u64>,
    state_dir: Option<PathBuf>,
    keep_status_logs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileWorker {
    mode: Option<WorkerMode>,
    command: Option<PathBuf>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileServer {
    bind: Option<String>,
    api_token: Option<SecretString>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileTelemetry {
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl FileConfig {
    fn apply(self, config: &mut Config) -> Result<()> {
        let o = &mut config.orchestrator;
        let f = self.orchestrator;
        if let Some(n) = f.max_concurrent_jobs {
            o.max_concurrent_jobs = n;
        }
        if let Some(secs) = f.dedup_interval_seconds {
            o.dedup_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = f.dispatch_interval_ms {
            o.dispatch_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = f.progress_interval_ms {
            o.progress_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = f.state_dir {
            o.state_dir = dir;
        }
        if let Some(keep) = f.keep_status_logs {
            o.keep_status_logs = keep;
        }

        if let Some(mode) = self.worker.mode {
            config.worker.mode = mode;
        }
        if let Some(command) = self.worker.command {
            config.worker.command = Some(command);
        }
        if let Some(args) = self.worker.args {
            config.worker.args = args;
        }

        if let Some(bind) = self.server.bind {
            config.server.bind = bind
                .parse()
                .map_err(|e| Error::Config(format!("invalid server.bind={bind}: {e}")))?;
        }
        if let Some(token) = self.server.api_token {
            config.server.api_token = Some(token);
        }

        if let Some(endpoint) = self.telemetry.otel_endpoint {
            config.otel_endpoint = Some(endpoint);
        }
        if let Some(level) = self.telemetry.log_level {
            config.log_level = level;
        }
        Ok(())
    }
}
