use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::rules::Outcome;

/// Root configuration container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Place the built-in rule table after any configured `[[rules]]`.
    #[serde(default = "default_true")]
    pub builtin_rules: bool,
    /// Extra match rules, tested before the built-in table.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// The dev-server command to supervise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to launch (e.g., "npx").
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; the literal `{port}` is replaced with the selected port.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Project directory the command runs in (default: current directory).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Keep a pipe open on the child's stdin instead of /dev/null.
    #[serde(default)]
    pub stdin_piped: bool,
}

/// Environment overrides passed to the child process only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Sets `EXPO_DEBUG=true`.
    #[serde(default = "default_true")]
    pub debug: bool,
    /// Sets `EXPO_METRO_MAX_WORKERS`.
    #[serde(default = "default_max_worker_count")]
    pub max_worker_count: Option<u32>,
    /// Sets `NODE_OPTIONS=--max-old-space-size=<mb>`.
    #[serde(default = "default_max_old_space_mb")]
    pub max_old_space_mb: Option<u32>,
    /// Sets `CI=1`, which turns off file watching and interactive prompts.
    #[serde(default)]
    pub disable_watch_mode: bool,
    /// Arbitrary extra variables.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Inclusive port range probed for a free dev-server port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_port_start")]
    pub start: u16,
    #[serde(default = "default_port_end")]
    pub end: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Wall-clock bound for one attempt to reach a ready signal.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
    /// Interval between resource-health heartbeats.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u64,
    /// Time between SIGTERM and SIGKILL when releasing a process.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of processes that may be launched.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_seconds: u64,
}

/// Resource-health thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "default_max_percent")]
    pub max_cpu_percent: f32,
    #[serde(default = "default_max_percent")]
    pub max_memory_percent: f32,
    /// Disk usage above this is logged as a warning.
    #[serde(default = "default_max_percent")]
    pub max_disk_percent: f32,
    #[serde(default = "default_min_free_disk_gb")]
    pub min_free_disk_gb: u64,
    /// Filesystem whose free space is checked.
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
}

/// Commands and paths used by remediation actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    /// Raises the inotify watch limit. Empty disables it.
    #[serde(default = "default_watch_limit_command")]
    pub watch_limit_command: Vec<String>,
    /// Optional command run after the cache directories are removed.
    #[serde(default)]
    pub cache_reset_command: Vec<String>,
    /// Cache directories removed on a corrupt-cache signal. Relative paths
    /// are resolved against the working dir, `~/` against the home dir.
    #[serde(default = "default_cache_dirs")]
    pub cache_dirs: Vec<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Used by `diagnose` to confirm the core packages are installed.
    #[serde(default = "default_dependency_check_command")]
    pub dependency_check_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write logs to this file (suffixed with timestamp and pid).
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Bundler-side log file dumped on final failure.
    #[serde(default)]
    pub aux_log_file: Option<PathBuf>,
}

/// A user-supplied match rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    /// Treat `pattern` as a regular expression instead of a substring.
    #[serde(default)]
    pub regex: bool,
    pub outcome: Outcome,
}

fn default_true() -> bool {
    true
}

fn default_program() -> String {
    "npx".to_string()
}

fn default_args() -> Vec<String> {
    ["expo", "start", "--port", "{port}", "--no-dev", "--minify"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_worker_count() -> Option<u32> {
    Some(2)
}

fn default_max_old_space_mb() -> Option<u32> {
    Some(512)
}

fn default_port_start() -> u16 {
    19000
}

fn default_port_end() -> u16 {
    19100
}

fn default_attempt_timeout() -> u64 {
    300
}

fn default_heartbeat() -> u64 {
    30
}

fn default_termination_grace_ms() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    30
}

fn default_backoff_max() -> u64 {
    300
}

fn default_max_percent() -> f32 {
    90.0
}

fn default_min_free_disk_gb() -> u64 {
    1
}

fn default_disk_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_string(), "install".to_string()]
}

fn default_watch_limit_command() -> Vec<String> {
    ["sudo", "-n", "sysctl", "-w", "fs.inotify.max_user_watches=524288"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cache_dirs() -> Vec<String> {
    ["~/.metro", "node_modules/.cache", ".expo/web/cache"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_dependency_check_command() -> Vec<String> {
    ["npm", "list", "expo", "react", "react-native"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: CommandConfig::default(),
            environment: EnvironmentConfig::default(),
            ports: PortsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            retry: RetryConfig::default(),
            resources: ResourcesConfig::default(),
            remediation: RemediationConfig::default(),
            logging: LoggingConfig::default(),
            builtin_rules: true,
            rules: Vec::new(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            stdin_piped: false,
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            debug: true,
            max_worker_count: default_max_worker_count(),
            max_old_space_mb: default_max_old_space_mb(),
            disable_watch_mode: false,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_seconds: default_attempt_timeout(),
            heartbeat_seconds: default_heartbeat(),
            termination_grace_ms: default_termination_grace_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_seconds: default_backoff_base(),
            backoff_max_seconds: default_backoff_max(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_max_percent(),
            max_memory_percent: default_max_percent(),
            max_disk_percent: default_max_percent(),
            min_free_disk_gb: default_min_free_disk_gb(),
            disk_path: default_disk_path(),
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            install_command: default_install_command(),
            watch_limit_command: default_watch_limit_command(),
            cache_reset_command: Vec::new(),
            cache_dirs: default_cache_dirs(),
            command_timeout_seconds: default_command_timeout(),
            dependency_check_command: default_dependency_check_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            aux_log_file: None,
        }
    }
}
