use std::path::PathBuf;

use crate::config::Config;
use crate::env::EnvSet;

/// Placeholder replaced with the selected port in args and env values.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Everything needed to launch the dev-server process once.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Applied to the child only.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    pub stdin_piped: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
            stdin_piped: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.command.program.clone(),
            args: config.command.args.clone(),
            env: EnvSet::new().with_overrides(&config.environment).build(),
            working_dir: config.command.working_dir.clone(),
            stdin_piped: config.command.stdin_piped,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Concrete spec for one attempt on `port`.
    pub fn for_port(&self, port: u16) -> CommandSpec {
        let port = port.to_string();
        let substitute = |s: &String| s.replace(PORT_PLACEHOLDER, &port);
        CommandSpec {
            program: self.program.clone(),
            args: self.args.iter().map(substitute).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v)))
                .collect(),
            working_dir: self.working_dir.clone(),
            stdin_piped: self.stdin_piped,
        }
    }

    /// Command line for log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
