//! External command execution
//!
//! Every stage drives an external tool (dependency fetcher, compiler,
//! toolchain installer, the artifact itself). The `CommandRunner` trait is
//! the seam between the pipeline core and those tools, so the orchestration
//! logic stays testable without a real toolchain installed.

use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A fully resolved command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,
    /// Arguments (no shell interpretation)
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables added on top of the ambient environment
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Build a spec from a command line (program followed by arguments)
    pub fn from_command_line(command: &[String]) -> KilnResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| KilnError::User("Empty command line in configuration".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: None,
            env: HashMap::new(),
        })
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 if terminated by signal)
    pub code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited successfully
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Abstract command execution interface
///
/// The pipeline only ever talks to external tools through this trait.
/// Production uses `ProcessRunner`; tests substitute scripted fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing output
    async fn run(&self, spec: &CommandSpec) -> KilnResult<CommandOutput>;
}

/// Command runner backed by real OS processes
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> KilnResult<CommandOutput> {
        debug!("Executing: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| KilnError::command_failed(spec.display(), e))?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner for stage unit tests

    use super::*;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&CommandSpec) -> KilnResult<CommandOutput> + Send + Sync>;

    /// Runner that records every invocation and answers from a closure
    pub(crate) struct ScriptedRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        handler: Handler,
    }

    impl ScriptedRunner {
        pub fn new(
            handler: impl Fn(&CommandSpec) -> KilnResult<CommandOutput> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(vec![]),
                handler: Box::new(handler),
            }
        }

        /// Runner that succeeds for every command
        pub fn always_ok() -> Self {
            Self::new(|_| Ok(ok_output()))
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> KilnResult<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            (self.handler)(spec)
        }
    }

    pub(crate) fn ok_output() -> CommandOutput {
        CommandOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub(crate) fn failed_output(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}
