use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Result, SystemError};

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs host tools. Implementations may substitute canned output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Like `run`, but a non-zero exit status is an error.
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.run(program, args).await?;
        if output.code != 0 {
            return Err(SystemError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostCommandRunner;

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));
        let output = Command::new(program).args(args).output().await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
