//! Script runner for automatic tasks.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use stepflow_core::{Process, Task};

use crate::config::ScriptConfig;

/// Script execution errors. A timeout counts the same as a failing exit.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Task has no script")]
    Missing,

    #[error("Failed to spawn script: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Script timed out after {0:?}")]
    Timeout(Duration),

    #[error("Script exited with code {0}")]
    NonZeroExit(i32),
}

/// Runs the script of an automatic task and reports its exit code.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run_script(&self, process: &Process, task: &Task) -> Result<i32, ScriptError>;
}

/// Substitute the process and task placeholders in a command line.
pub fn render_command(command: &str, process: &Process, task: &Task) -> String {
    command
        .replace("{processid}", process.id.as_str())
        .replace("{processtitle}", &process.title)
        .replace("{taskid}", task.id.as_str())
        .replace("{tasktitle}", &task.title)
}

/// Runs scripts as shell command lines.
pub struct CommandScriptRunner {
    config: ScriptConfig,
}

impl CommandScriptRunner {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ScriptRunner for CommandScriptRunner {
    async fn run_script(&self, process: &Process, task: &Task) -> Result<i32, ScriptError> {
        let script = task.script.as_ref().ok_or(ScriptError::Missing)?;
        let command_line = render_command(&script.command, process, task);
        debug!(task_id = %task.id, script = %script.name, command = %command_line, "Spawning script");

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let limit = Duration::from_secs(self.config.timeout_secs);
        let status = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => return Err(ScriptError::Timeout(limit)),
        };

        // No code when killed by a signal
        let code = status.code().unwrap_or(-1);
        info!(task_id = %task.id, script = %script.name, exit_code = code, "Script finished");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::{ProcessId, ScriptSpec};

    fn fixture(command: &str) -> (Process, Task) {
        let pid = ProcessId::new("p7");
        let task = Task::new(pid.clone(), "OCR", 1)
            .with_id("t9")
            .automatic(ScriptSpec::new("ocr", command));
        let process = Process::with_id(pid, "Herbarium", vec![task]).unwrap();
        let task = process.tasks()[0].clone();
        (process, task)
    }

    #[test]
    fn test_render_command() {
        let (process, task) = fixture("ocr --id {processid} --title '{processtitle}' {taskid}/{tasktitle}");
        assert_eq!(
            render_command(&task.script.as_ref().unwrap().command, &process, &task),
            "ocr --id p7 --title 'Herbarium' t9/OCR"
        );
    }

    #[tokio::test]
    async fn test_command_runner_exit_codes() {
        let runner = CommandScriptRunner::new(ScriptConfig::default());

        let (process, task) = fixture("exit 0");
        assert_eq!(runner.run_script(&process, &task).await.unwrap(), 0);

        let (process, task) = fixture("exit 3");
        assert_eq!(runner.run_script(&process, &task).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_command_runner_timeout() {
        let runner = CommandScriptRunner::new(ScriptConfig {
            timeout_secs: 1,
            ..ScriptConfig::default()
        });
        let (process, task) = fixture("sleep 5");
        assert!(matches!(
            runner.run_script(&process, &task).await,
            Err(ScriptError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_script() {
        let pid = ProcessId::new("p");
        let process = Process::with_id(pid.clone(), "Book", vec![Task::new(pid, "Scan", 1)]).unwrap();
        let runner = CommandScriptRunner::new(ScriptConfig::default());
        assert!(matches!(
            runner.run_script(&process, &process.tasks()[0]).await,
            Err(ScriptError::Missing)
        ));
    }
}
