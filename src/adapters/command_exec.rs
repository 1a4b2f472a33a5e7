//! Local process executor for provisioning scripts.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::Agent;
use crate::error::ExecError;
use crate::runtime::{ContainerExec, ExecOutput};

/// Runs the full command line (`argv[0]` is the program) on the broker host.
#[derive(Debug, Clone, Default)]
pub struct CommandExec;

impl CommandExec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContainerExec for CommandExec {
    async fn exec(
        &self,
        agent: &Agent,
        container_id: &str,
        argv: &[String],
    ) -> Result<ExecOutput, ExecError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ExecError::Malformed("empty command line".to_string()))?;

        debug!(docker_host = %agent.docker_host, container = container_id, %program, ?args, "executing");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
