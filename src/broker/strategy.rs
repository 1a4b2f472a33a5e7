//! Provisioning strategies
//!
//! An image definition either carries its connection data (static) or relies
//! on scripts baked into the container that are run through an executor.

use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::domain::{Agent, Credentials, ImageDefinition};
use crate::error::{BrokerError, ExecError, Result};
use crate::runtime::{ContainerExec, ExecOutput};

/// Exit code a script uses to say "nothing to do".
pub const NOOP_EXIT_CODE: i32 = 1;

/// Lifecycle step handed to a provisioning script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Provision,
    Bind,
    Unbind { service_url: String },
    Deprovision,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Provision => "provision",
            Verb::Bind => "bind",
            Verb::Unbind { .. } => "unbind",
            Verb::Deprovision => "deprovision",
        }
    }

    /// Container-side script path followed by its arguments.
    pub fn script_args(&self) -> Vec<String> {
        let mut args = vec![format!("/{}", self.name())];
        if let Verb::Unbind { service_url } = self {
            args.push(service_url.clone());
        }
        args
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Executors an agent can name in its `exec_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// `[exec_args..] docker-enter <container> <script> [args..]`
    DockerCommandExec,
}

impl ExecutorKind {
    pub fn from_command(name: &str) -> Result<Self> {
        match name.trim() {
            "DockerCommandExec" => Ok(Self::DockerCommandExec),
            "" => Err(BrokerError::NoExecutor(
                "agent has no exec command configured".to_string(),
            )),
            other => Err(BrokerError::NoExecutor(format!(
                "unknown exec command '{}'",
                other
            ))),
        }
    }

    pub fn command_line(&self, agent: &Agent, container_id: &str, verb: &Verb) -> Vec<String> {
        match self {
            Self::DockerCommandExec => {
                let mut argv = agent.exec_prefix();
                argv.push("docker-enter".to_string());
                argv.push(container_id.to_string());
                argv.extend(verb.script_args());
                argv
            }
        }
    }
}

/// How connection data for an image is obtained and released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Static {
        dashboard_url: Credentials,
        credentials: Credentials,
    },
    Script(ExecutorKind),
}

impl Strategy {
    /// Static whenever the image carries data, otherwise the agent's executor.
    pub fn select(image: &ImageDefinition, agent: &Agent) -> Result<Self> {
        if image.is_static() {
            return Ok(Self::fixed(image));
        }
        Ok(Self::Script(ExecutorKind::from_command(&agent.exec_command)?))
    }

    /// Strategy for an image definition that must be static.
    pub fn fixed(image: &ImageDefinition) -> Self {
        Self::Static {
            dashboard_url: image.dashboard_url.clone(),
            credentials: image.credentials.clone(),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static { .. })
    }

    /// Run one lifecycle step. `None` means the step produced no data.
    pub async fn run(
        &self,
        exec: &dyn ContainerExec,
        agent: &Agent,
        container_id: &str,
        verb: &Verb,
    ) -> std::result::Result<Option<Credentials>, ExecError> {
        match self {
            Self::Static {
                dashboard_url,
                credentials,
            } => Ok(match verb {
                Verb::Provision => Some(dashboard_url.clone()),
                Verb::Bind => Some(credentials.clone()),
                Verb::Unbind { .. } | Verb::Deprovision => None,
            }),
            Self::Script(kind) => {
                let argv = kind.command_line(agent, container_id, verb);
                debug!(container = container_id, verb = %verb, ?argv, "running provisioning script");
                let output = exec.exec(agent, container_id, &argv).await?;
                interpret_output(&output)
            }
        }
    }
}

/// Accept exit 0 and the no-op exit, then parse stdout as a flat JSON object.
pub fn interpret_output(output: &ExecOutput) -> std::result::Result<Option<Credentials>, ExecError> {
    match output.exit_code {
        Some(0) | Some(NOOP_EXIT_CODE) => {}
        code => {
            return Err(ExecError::ExitStatus {
                code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(stdout)
        .map_err(|e| ExecError::Malformed(format!("{}: {}", e, stdout)))?;
    let Value::Object(map) = value else {
        return Err(ExecError::Malformed(format!("expected a JSON object: {}", stdout)));
    };

    let mut fields = Credentials::new();
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            Value::Array(_) | Value::Object(_) => {
                return Err(ExecError::Malformed(format!("nested value for key '{}'", key)))
            }
        };
        fields.insert(key, text);
    }
    Ok(Some(fields))
}
