use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::command::CommandType;

const MAX_OUTPUT_BYTES: usize = 4096;

/// What running a command did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub ok: bool,
    pub output: Value,
}

/// Side-effecting collaborator behind the executor gateway. Never called
/// outside the gateway's transaction.
pub trait Performer: Send + Sync {
    fn name(&self, command_type: CommandType) -> &str;

    fn perform<'a>(
        &'a self,
        command_type: CommandType,
        parameters: &'a Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Effect>> + Send + 'a>>;
}

/// Emits nothing. Echoes the command so the effect is deterministic.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPerformer;

impl Performer for SimulatedPerformer {
    fn name(&self, command_type: CommandType) -> &str {
        if command_type.is_ui() { "AX" } else { "SHELL" }
    }

    fn perform<'a>(
        &'a self,
        command_type: CommandType,
        parameters: &'a Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Effect>> + Send + 'a>> {
        Box::pin(async move {
            Ok(Effect {
                ok: true,
                output: json!({
                    "emitted": command_type,
                    "params": parameters,
                    "simulated": true,
                }),
            })
        })
    }
}

/// Runs allowlisted shell commands without a shell, inside the workspace.
#[derive(Debug, Clone)]
pub struct ShellPerformer {
    workspace: PathBuf,
    timeout: Duration,
}

impl ShellPerformer {
    pub fn new(workspace: PathBuf, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }
}

impl Performer for ShellPerformer {
    fn name(&self, _command_type: CommandType) -> &str {
        "SHELL"
    }

    fn perform<'a>(
        &'a self,
        command_type: CommandType,
        parameters: &'a Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Effect>> + Send + 'a>> {
        Box::pin(async move {
            anyhow::ensure!(
                command_type == CommandType::Cli,
                "shell performer cannot run {command_type}"
            );
            let command = parameters
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut words = command.split_whitespace();
            let Some(program) = words.next() else {
                anyhow::bail!("empty shell command");
            };

            let mut child = tokio::process::Command::new(program);
            child
                .args(words)
                .current_dir(&self.workspace)
                .kill_on_drop(true);

            let effect = match tokio::time::timeout(self.timeout, child.output()).await {
                Ok(Ok(output)) => Effect {
                    ok: output.status.success(),
                    output: json!({
                        "exit_code": output.status.code(),
                        "stdout": truncate(&String::from_utf8_lossy(&output.stdout)),
                        "stderr": truncate(&String::from_utf8_lossy(&output.stderr)),
                    }),
                },
                Ok(Err(e)) => Effect {
                    ok: false,
                    output: json!({ "error": format!("spawn failed: {e}") }),
                },
                Err(_) => Effect {
                    ok: false,
                    output: json!({
                        "error": format!("timed out after {}s", self.timeout.as_secs())
                    }),
                },
            };
            tracing::info!(program, ok = effect.ok, "shell command finished");
            Ok(effect)
        })
    }
}

/// Routes `cli` to the shell performer and everything else to the UI one.
#[derive(Clone)]
pub struct DispatchPerformer {
    ui: Arc<dyn Performer>,
    shell: Arc<dyn Performer>,
}

impl DispatchPerformer {
    pub fn new(ui: Arc<dyn Performer>, shell: Arc<dyn Performer>) -> Self {
        Self { ui, shell }
    }

    /// Fully simulated, or a real shell in `workspace` with simulated UI.
    pub fn from_settings(simulation: bool, workspace: PathBuf, shell_timeout: Duration) -> Self {
        let ui: Arc<dyn Performer> = Arc::new(SimulatedPerformer);
        let shell: Arc<dyn Performer> = if simulation {
            Arc::new(SimulatedPerformer)
        } else {
            Arc::new(ShellPerformer::new(workspace, shell_timeout))
        };
        Self::new(ui, shell)
    }

    fn route(&self, command_type: CommandType) -> &dyn Performer {
        if command_type.is_ui() {
            self.ui.as_ref()
        } else {
            self.shell.as_ref()
        }
    }
}

impl std::fmt::Debug for DispatchPerformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPerformer").finish_non_exhaustive()
    }
}

impl Performer for DispatchPerformer {
    fn name(&self, command_type: CommandType) -> &str {
        if command_type.is_ui() { "AX" } else { "SHELL" }
    }

    fn perform<'a>(
        &'a self,
        command_type: CommandType,
        parameters: &'a Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Effect>> + Send + 'a>> {
        self.route(command_type).perform(command_type, parameters)
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &text[..end])
}
