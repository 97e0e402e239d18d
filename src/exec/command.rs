// src/exec/command.rs

//! Shell command executor used by config-defined graphs.

use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::{ExecFuture, NodeContext, NodeExecutor, NodeInput, NodeOutput, NodeResult};
use crate::types::OutputFormat;

/// Runs `cmd` through the platform shell.
///
/// The child sees:
/// - `LEVELFLOW_DEP_<ID>`: text rendering of each upstream output (id
///   upper-cased, non-alphanumerics replaced by `_`),
/// - `LEVELFLOW_PARAMS`: the node params as JSON, when set,
/// - `LEVELFLOW_STATE`: the shared state as a JSON object.
///
/// Stdout becomes the node output; stderr is logged at debug. A non-zero
/// exit status fails the node.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    cmd: String,
    output_format: OutputFormat,
}

impl CommandExecutor {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            output_format: OutputFormat::default(),
        }
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    fn shell(&self) -> Command {
        if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        }
    }

    async fn run(&self, ctx: NodeContext, input: NodeInput) -> anyhow::Result<Option<NodeResult>> {
        info!(node = %ctx.node, cmd = %self.cmd, "starting command");

        let mut cmd = self.shell();
        for (dep, result) in &input.upstream {
            let value = result.output.as_text().unwrap_or_default();
            cmd.env(dep_env_key(dep), value.into_owned());
        }
        if !input.params.is_null() {
            cmd.env("LEVELFLOW_PARAMS", input.params.to_string());
        }
        let shared = serde_json::to_string(&input.state.shared())
            .context("serialising shared state for command environment")?;
        cmd.env("LEVELFLOW_STATE", shared);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for node '{}'", ctx.node))?;

        // Always consume stderr so buffers don't fill.
        if let Some(stderr) = child.stderr.take() {
            let node = ctx.node.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(node = %node, "stderr: {}", line);
                }
            });
        }

        let stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_string(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        });

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .with_context(|| format!("waiting for process of node '{}'", ctx.node))?;
                let stdout = reader
                    .await
                    .context("joining stdout reader")?
                    .with_context(|| format!("reading stdout of node '{}'", ctx.node))?;

                let code = status.code().unwrap_or(-1);
                info!(
                    node = %ctx.node,
                    exit_code = code,
                    success = status.success(),
                    "command exited"
                );
                if !status.success() {
                    bail!("command `{}` exited with status {code}", self.cmd);
                }

                Ok(Some(NodeResult::new(self.decode(stdout)?)))
            }

            _ = ctx.cancelled() => {
                info!(node = %ctx.node, "cancellation requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(node = %ctx.node, error = %e, "failed to kill child process on cancellation");
                }
                bail!("command for node '{}' was cancelled", ctx.node)
            }
        }
    }

    fn decode(&self, stdout: String) -> anyhow::Result<NodeOutput> {
        match self.output_format {
            OutputFormat::Text => Ok(NodeOutput::Json(serde_json::Value::String(
                stdout.trim_end().to_string(),
            ))),
            OutputFormat::Json => serde_json::from_str(&stdout)
                .map(NodeOutput::Json)
                .context("command stdout is not valid JSON"),
        }
    }
}

impl NodeExecutor for CommandExecutor {
    fn execute(&self, ctx: NodeContext, input: NodeInput) -> ExecFuture<'_> {
        Box::pin(self.run(ctx, input))
    }
}

/// `fetch-data` → `LEVELFLOW_DEP_FETCH_DATA`.
pub fn dep_env_key(id: &str) -> String {
    let suffix: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("LEVELFLOW_DEP_{suffix}")
}
