use super::stream::StreamFold;
use super::{AgentInvoker, AgentRequest, AgentResponse};
use crate::errors::AgentError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Runs agents through the `claude` CLI in print mode.
///
/// Each invocation is a fresh process with a fresh context: the agent
/// definition goes in as the system prompt, the task on stdin, and the
/// stream-json events on stdout are folded into the response.
#[derive(Debug, Clone)]
pub struct ClaudeCliAgent {
    command: String,
    model: Option<String>,
}

impl ClaudeCliAgent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Arguments for one invocation, excluding the command itself.
    pub fn args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--system-prompt".to_string(),
            request.system_prompt.clone(),
        ];
        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl AgentInvoker for ClaudeCliAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let start = Instant::now();
        let mut child = Command::new(&self.command)
            .args(self.args(&request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: self.command.clone(),
                source,
            })?;
        tracing::debug!(pid = child.id().unwrap_or(0), cwd = %request.working_dir.display(), "agent process spawned");

        // Drain stderr concurrently so a chatty agent cannot block on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        // Task via stdin, then close it so the agent starts. Fed alongside the
        // stdout read so neither side waits on a full pipe.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            let task = request.task.clone();
            tokio::spawn(async move {
                stdin.write_all(task.as_bytes()).await?;
                stdin.shutdown().await
            })
        });

        let mut fold = StreamFold::default();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                fold.push_line(&line);
            }
        }

        if let Some(handle) = stdin_task {
            match handle.await {
                // An agent that exits early closes the pipe; its exit status says why
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                Err(e) => tracing::warn!("stdin writer task failed: {}", e),
                _ => {}
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!(
            exit_code,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "agent process finished"
        );

        if !status.success() {
            return Err(AgentError::NonZeroExit {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }
        if fold.is_error() {
            let response = fold.finish();
            return Err(AgentError::Reported(response.text.trim().to_string()));
        }
        Ok(fold.finish())
    }
}
