use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::process::{ProcessSpec, Timeouts, run_streaming};
use super::{AgentBackend, InvocationRequest};
use crate::errors::AgentError;
use crate::permissions::bridge::{SERVER_NAME, prompt_tool_name};
use crate::stream::{ClaudeFold, FoldOutcome};

/// Claude CLI in non-interactive stream-json mode.
pub struct ClaudeBackend {
    command: String,
    timeouts: Timeouts,
    allow_all_tools: bool,
    disallowed_tools: Vec<String>,
    /// Executable launched as the MCP permission bridge.
    bridge_exe: Option<PathBuf>,
}

impl ClaudeBackend {
    pub fn new(command: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            command: command.into(),
            timeouts,
            allow_all_tools: false,
            disallowed_tools: Vec::new(),
            bridge_exe: None,
        }
    }

    pub fn with_allow_all_tools(mut self, allow_all: bool) -> Self {
        self.allow_all_tools = allow_all;
        self
    }

    pub fn with_disallowed_tools(mut self, tools: Vec<String>) -> Self {
        self.disallowed_tools = tools;
        self
    }

    pub fn with_bridge_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.bridge_exe = Some(exe.into());
        self
    }

    fn bridge_exe(&self) -> Result<PathBuf, AgentError> {
        match &self.bridge_exe {
            Some(exe) => Ok(exe.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    /// Command-line flags for one invocation. `mcp_config` is the path of
    /// the temporary MCP config when the permission gateway is in use.
    pub fn build_args(&self, request: &InvocationRequest, mcp_config: Option<&Path>) -> Vec<String> {
        let mut args: Vec<String> = ["--print", "--output-format", "stream-json", "--verbose"]
            .into_iter()
            .map(String::from)
            .collect();

        if let Some(model) = &request.model {
            args.push("--model".into());
            args.push(model.clone());
        }

        if self.allow_all_tools {
            args.push("--dangerously-skip-permissions".into());
        } else {
            if let Some(config) = mcp_config {
                args.push("--mcp-config".into());
                args.push(config.to_string_lossy().into_owned());
                args.push("--permission-prompt-tool".into());
                args.push(prompt_tool_name());
            }
            if !request.allowed_tools.is_empty() {
                args.push("--allowedTools".into());
                args.push(request.allowed_tools.join(","));
            }
        }

        if !self.disallowed_tools.is_empty() {
            args.push("--disallowedTools".into());
            args.push(self.disallowed_tools.join(","));
        }
        args
    }
}

/// MCP config that starts `exe permission-bridge --socket <socket>`.
pub fn mcp_config(exe: &Path, socket: &Path) -> serde_json::Value {
    json!({
        "mcpServers": {
            SERVER_NAME: {
                "command": exe.to_string_lossy(),
                "args": ["permission-bridge", "--socket", socket.to_string_lossy()]
            }
        }
    })
}

#[async_trait]
impl AgentBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    fn supports_permission_gateway(&self) -> bool {
        !self.allow_all_tools
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<FoldOutcome, AgentError> {
        // Held until the process exits; removed on drop.
        let config_file = match (&request.permission_socket, self.allow_all_tools) {
            (Some(socket), false) => {
                let config = mcp_config(&self.bridge_exe()?, socket);
                let file = tempfile::Builder::new()
                    .prefix("anvil-mcp-")
                    .suffix(".json")
                    .tempfile()?;
                std::fs::write(file.path(), config.to_string()).map_err(|source| {
                    AgentError::TempFile {
                        path: file.path().to_path_buf(),
                        source,
                    }
                })?;
                Some(file)
            }
            _ => None,
        };

        let spec = ProcessSpec {
            program: self.command.clone(),
            args: self.build_args(&request, config_file.as_ref().map(|f| f.path())),
            work_dir: request.work_dir.clone(),
            stdin: request.prompt.clone(),
        };
        let fold = ClaudeFold::new(&request.work_dir);
        let outcome = run_streaming(
            &spec,
            fold,
            self.timeouts,
            &request.tracked,
            request.ui.clone(),
        )
        .await;
        drop(config_file);
        outcome
    }
}
