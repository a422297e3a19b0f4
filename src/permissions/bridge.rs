//! Stdio MCP server that forwards Claude's permission prompts to the gateway.
//!
//! Claude launches `anvil permission-bridge --socket <path>` from the
//! temporary MCP config and calls its single tool, `approval_prompt`, for
//! every tool use not covered by `--allowedTools`. Messages are JSON-RPC 2.0,
//! one per line.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use super::protocol::{GatewayMessage, PermissionRequest};
use crate::errors::PermissionError;

pub const SERVER_NAME: &str = "anvil_permissions";
pub const TOOL_NAME: &str = "approval_prompt";
const PROTOCOL_VERSION: &str = "2024-11-05";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Name Claude uses for the tool in `--permission-prompt-tool`.
pub fn prompt_tool_name() -> String {
    format!("mcp__{}__{}", SERVER_NAME, TOOL_NAME)
}

/// What to do with one incoming message.
#[derive(Debug, PartialEq)]
enum Dispatch {
    Reply(Value),
    Ask {
        id: Value,
        tool_name: String,
        input: Value,
    },
    Ignore,
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn tool_definition() -> Value {
    json!({
        "name": TOOL_NAME,
        "description": "Ask the anvil operator whether a tool use may proceed",
        "inputSchema": {
            "type": "object",
            "properties": {
                "tool_name": { "type": "string" },
                "input": { "type": "object" },
                "tool_use_id": { "type": "string" }
            },
            "required": ["tool_name", "input"]
        }
    })
}

fn dispatch(message: &Value) -> Dispatch {
    let Some(method) = message.get("method").and_then(|m| m.as_str()) else {
        return Dispatch::Ignore;
    };
    // Notifications carry no id and get no reply.
    let Some(id) = message.get("id").cloned() else {
        return Dispatch::Ignore;
    };

    match method {
        "initialize" => Dispatch::Reply(success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") }
            }),
        )),
        "tools/list" => Dispatch::Reply(success(id, json!({ "tools": [tool_definition()] }))),
        "ping" => Dispatch::Reply(success(id, json!({}))),
        "tools/call" => {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            if params.get("name").and_then(|n| n.as_str()) != Some(TOOL_NAME) {
                return Dispatch::Reply(error(id, INVALID_PARAMS, "unknown tool"));
            }
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
            match arguments.get("tool_name").and_then(|t| t.as_str()) {
                Some(tool_name) => Dispatch::Ask {
                    id,
                    tool_name: tool_name.to_string(),
                    input: arguments.get("input").cloned().unwrap_or_else(|| json!({})),
                },
                None => Dispatch::Reply(error(id, INVALID_PARAMS, "missing tool_name")),
            }
        }
        _ => Dispatch::Reply(error(id, METHOD_NOT_FOUND, "method not found")),
    }
}

/// `tools/call` result carrying the decision in Claude's expected shape.
fn decision_result(id: Value, approved: bool, input: Value, tool_name: &str) -> Value {
    let decision = if approved {
        json!({ "behavior": "allow", "updatedInput": input })
    } else {
        json!({
            "behavior": "deny",
            "message": format!("Permission to use {} was denied by the operator", tool_name)
        })
    };
    success(
        id,
        json!({ "content": [{ "type": "text", "text": decision.to_string() }] }),
    )
}

/// Send one request over a fresh connection and wait for its answer.
pub async fn ask_gateway(
    socket: &Path,
    tool_name: &str,
    input: Value,
) -> Result<bool, PermissionError> {
    let request = PermissionRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        tool_name: tool_name.to_string(),
        input,
    };
    let stream = UnixStream::connect(socket).await?;
    let (read_half, mut write_half) = stream.into_split();
    let line = GatewayMessage::PermissionRequest(request.clone()).to_line()?;
    write_half.write_all(line.as_bytes()).await?;

    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        match GatewayMessage::parse(&line)? {
            GatewayMessage::PermissionResponse(response)
                if response.request_id == request.request_id =>
            {
                return Ok(response.approved);
            }
            other => tracing::debug!(?other, "Skipping unrelated gateway message"),
        }
    }
    Err(PermissionError::Protocol(
        "gateway closed the connection without answering".into(),
    ))
}

/// Serve MCP messages from `reader` until EOF. Tool calls run concurrently.
pub async fn serve<R, W>(reader: R, mut writer: W, socket: PathBuf) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed MCP message");
                continue;
            }
        };
        match dispatch(&message) {
            Dispatch::Reply(reply) => {
                let _ = tx.send(reply);
            }
            Dispatch::Ask {
                id,
                tool_name,
                input,
            } => {
                let tx = tx.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    let approved = match ask_gateway(&socket, &tool_name, input.clone()).await {
                        Ok(approved) => approved,
                        Err(e) => {
                            tracing::warn!(error = %e, tool = %tool_name, "Permission gateway unreachable; denying");
                            false
                        }
                    };
                    let _ = tx.send(decision_result(id, approved, input, &tool_name));
                });
            }
            Dispatch::Ignore => {}
        }
    }

    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// Entry point for the hidden `permission-bridge` command.
pub async fn run_bridge(socket: PathBuf) -> anyhow::Result<()> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), socket).await
}
