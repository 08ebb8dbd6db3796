//! Tool session over a child process speaking JSON-RPC 2.0 on stdio
//!
//! This is the Model Context Protocol transport the browser automation server
//! uses: one JSON object per line, `initialize` handshake first, then
//! `tools/list` and `tools/call`.

use super::{ToolDescription, ToolError, ToolLauncher, ToolSession};
use crate::config::ToolSessionSection;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch and talk to the tool process
#[derive(Debug, Clone)]
pub struct StdioSessionConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub startup_timeout: Duration,
    pub call_timeout: Duration,
    pub client_name: String,
}

impl From<&ToolSessionSection> for StdioSessionConfig {
    fn from(section: &ToolSessionSection) -> Self {
        Self {
            command: section.command.clone(),
            args: section.launch_args(),
            env: HashMap::new(),
            startup_timeout: section.startup_timeout(),
            call_timeout: section.call_timeout(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

struct SessionIo {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A running tool process
pub struct StdioToolSession {
    config: StdioSessionConfig,
    io: Mutex<Option<SessionIo>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl StdioToolSession {
    /// Spawn the process and complete the `initialize` handshake
    ///
    /// A process that fails to spawn or to answer within the startup timeout
    /// is killed and reported as [`ToolError::Startup`].
    pub async fn start(config: StdioSessionConfig) -> Result<Self, ToolError> {
        info!(command = %config.command, args = ?config.args, "Starting tool process");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Startup(format!("failed to spawn '{}': {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Startup("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Startup("stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "tool_process", "{}", line);
                }
            });
        }

        let session = Self {
            io: Mutex::new(Some(SessionIo {
                child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            })),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            config,
        };

        let startup_timeout = session.config.startup_timeout;
        match tokio::time::timeout(startup_timeout, session.initialize()).await {
            Ok(Ok(())) => {
                info!("Tool process initialized");
                Ok(session)
            }
            Ok(Err(e)) => {
                let _ = session.close().await;
                Err(ToolError::Startup(e.to_string()))
            }
            Err(_) => {
                let _ = session.close().await;
                Err(ToolError::Startup(format!(
                    "no initialize response within {startup_timeout:?}"
                )))
            }
        }
    }

    async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .exchange(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": self.config.client_name,
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;

        debug!(server = ?result.get("serverInfo"), "Tool server handshake complete");
        self.notify("notifications/initialized", json!({})).await
    }

    /// Send a request under the call timeout
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let call_timeout = self.config.call_timeout;
        tokio::time::timeout(call_timeout, self.exchange(method, params))
            .await
            .map_err(|_| ToolError::Timeout(call_timeout))?
    }

    async fn exchange(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(ToolError::Closed)?;

        write_line(&mut io.stdin, &message).await?;
        debug!(method, id, "Sent tool request");

        loop {
            let line = io
                .stdout
                .next_line()
                .await
                .map_err(|e| ToolError::Transport(e.to_string()))?
                .ok_or_else(|| ToolError::Transport("tool process closed its output".to_string()))?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(_) => {
                    debug!(line = trimmed, "Skipping non-JSON output from tool process");
                    continue;
                }
            };

            // notifications and replies to other requests
            if response.get("id").and_then(Value::as_u64) != Some(id) {
                debug!(?response, "Skipping unrelated message");
                continue;
            }

            if let Some(error) = response.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(ToolError::Protocol(format!("{method}: {message}")));
            }

            return response
                .get("result")
                .cloned()
                .ok_or_else(|| ToolError::Protocol(format!("{method}: response has no result")));
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });

        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(ToolError::Closed)?;
        write_line(&mut io.stdin, &message).await
    }
}

async fn write_line(stdin: &mut ChildStdin, message: &Value) -> Result<(), ToolError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| ToolError::Protocol(e.to_string()))?;
    line.push('\n');

    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ToolError::Transport(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| ToolError::Transport(e.to_string()))
}

fn parse_tool(tool: &Value) -> Result<ToolDescription, ToolError> {
    let name = tool
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Protocol("tool is missing a name".to_string()))?;

    Ok(ToolDescription {
        name: name.to_string(),
        description: tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        parameters: tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"})),
    })
}

/// Flatten the text parts of a `tools/call` result
pub fn tool_result_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

#[async_trait]
impl ToolSession for StdioToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescription>, ToolError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;

            let page = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| ToolError::Protocol("tools/list: missing tools array".to_string()))?;
            for tool in page {
                tools.push(parse_tool(tool)?);
            }

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !seen_cursors.insert(next.to_string()) => {
                    return Err(ToolError::Protocol(format!(
                        "tools/list: cursor '{next}' was already returned"
                    )));
                }
                Some(next) => cursor = Some(next.to_string()),
                None => break,
            }
        }

        Ok(tools)
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let result = self
            .request(
                "tools/call",
                json!({
                    "name": name,
                    "arguments": arguments
                }),
            )
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ToolError::ExecutionError(tool_result_text(&result)));
        }

        Ok(result)
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.closed.store(true, Ordering::SeqCst);

        let Some(io) = self.io.lock().await.take() else {
            return Ok(());
        };

        let SessionIo {
            mut child, stdin, ..
        } = io;
        // closing stdin asks the server to exit
        drop(stdin);

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Tool process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(ToolError::Transport(e.to_string())),
            Err(_) => {
                warn!("Tool process did not exit, killing it");
                child
                    .kill()
                    .await
                    .map_err(|e| ToolError::Transport(e.to_string()))
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Launches [`StdioToolSession`]s from configuration
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    config: StdioSessionConfig,
}

impl StdioLauncher {
    pub fn new(config: StdioSessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolLauncher for StdioLauncher {
    async fn launch(&self) -> Result<Arc<dyn ToolSession>, ToolError> {
        let session = StdioToolSession::start(self.config.clone()).await?;
        Ok(Arc::new(session))
    }
}
