//! Newline-delimited JSON serving loop
//!
//! The surrounding agent framework owns the real tool-call protocol; this loop
//! is the minimal host for it: one JSON request per line on stdin, one JSON
//! response per line on stdout. Logging stays on stderr.

use crate::tools::ToolSystem;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error};

/// Incoming request envelope
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub kind: RequestKind,
}

/// The two supported methods
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RequestKind {
    #[serde(rename = "tools/list")]
    ListTools,
    #[serde(rename = "tools/call")]
    CallTool {
        name: String,
        #[serde(default = "empty_arguments")]
        arguments: Value,
    },
}

fn empty_arguments() -> Value {
    json!({})
}

/// Outgoing response envelope
///
/// `id` always serializes, as `null` when the request carried none (or could
/// not be parsed at all), so callers can correlate every response line.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, error: String) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Handle one request line
pub async fn dispatch(tools: &ToolSystem, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::error(None, format!("invalid request: {e}")),
    };

    match request.kind {
        RequestKind::ListTools => {
            let listing: Vec<Value> = tools
                .list_tools()
                .iter()
                .filter_map(|name| tools.describe_tool(name))
                .map(|d| {
                    json!({
                        "name": d.name,
                        "description": d.description,
                        "inputSchema": d.parameters,
                    })
                })
                .collect();
            Response::result(request.id, json!({"tools": listing}))
        }
        RequestKind::CallTool { name, arguments } => {
            debug!(tool = %name, "tool call");
            match tools.execute_tool(&name, &arguments).await {
                Ok(value) => Response::result(request.id, value),
                Err(e) => Response::error(request.id, e.to_string()),
            }
        }
    }
}

/// Serve requests from stdin until EOF
pub async fn serve_stdio(tools: Arc<ToolSystem>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = dispatch(&tools, line).await;
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                continue;
            }
        };

        stdout.write_all(payload.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    debug!("stdin closed, serving loop finished");
    Ok(())
}
