//! stdio 传输：行分隔 JSON-RPC
//!
//! stdin 逐行读请求；每个 tools/call 单独 spawn，慢工具不阻塞后续请求；
//! 响应经 mpsc 汇到单一 stdout 写任务，保证行不交错。
//! 日志全部走 stderr，stdout 只有协议帧。

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::ToolError;
use crate::core::orchestrator::Orchestrator;
use crate::server::protocol::{
    initialize_result, tool_result, Request, Response, ToolCallParams, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};

pub struct StdioServer {
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl StdioServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 主循环：EOF 或 shutdown 触发即退出
    pub async fn serve(&self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Response>(64);

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(response) = rx.recv().await {
                match serde_json::to_string(&response) {
                    Ok(mut line) => {
                        line.push('\n');
                        if stdout.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize response"),
                }
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break; // EOF
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    let _ = tx
                        .send(Response::failure(Value::Null, PARSE_ERROR, e.to_string()))
                        .await;
                    continue;
                }
            };
            self.dispatch(request, tx.clone()).await;
        }

        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    async fn dispatch(&self, request: Request, tx: mpsc::Sender<Response>) {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification ignored");
            return;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => {
                let _ = tx.send(Response::success(id, initialize_result())).await;
            }
            "tools/list" => {
                let tools: Vec<Value> = self
                    .orchestrator
                    .registry()
                    .list()
                    .into_iter()
                    .map(|meta| {
                        json!({
                            "name": meta.name,
                            "description": meta.description,
                            "inputSchema": meta.input_schema,
                        })
                    })
                    .collect();
                let _ = tx
                    .send(Response::success(id, json!({"tools": tools})))
                    .await;
            }
            "tools/call" => {
                let params: ToolCallParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = tx
                            .send(Response::failure(id, INVALID_PARAMS, e.to_string()))
                            .await;
                        return;
                    }
                };
                let orchestrator = Arc::clone(&self.orchestrator);
                let cancel = self.shutdown.child_token();
                // 每个调用独立任务：慢工具不堵住循环
                tokio::spawn(async move {
                    let response = handle_tool_call(&orchestrator, cancel, id, params).await;
                    let _ = tx.send(response).await;
                });
            }
            other => {
                let _ = tx
                    .send(Response::failure(
                        id,
                        METHOD_NOT_FOUND,
                        format!("unknown method '{other}'"),
                    ))
                    .await;
            }
        }
    }
}

async fn handle_tool_call(
    orchestrator: &Orchestrator,
    cancel: CancellationToken,
    id: Value,
    params: ToolCallParams,
) -> Response {
    let session_id = params
        .arguments
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    match orchestrator
        .execute_tool(cancel, session_id.as_deref(), &params.name, params.arguments)
        .await
    {
        Ok(invocation) => {
            let mut payload = json!({
                "session_id": invocation.session_id,
                "result": invocation.output,
            });
            if let Some(hint) = invocation.chain_hint {
                payload["next_tool"] = json!(hint.next_tool);
                payload["chain_reason"] = json!(hint.reason);
            }
            Response::success(id, tool_result(&payload, false))
        }
        // 工具级失败按 MCP 惯例走 isError 内容，协议层错误码留给协议问题
        Err(err @ (ToolError::UnknownTool(_) | ToolError::Validation(_))) => {
            Response::failure(id, INVALID_PARAMS, err.to_string())
        }
        Err(ToolError::Storage(msg)) => Response::failure(id, INTERNAL_ERROR, msg),
        Err(err) => {
            let payload = json!({"error": err.to_string()});
            Response::success(id, tool_result(&payload, true))
        }
    }
}
