//! 外部命令执行助手
//!
//! docker / trivy / kubectl 都经这里：白名单程序、超时、kill_on_drop。
//! 工具文件只拼参数，不直接碰 tokio::process。

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::core::error::ToolError;

/// 允许执行的外部程序
const ALLOWED_PROGRAMS: &[&str] = &["docker", "trivy", "kubectl"];

/// 命令输出
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 运行一个白名单外部命令；非零退出不视为错误，由调用方决定语义。
/// 程序未安装（ENOENT）返回 Ok(None)，调用方据此结构化降级；
/// 其余启动失败返回 ExecutionFailed，超时返回 Timeout。
pub async fn run_command_if_available(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<Option<CommandOutput>, ToolError> {
    if !ALLOWED_PROGRAMS.contains(&program) {
        return Err(ToolError::Validation(format!(
            "program '{program}' is not allowed"
        )));
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!(program, ?args, "running external command");

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ToolError::ExecutionFailed(format!(
                "failed to start '{program}': {e}"
            )))
        }
    };

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            tool: program.to_string(),
            limit: timeout,
        })?
        .map_err(|e| ToolError::ExecutionFailed(format!("'{program}' failed: {e}")))?;

    Ok(Some(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    }))
}

/// 同上，但程序缺席视为错误（多数工具步骤的默认语义）
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    run_command_if_available(program, args, cwd, timeout)
        .await?
        .ok_or_else(|| {
            ToolError::ExecutionFailed(format!(
                "'{program}' was not found. Is it installed and on PATH?"
            ))
        })
}

/// 运行并要求成功：非零退出升级为 ExecutionFailed，带 stderr 摘要
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    let output = run_command(program, args, cwd, timeout).await?;
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        return Err(ToolError::ExecutionFailed(format!(
            "'{program} {}' exited with code {}: {}",
            args.join(" "),
            output.exit_code,
            truncate(&detail, 800)
        )));
    }
    Ok(output)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
