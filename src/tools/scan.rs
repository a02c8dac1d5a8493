//! 镜像漏洞扫描工具（trivy）
//!
//! 解析 trivy 的 JSON 输出为按严重级别的计数。扫描器未安装时
//! 不让链路中断：返回 skipped 结果并告警。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::run_command_if_available;
use crate::tools::registry::{ExecContext, Tool};

const SCAN_TIMEOUT: Duration = Duration::from_secs(300);

const SEVERITIES: &[&str] = &["CRITICAL", "HIGH", "MEDIUM", "LOW", "UNKNOWN"];

pub struct ScanTool;

/// trivy JSON -> {severity: count}
pub fn severity_counts(report: &Value) -> serde_json::Map<String, Value> {
    let mut counts: serde_json::Map<String, Value> = SEVERITIES
        .iter()
        .map(|s| (s.to_lowercase(), json!(0)))
        .collect();

    let vulnerabilities = report
        .get("Results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("Vulnerabilities").and_then(Value::as_array))
        .flatten();

    for vuln in vulnerabilities {
        let severity = vuln
            .get("Severity")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_lowercase();
        let entry = counts.entry(severity).or_insert(json!(0));
        *entry = json!(entry.as_i64().unwrap_or(0) + 1);
    }
    counts
}

fn prior_image(args: &Value) -> Result<String, ToolError> {
    args.get("_prior")
        .and_then(|p| p.get("build_image"))
        .and_then(|b| b.get("image"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::MissingDependency {
            tool: "scan_image".into(),
            needs: "build_image".into(),
        })
}

/// 扫描器缺席时的降级结果
fn skipped_result(image: &str) -> Value {
    json!({
        "image": image,
        "skipped": true,
        "reason": "trivy is not installed",
    })
}

#[async_trait]
impl Tool for ScanTool {
    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let image = prior_image(&args)?;

        let outcome = run_command_if_available(
            "trivy",
            &["image", "--format", "json", "--quiet", &image],
            None,
            SCAN_TIMEOUT,
        )
        .await?;

        let output = match outcome {
            // 扫描器缺席不阻断链路
            None => {
                tracing::warn!(image, "trivy not available, skipping vulnerability scan");
                return Ok(skipped_result(&image));
            }
            Some(output) if output.success() => output,
            Some(output) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "trivy exited with code {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                )))
            }
        };

        let report: Value = serde_json::from_str(&output.stdout)
            .map_err(|e| ToolError::ExecutionFailed(format!("unparseable trivy output: {e}")))?;
        let counts = severity_counts(&report);
        let critical = counts.get("critical").and_then(Value::as_i64).unwrap_or(0);

        Ok(json!({
            "image": image,
            "skipped": false,
            "severity_counts": counts,
            "passed": critical == 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_counts_from_trivy_report() {
        let report = json!({
            "Results": [
                {"Vulnerabilities": [
                    {"Severity": "CRITICAL"},
                    {"Severity": "HIGH"},
                    {"Severity": "HIGH"},
                ]},
                {"Vulnerabilities": [{"Severity": "LOW"}]},
                {} // 没有漏洞字段的层
            ]
        });
        let counts = severity_counts(&report);
        assert_eq!(counts["critical"], json!(1));
        assert_eq!(counts["high"], json!(2));
        assert_eq!(counts["low"], json!(1));
        assert_eq!(counts["medium"], json!(0));
    }

    #[test]
    fn test_empty_report_is_all_zero() {
        let counts = severity_counts(&json!({}));
        assert!(counts.values().all(|v| v == &json!(0)));
    }

    #[test]
    fn test_absent_scanner_degrades_to_skipped_result() {
        let result = skipped_result("app:v1");
        assert_eq!(result["skipped"], json!(true));
        assert_eq!(result["image"], json!("app:v1"));
        assert!(result["reason"].as_str().unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn test_missing_build_result_fails_fast() {
        let ctx = ExecContext::new("session_t", "/tmp");
        let err = ScanTool.execute(ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::MissingDependency { .. }));
    }
}
