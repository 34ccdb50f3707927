//! 工具分发器
//!
//! 持有只读 ToolRegistry 与全局超时：查找工具 -> 解析参数 -> 带超时执行 -> 捕获错误与 panic，
//! 统一转为 ToolFailure 交还运行循环；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{PlanHandle, ToolError, ToolFailure};
use crate::tools::{Tool, ToolRegistry, ToolSpec};

/// 每次工具调用时注入的上下文（替代进程级全局状态）
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub plan: PlanHandle,
}

impl ToolContext {
    pub fn new(plan: PlanHandle) -> Self {
        Self { plan }
    }
}

/// 工具分发器：对每次调用施加超时，并将所有失败映射为 ToolFailure
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.registry.is_terminal(name)
    }

    /// 分发一次工具调用；raw_args 为模型给出的原始 JSON 文本（空串视为 `{}`）
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        tool_name: &str,
        raw_args: &str,
    ) -> Result<String, ToolFailure> {
        let start = Instant::now();
        let result = self.dispatch_inner(ctx, tool_name, raw_args).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::ArgumentDecode { .. }) | Err(ToolError::UnknownTool(_)) => "rejected",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(raw_args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.map_err(|e| ToolFailure::new(tool_name, e))
    }

    async fn dispatch_inner(
        &self,
        ctx: &ToolContext,
        tool_name: &str,
        raw_args: &str,
    ) -> Result<String, ToolError> {
        let tool = self.registry.lookup(tool_name)?;
        let args = parse_args(tool_name, raw_args)?;

        let call = AssertUnwindSafe(tool.execute(ctx, args)).catch_unwind();
        let result = if tool.waits_for_user() {
            call.await
        } else {
            timeout(self.timeout, call)
                .await
                .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))?
        };

        match result {
            Ok(r) => r,
            Err(panic) => Err(ToolError::Execution(panic_message(panic.as_ref()))),
        }
    }
}

/// 原始参数文本 -> JSON 对象
fn parse_args(tool_name: &str, raw_args: &str) -> Result<Value, ToolError> {
    let raw = raw_args.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| ToolError::ArgumentDecode {
        tool: tool_name.to_string(),
        message: e.to_string(),
    })?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Err(ToolError::ArgumentDecode {
            tool: tool_name.to_string(),
            message: format!("expected a JSON object, got {other}"),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > 200 {
        format!("{}...", raw.chars().take(200).collect::<String>())
    } else {
        raw.to_string()
    }
}
