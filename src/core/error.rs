//! 错误类型
//!
//! ToolError 是工具层的结构化失败（在 ToolDispatcher 边界被捕获并交还给模型）；
//! AgentError 是运行级 / 启动级错误（配置缺失、模型执行器失败等）。

use thiserror::Error;

use crate::core::plan::PhaseId;

/// 单次工具调用的失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// 参数缺失 / 类型错误 / 多余字段
    #[error("Invalid arguments for {tool}: {message}")]
    ArgumentDecode { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Cannot advance: agent is in phase {}, not {from}", display_phase(.current))]
    PhaseMismatch {
        current: Option<PhaseId>,
        from: PhaseId,
    },

    /// to_phase_id 必须是 from_phase_id + 1
    #[error("Cannot advance from phase {from} to {to}: phases must advance one step at a time, update the plan instead")]
    NonSequentialPhase { from: PhaseId, to: PhaseId },

    #[error("Cannot advance to phase {0}: no such phase in the current plan")]
    UnknownPhase(PhaseId),

    #[error("start_time must be in ISO format, e.g. '2025-06-18 09:00:00' (got '{0}')")]
    InvalidTimestamp(String),

    #[error("Invalid line range: start_line={start:?}, end_line={end:?}, file has {line_count} lines")]
    InvalidRange {
        start: Option<i64>,
        end: Option<i64>,
        line_count: usize,
    },

    /// file_replace_text 要求 old_text 恰好出现一次
    #[error("old_text must occur exactly once in the file, found {occurrences} occurrences; provide a more specific old_text")]
    AmbiguousReplacement { occurrences: usize },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Options list must be non-empty if provided")]
    InvalidOptions,

    /// 外部网络调用返回非成功状态
    #[error("Transport error: status {status}, body: {body}")]
    Transport { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Tool timed out after {0}s")]
    Timeout(u64),

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

fn display_phase(phase: &Option<PhaseId>) -> String {
    match phase {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

/// 分发器交还给运行循环的结构化失败：{tool_name, message}
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tool_name}: {error}")]
pub struct ToolFailure {
    pub tool_name: String,
    pub error: ToolError,
}

impl ToolFailure {
    pub fn new(tool_name: impl Into<String>, error: ToolError) -> Self {
        Self {
            tool_name: tool_name.into(),
            error,
        }
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// 运行级错误：启动失败或模型执行器失败（工具失败不会走到这里）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),

    /// 启动时缺少必需的外部凭据，直接终止
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Model runner error: {0}")]
    ModelRunner(String),

    #[error("Script error: {0}")]
    Script(String),
}
