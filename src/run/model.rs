//! 模型执行器抽象
//!
//! 运行循环每轮把完整指令、可用工具与对话记录交给 ModelRunner，
//! 执行器返回按产出顺序排列的事件流。具体如何调用模型不在本层关心范围内。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

use crate::core::AgentError;
use crate::run::RunEvent;
use crate::tools::ToolSpec;

/// 单轮事件流
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RunEvent, AgentError>> + Send>>;

/// 对话记录条目（工具结果写回后，下一轮模型可见）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolOutput {
        call_id: String,
        output: String,
        is_error: bool,
    },
}

/// 一轮请求
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// 从 1 开始
    pub turn: usize,
    pub instructions: &'a str,
    pub tools: &'a [ToolSpec],
    pub transcript: &'a [TranscriptItem],
}

/// 模型执行器：每轮返回一个事件流
#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<EventStream, AgentError>;
}
