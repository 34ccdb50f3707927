//! 运行事件
//!
//! RunEvent：模型执行器按顺序产出的事件（切换 Agent、调用工具、输出消息）。
//! RunNotice：运行循环推送给前端 / 控制台的展示事件。

use serde::{Deserialize, Serialize};

/// 模型执行器产出的单个事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 切换到另一个 Agent（仅展示）
    AgentUpdated { name: String },
    /// 调用工具；arguments 为原始 JSON 文本
    ToolCall {
        #[serde(default)]
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    /// 助手输出的文本
    MessageOutput { text: String },
}

/// 展示事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunNotice {
    /// 新一轮开始
    TurnStarted { turn: usize, max_turns: usize },
    AgentSwitched { name: String },
    /// 工具调用的可读描述
    ToolCall { description: String },
    /// 参数无法解析时的原始展示
    RawToolCall { name: String, arguments: String },
    /// 工具返回（预览）
    ToolResult { tool: String, preview: String },
    /// 工具失败（结构化错误已交还模型）
    ToolFailure { tool: String, reason: String },
    /// 阶段子句已更新
    InstructionsUpdated { phase_id: Option<u32> },
    Assistant { text: String },
    /// 终止工具被调用
    EndOfTask,
    /// 未调用终止工具即结束
    Incomplete { turns: usize, reason: String },
}

impl RunNotice {
    /// 控制台单行（或多行）展示；不需要展示的事件返回 None
    pub fn render(&self) -> Option<String> {
        match self {
            RunNotice::TurnStarted { .. } | RunNotice::ToolResult { .. } => None,
            RunNotice::AgentSwitched { name } => {
                Some(format!("\n── Switched to agent: {name} ──\n"))
            }
            RunNotice::ToolCall { description } => Some(format!("[Tool Call] {description}")),
            RunNotice::RawToolCall { name, arguments } => {
                Some(format!("[Tool Call] {name}\nArguments: {arguments}"))
            }
            RunNotice::ToolFailure { tool, reason } => {
                Some(format!("[Tool Error] {tool}: {reason}"))
            }
            RunNotice::InstructionsUpdated { phase_id } => {
                phase_id.map(|id| format!("[Phase] now in phase {id}"))
            }
            RunNotice::Assistant { text } => Some(format!("[Assistant] {text}")),
            RunNotice::EndOfTask => Some("====End of Task=====".to_string()),
            RunNotice::Incomplete { turns, reason } => {
                Some(format!("====Run ended after {turns} turns without ending the task ({reason})====="))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_event_from_json() {
        let ev: RunEvent = serde_json::from_str(
            r#"{"type": "tool_call", "name": "file_write", "arguments": "{\"path\": \"a\"}"}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            RunEvent::ToolCall {
                call_id: String::new(),
                name: "file_write".into(),
                arguments: r#"{"path": "a"}"#.into(),
            }
        );
    }

    #[test]
    fn test_notice_render() {
        assert_eq!(
            RunNotice::ToolCall { description: "Creating file a.md".into() }.render().unwrap(),
            "[Tool Call] Creating file a.md"
        );
        assert_eq!(RunNotice::EndOfTask.render().unwrap(), "====End of Task=====");
        assert!(RunNotice::TurnStarted { turn: 1, max_turns: 2 }.render().is_none());
    }
}
