//! 脚本化模型执行器（用于测试与离线演示，无需模型 API）
//!
//! 按轮回放预先写好的事件，并记录每轮收到的指令文本，便于检查阶段子句的变化。

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use serde::Deserialize;

use crate::core::AgentError;
use crate::run::{EventStream, ModelRunner, RunEvent, TurnRequest};

/// 脚本文件格式：`{"input": "...", "turns": [[event, ...], ...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub input: Option<String>,
    pub turns: Vec<Vec<RunEvent>>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Script(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| AgentError::Script(format!("{}: {}", path.display(), e)))
    }
}

/// 回放执行器：第 N 轮返回第 N 组事件，脚本用完后返回空流
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    turns: Vec<Vec<RunEvent>>,
    seen_instructions: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(turns: Vec<Vec<RunEvent>>) -> Self {
        Self {
            turns,
            seen_instructions: Mutex::new(Vec::new()),
        }
    }

    pub fn from_script(script: &Script) -> Self {
        Self::new(script.turns.clone())
    }

    /// 每轮开始时收到的指令文本
    pub fn seen_instructions(&self) -> Vec<String> {
        self.seen_instructions
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelRunner for ScriptedRunner {
    async fn run_turn(&self, request: TurnRequest<'_>) -> Result<EventStream, AgentError> {
        if let Ok(mut seen) = self.seen_instructions.lock() {
            seen.push(request.instructions.to_string());
        }
        let events = self
            .turns
            .get(request.turn.saturating_sub(1))
            .cloned()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_replays_turns_in_order() {
        let runner = ScriptedRunner::new(vec![
            vec![RunEvent::MessageOutput { text: "one".into() }],
            vec![RunEvent::AgentUpdated { name: "b".into() }],
        ]);
        for (turn, instructions) in [(1, "first"), (2, "second"), (3, "third")] {
            let mut stream = runner
                .run_turn(TurnRequest {
                    turn,
                    instructions,
                    tools: &[],
                    transcript: &[],
                })
                .await
                .unwrap();
            let first = stream.next().await;
            match turn {
                1 => assert!(matches!(first, Some(Ok(RunEvent::MessageOutput { .. })))),
                2 => assert!(matches!(first, Some(Ok(RunEvent::AgentUpdated { .. })))),
                _ => assert!(first.is_none()),
            }
        }
        assert_eq!(runner.seen_instructions(), ["first", "second", "third"]);
    }

    #[test]
    fn test_script_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        std::fs::write(
            &path,
            r#"{"input": "hi", "turns": [[{"type": "message_output", "text": "hello"}]]}"#,
        )
        .unwrap();
        let script = Script::load(&path).unwrap();
        assert_eq!(script.input.as_deref(), Some("hi"));
        assert_eq!(script.turns.len(), 1);
        assert!(Script::load(&dir.path().join("missing.json")).is_err());
    }
}
