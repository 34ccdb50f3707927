//! 运行主循环
//!
//! 请求一轮 -> 按顺序消费事件 -> 工具调用经分发器执行 -> 阶段钩子同步指令 -> 下一轮。
//! 终止工具被调用时立即结束（不再读取剩余事件）；轮数用尽或模型不再调用工具时以未完成结束。
//! 可选 event_tx：向控制台 / 前端推送 RunNotice。

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{AgentError, PhaseClauseHook};
use crate::run::{ModelRunner, RunEvent, RunNotice, TranscriptItem, TurnRequest};
use crate::tools::{ToolContext, ToolDispatcher, ToolRegistry};

/// 未指定时的最大轮数
pub const DEFAULT_MAX_TURNS: usize = 70;
/// 工具返回预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 未调用终止工具就结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// 轮数用尽
    TurnBudgetExhausted,
    /// 某一轮没有任何工具调用
    ModelStopped,
}

impl IncompleteReason {
    fn as_str(self) -> &'static str {
        match self {
            IncompleteReason::TurnBudgetExhausted => "turn budget exhausted",
            IncompleteReason::ModelStopped => "model stopped calling tools",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 终止工具被调用
    Terminated,
    Incomplete(IncompleteReason),
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// 实际执行的轮数
    pub turns: usize,
    pub transcript: Vec<TranscriptItem>,
    /// 结束时的完整指令文本
    pub instructions: String,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Terminated
    }
}

/// 运行配置
pub struct RunSession<'a> {
    pub runner: &'a dyn ModelRunner,
    pub dispatcher: &'a ToolDispatcher,
    pub ctx: &'a ToolContext,
    pub max_turns: usize,
    /// 可选：展示事件推送通道
    pub event_tx: Option<&'a UnboundedSender<RunNotice>>,
}

impl<'a> RunSession<'a> {
    pub fn new(
        runner: &'a dyn ModelRunner,
        dispatcher: &'a ToolDispatcher,
        ctx: &'a ToolContext,
    ) -> Self {
        Self {
            runner,
            dispatcher,
            ctx,
            max_turns: DEFAULT_MAX_TURNS,
            event_tx: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<RunNotice>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, notice: RunNotice) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(notice);
        }
    }
}

/// 工具调用的展示事件
///
/// 未注册的工具显示 `Using tool: <name>`；已注册但参数无法解析（JSON 或类型不符）时退回原始名称 + 参数。
pub fn describe_call(registry: &ToolRegistry, name: &str, arguments: &str) -> RunNotice {
    let parsed = if arguments.trim().is_empty() {
        Ok(Value::Object(Default::default()))
    } else {
        serde_json::from_str::<Value>(arguments)
    };
    let description = match (registry.get(name), parsed) {
        (None, Ok(args)) => Some(registry.render(name, &args)),
        (Some(tool), Ok(args)) => tool.describe(&args),
        (_, Err(_)) => None,
    };
    match description {
        Some(description) => RunNotice::ToolCall { description },
        None => RunNotice::RawToolCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        text.to_string()
    }
}

/// 执行一次运行：hook 持有 Agent 的指令文本，每次工具结束后由它同步阶段子句
pub async fn run_agent(
    session: &RunSession<'_>,
    hook: &mut PhaseClauseHook,
    user_input: &str,
) -> Result<RunReport, AgentError> {
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id);
    run_agent_impl(session, hook, user_input, run_id)
        .instrument(span)
        .await
}

async fn run_agent_impl(
    session: &RunSession<'_>,
    hook: &mut PhaseClauseHook,
    user_input: &str,
    run_id: Uuid,
) -> Result<RunReport, AgentError> {
    let dispatcher = session.dispatcher;
    let ctx = session.ctx;
    let tools = dispatcher.specs();
    let mut transcript = vec![TranscriptItem::User {
        text: user_input.to_string(),
    }];

    let finish = |outcome: RunOutcome, turns: usize, transcript: Vec<TranscriptItem>, hook: &PhaseClauseHook| {
        tracing::info!(?outcome, turns, "run finished");
        RunReport {
            run_id,
            outcome,
            turns,
            transcript,
            instructions: hook.instructions().render(),
        }
    };

    for turn in 1..=session.max_turns {
        session.send(RunNotice::TurnStarted {
            turn,
            max_turns: session.max_turns,
        });
        let instructions = hook.instructions().render();
        let mut stream = session
            .runner
            .run_turn(TurnRequest {
                turn,
                instructions: &instructions,
                tools: &tools,
                transcript: &transcript,
            })
            .await?;

        let mut saw_tool_call = false;
        while let Some(event) = stream.next().await {
            match event? {
                RunEvent::AgentUpdated { name } => {
                    tracing::info!(agent = %name, "agent switched");
                    session.send(RunNotice::AgentSwitched { name });
                }
                RunEvent::MessageOutput { text } => {
                    session.send(RunNotice::Assistant { text: text.clone() });
                    transcript.push(TranscriptItem::Assistant { text });
                }
                RunEvent::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    saw_tool_call = true;

                    if dispatcher.is_terminal(&name) {
                        if let Err(failure) = dispatcher.dispatch(ctx, &name, &arguments).await {
                            // 参数被拒也要结束任务
                            tracing::warn!(error = %failure, "terminal tool failed, marking task completed");
                            ctx.plan.end_task().await;
                        }
                        session.send(RunNotice::EndOfTask);
                        transcript.push(TranscriptItem::ToolCall {
                            call_id,
                            name,
                            arguments,
                        });
                        return Ok(finish(RunOutcome::Terminated, turn, transcript, &*hook));
                    }

                    session.send(describe_call(dispatcher.registry(), &name, &arguments));
                    let (output, is_error) = match dispatcher.dispatch(ctx, &name, &arguments).await {
                        Ok(output) => {
                            session.send(RunNotice::ToolResult {
                                tool: name.clone(),
                                preview: preview(&output),
                            });
                            (output, false)
                        }
                        Err(failure) => {
                            session.send(RunNotice::ToolFailure {
                                tool: name.clone(),
                                reason: failure.message(),
                            });
                            (failure.message(), true)
                        }
                    };
                    transcript.push(TranscriptItem::ToolCall {
                        call_id: call_id.clone(),
                        name,
                        arguments,
                    });
                    transcript.push(TranscriptItem::ToolOutput {
                        call_id,
                        output,
                        is_error,
                    });

                    // 成功或失败都要同步指令
                    let plan = ctx.plan.snapshot().await;
                    if hook.on_tool_end(&plan) {
                        session.send(RunNotice::InstructionsUpdated {
                            phase_id: plan.current_phase_id,
                        });
                    }
                }
            }
        }

        if !saw_tool_call {
            let reason = IncompleteReason::ModelStopped;
            session.send(RunNotice::Incomplete {
                turns: turn,
                reason: reason.as_str().to_string(),
            });
            return Ok(finish(RunOutcome::Incomplete(reason), turn, transcript, &*hook));
        }
    }

    let reason = IncompleteReason::TurnBudgetExhausted;
    session.send(RunNotice::Incomplete {
        turns: session.max_turns,
        reason: reason.as_str().to_string(),
    });
    Ok(finish(
        RunOutcome::Incomplete(reason),
        session.max_turns,
        transcript,
        &*hook,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InstructionBuffer;
    use crate::run::ScriptedRunner;
    use crate::tools::{AdvancePhaseTool, EndTaskTool, UpdatePlanTool};

    fn tool_call(name: &str, arguments: &str) -> RunEvent {
        RunEvent::ToolCall {
            call_id: format!("call_{name}"),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(UpdatePlanTool);
        registry.register(AdvancePhaseTool);
        registry.register(EndTaskTool);
        ToolDispatcher::new(registry, 5)
    }

    #[test]
    fn test_describe_call_fallbacks() {
        let d = dispatcher();
        assert_eq!(
            describe_call(d.registry(), "agent_end_task", ""),
            RunNotice::ToolCall { description: "Ending current task".into() }
        );
        assert_eq!(
            describe_call(d.registry(), "agent_advance_phase", "{oops"),
            RunNotice::RawToolCall { name: "agent_advance_phase".into(), arguments: "{oops".into() }
        );
        assert_eq!(
            describe_call(d.registry(), "agent_advance_phase", r#"{"from_phase_id": "one"}"#),
            RunNotice::RawToolCall {
                name: "agent_advance_phase".into(),
                arguments: r#"{"from_phase_id": "one"}"#.into()
            }
        );
        assert_eq!(
            describe_call(d.registry(), "agent_advance_phase", r#"{"from_phase_id": 1, "to_phase_id": 2}"#),
            RunNotice::ToolCall { description: "Advancing from phase 1 to 2".into() }
        );
        assert_eq!(
            describe_call(d.registry(), "shell", "{}"),
            RunNotice::ToolCall { description: "Using tool: shell".into() }
        );
    }

    #[tokio::test]
    async fn test_turn_budget_exhausted() {
        let runner = ScriptedRunner::new(vec![
            vec![tool_call("agent_update_plan", r#"{"goal": "g"}"#)],
            vec![tool_call("agent_update_plan", r#"{"goal": "h"}"#)],
            vec![tool_call("agent_end_task", "{}")],
        ]);
        let d = dispatcher();
        let ctx = ToolContext::default();
        let session = RunSession::new(&runner, &d, &ctx).with_max_turns(2);
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        let report = run_agent(&session, &mut hook, "go").await.unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Incomplete(IncompleteReason::TurnBudgetExhausted)
        );
        assert_eq!(report.turns, 2);
        assert!(!ctx.plan.snapshot().await.completed);
    }

    #[tokio::test]
    async fn test_terminal_tool_with_rejected_args_still_completes() {
        let runner = ScriptedRunner::new(vec![vec![
            tool_call("agent_end_task", r#"{"reason": "done"}"#),
            tool_call("agent_update_plan", r#"{"goal": "late"}"#),
        ]]);
        let d = dispatcher();
        let ctx = ToolContext::default();
        let session = RunSession::new(&runner, &d, &ctx);
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        let report = run_agent(&session, &mut hook, "go").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Terminated);
        let plan = ctx.plan.snapshot().await;
        assert!(plan.completed);
        assert_eq!(plan.goal, None);
    }

    #[tokio::test]
    async fn test_turn_without_tool_call_stops() {
        let runner = ScriptedRunner::new(vec![vec![RunEvent::MessageOutput {
            text: "nothing to do".into(),
        }]]);
        let d = dispatcher();
        let ctx = ToolContext::default();
        let session = RunSession::new(&runner, &d, &ctx);
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        let report = run_agent(&session, &mut hook, "hi").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Incomplete(IncompleteReason::ModelStopped));
        assert_eq!(report.turns, 1);
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_and_run_continues() {
        let runner = ScriptedRunner::new(vec![
            vec![
                tool_call("agent_advance_phase", r#"{"from_phase_id": 1, "to_phase_id": 2}"#),
                tool_call("agent_update_plan", "not json"),
            ],
            vec![tool_call("agent_end_task", "{}")],
        ]);
        let d = dispatcher();
        let ctx = ToolContext::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RunNotice>();
        let session = RunSession::new(&runner, &d, &ctx).with_event_tx(&tx);
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        let report = run_agent(&session, &mut hook, "go").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.turns, 2);

        let errors: Vec<bool> = report
            .transcript
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::ToolOutput { is_error, .. } => Some(*is_error),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![true, true]);

        drop(session);
        drop(tx);
        let mut failures = 0;
        while let Some(notice) = rx.recv().await {
            if matches!(notice, RunNotice::ToolFailure { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 2);
        assert!(ctx.plan.snapshot().await.completed);
    }
}
