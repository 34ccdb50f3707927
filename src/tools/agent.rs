//! Agent 管理工具：更新计划、推进阶段、结束任务、登记定时任务
//!
//! 四个工具都只通过 ToolContext 中的 PlanHandle 读写计划状态。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{Phase, PhaseId, PlanUpdate, ScheduleKind, ToolError};
use crate::tools::{ToolContext, TypedTool};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdatePlanArgs {
    /// 当前阶段 id；首次建立计划时应为 1
    #[serde(default)]
    pub current_phase_id: Option<PhaseId>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub phases: Option<Vec<Phase>>,
}

/// agent_update_plan：部分更新计划（缺省字段保持不变）
pub struct UpdatePlanTool;

#[async_trait]
impl TypedTool for UpdatePlanTool {
    type Args = UpdatePlanArgs;
    const NAME: &'static str = "agent_update_plan";

    fn description(&self) -> &str {
        "Create or update the task plan. Use when there is no plan yet (current_phase_id should be 1), \
         when the user makes a new request, or when new information makes the current plan obsolete. \
         Break the goal into phases by required capabilities; make delivering results to the user the final phase."
    }

    fn describe(&self, _args: &UpdatePlanArgs) -> String {
        "Updating task plan".to_string()
    }

    async fn call(&self, ctx: &ToolContext, args: UpdatePlanArgs) -> Result<String, ToolError> {
        // 先校验后写入：任一 id 为 0 则整次更新拒绝
        let zero_phase = args
            .phases
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|p| p.id == 0);
        if args.current_phase_id == Some(0) || zero_phase {
            return Err(ToolError::ArgumentDecode {
                tool: Self::NAME.to_string(),
                message: "phase ids start at 1".to_string(),
            });
        }
        Ok(ctx
            .plan
            .replace_plan(PlanUpdate {
                current_phase_id: args.current_phase_id,
                goal: args.goal,
                phases: args.phases,
            })
            .await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AdvancePhaseArgs {
    pub from_phase_id: PhaseId,
    /// 必须是 from_phase_id 的下一个 id
    pub to_phase_id: PhaseId,
}

/// agent_advance_phase：从当前阶段推进到下一阶段
pub struct AdvancePhaseTool;

#[async_trait]
impl TypedTool for AdvancePhaseTool {
    type Args = AdvancePhaseArgs;
    const NAME: &'static str = "agent_advance_phase";

    fn description(&self) -> &str {
        "Advance to the next phase in the task plan once the current phase is complete. \
         to_phase_id MUST be the next sequential id after from_phase_id; skipping phases or going \
         backward is not allowed, update the plan with agent_update_plan instead."
    }

    fn describe(&self, args: &AdvancePhaseArgs) -> String {
        format!(
            "Advancing from phase {} to {}",
            args.from_phase_id, args.to_phase_id
        )
    }

    async fn call(&self, ctx: &ToolContext, args: AdvancePhaseArgs) -> Result<String, ToolError> {
        ctx.plan
            .advance_phase(args.from_phase_id, args.to_phase_id)
            .await
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EndTaskArgs {}

/// agent_end_task：终止工具，调用后运行循环结束
pub struct EndTaskTool;

#[async_trait]
impl TypedTool for EndTaskTool {
    type Args = EndTaskArgs;
    const NAME: &'static str = "agent_end_task";

    fn description(&self) -> &str {
        "End the task and wait for new instructions. Use as the final action once all phases are \
         completed and results were delivered through message tools, or when the user asks to stop. \
         Do not use it when the task failed; ask the user for guidance instead."
    }

    fn describe(&self, _args: &EndTaskArgs) -> String {
        "Ending current task".to_string()
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn call(&self, ctx: &ToolContext, _args: EndTaskArgs) -> Result<String, ToolError> {
        Ok(ctx.plan.end_task().await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScheduleTaskArgs {
    pub task_description: String,
    pub schedule_type: ScheduleKind,
    /// ISO-8601，如 "2025-06-18 09:00:00"
    pub start_time: String,
}

/// agent_schedule_task：登记一个未来执行的任务（只记录，不执行）
pub struct ScheduleTaskTool;

#[async_trait]
impl TypedTool for ScheduleTaskTool {
    type Args = ScheduleTaskArgs;
    const NAME: &'static str = "agent_schedule_task";

    fn description(&self) -> &str {
        "Schedule a task for future execution. start_time must be an ISO-8601 timestamp."
    }

    fn describe(&self, args: &ScheduleTaskArgs) -> String {
        format!("Scheduling task: {}", args.task_description)
    }

    async fn call(&self, ctx: &ToolContext, args: ScheduleTaskArgs) -> Result<String, ToolError> {
        ctx.plan
            .schedule_task(args.task_description, args.schedule_type, &args.start_time)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolDispatcher, ToolRegistry};

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(UpdatePlanTool);
        registry.register(AdvancePhaseTool);
        registry.register(EndTaskTool);
        registry.register(ScheduleTaskTool);
        ToolDispatcher::new(registry, 5)
    }

    #[tokio::test]
    async fn test_update_then_advance() {
        let d = dispatcher();
        let ctx = ToolContext::default();
        let out = d
            .dispatch(
                &ctx,
                "agent_update_plan",
                r#"{"current_phase_id": 1, "goal": "write report",
                    "phases": [{"id": 1, "title": "research", "required_capabilities": "web-search"},
                               {"id": 2, "title": "deliver", "required_capabilities": "messaging"}]}"#,
            )
            .await
            .unwrap();
        assert!(out.contains("write report"));

        let err = d
            .dispatch(&ctx, "agent_advance_phase", r#"{"from_phase_id": 2, "to_phase_id": 3}"#)
            .await
            .unwrap_err();
        assert!(matches!(err.error, ToolError::PhaseMismatch { .. }));

        d.dispatch(&ctx, "agent_advance_phase", r#"{"from_phase_id": 1, "to_phase_id": 2}"#)
            .await
            .unwrap();
        assert_eq!(ctx.plan.snapshot().await.current_phase_id, Some(2));
    }

    #[tokio::test]
    async fn test_zero_phase_id_leaves_plan_untouched() {
        let d = dispatcher();
        let ctx = ToolContext::default();
        let err = d
            .dispatch(&ctx, "agent_update_plan", r#"{"goal": "g", "current_phase_id": 0}"#)
            .await
            .unwrap_err();
        assert!(matches!(err.error, ToolError::ArgumentDecode { .. }));
        assert_eq!(ctx.plan.snapshot().await.goal, None);
    }

    #[tokio::test]
    async fn test_schedule_task_validation() {
        let d = dispatcher();
        let ctx = ToolContext::default();
        let err = d
            .dispatch(
                &ctx,
                "agent_schedule_task",
                r#"{"task_description": "x", "schedule_type": "once", "start_time": "soon"}"#,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error, ToolError::InvalidTimestamp("soon".into()));

        let err = d
            .dispatch(
                &ctx,
                "agent_schedule_task",
                r#"{"task_description": "x", "schedule_type": "hourly", "start_time": "2025-01-01"}"#,
            )
            .await
            .unwrap_err();
        assert!(matches!(err.error, ToolError::ArgumentDecode { .. }));

        d.dispatch(
            &ctx,
            "agent_schedule_task",
            r#"{"task_description": "digest", "schedule_type": "weekly", "start_time": "2025-01-06 08:00"}"#,
        )
        .await
        .unwrap();
        let plan = ctx.plan.snapshot().await;
        assert_eq!(plan.scheduled_tasks.len(), 1);
        assert_eq!(plan.scheduled_tasks[0].schedule_kind, ScheduleKind::Weekly);
    }

    #[tokio::test]
    async fn test_end_task_is_terminal_and_idempotent() {
        let d = dispatcher();
        let ctx = ToolContext::default();
        assert!(d.is_terminal("agent_end_task"));
        assert!(!d.is_terminal("agent_update_plan"));
        d.dispatch(&ctx, "agent_end_task", "{}").await.unwrap();
        d.dispatch(&ctx, "agent_end_task", "").await.unwrap();
        assert!(ctx.plan.snapshot().await.completed);
    }
}
