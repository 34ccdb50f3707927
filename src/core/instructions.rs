//! 指令文本与阶段子句
//!
//! 指令 = 基础文本 + 至多一条「当前阶段」子句，渲染时拼接，不做子串查找替换。
//! PhaseClauseHook 在每次工具执行结束后触发：阶段未变则不动，阶段变化则替换子句。

use crate::core::plan::{PhaseId, PlanState};

/// Agent 的运行指令：手写的基础部分 + 可选的阶段子句
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBuffer {
    base: String,
    phase_clause: Option<String>,
}

impl InstructionBuffer {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            phase_clause: None,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn phase_clause(&self) -> Option<&str> {
        self.phase_clause.as_deref()
    }

    /// 完整指令文本（每轮整体交给模型）
    pub fn render(&self) -> String {
        match &self.phase_clause {
            Some(clause) => format!("{}\n\n{}", self.base, clause),
            None => self.base.clone(),
        }
    }

    fn set_phase_clause(&mut self, clause: Option<String>) {
        self.phase_clause = clause;
    }
}

/// 生成某个阶段的子句；标题按 id 查找，不存在时为空串
pub fn phase_clause(plan: &PlanState, phase_id: PhaseId) -> String {
    let goal = plan.goal.as_deref().unwrap_or("");
    let title = plan.phase(phase_id).map(|p| p.title.as_str()).unwrap_or("");
    format!(
        "You are in phase {phase_id}, with the goal of {goal} and the current phase is {title}. \
         If this is empty, then create a plan first. If it is not empty, then continue with the \
         current phase, and consider this as your main task."
    )
}

/// 工具结束钩子：独占指令缓冲区，保证其中只有一条与当前阶段对应的子句
#[derive(Debug, Clone)]
pub struct PhaseClauseHook {
    instructions: InstructionBuffer,
    last_phase_id: Option<PhaseId>,
}

impl PhaseClauseHook {
    pub fn new(instructions: InstructionBuffer) -> Self {
        Self {
            instructions,
            last_phase_id: None,
        }
    }

    pub fn instructions(&self) -> &InstructionBuffer {
        &self.instructions
    }

    pub fn last_phase_id(&self) -> Option<PhaseId> {
        self.last_phase_id
    }

    /// 读取计划的当前阶段并同步子句；返回指令是否发生变化
    pub fn on_tool_end(&mut self, plan: &PlanState) -> bool {
        let phase_id = plan.current_phase_id;
        if phase_id == self.last_phase_id {
            return false;
        }

        let clause = phase_id.map(|id| phase_clause(plan, id));
        self.instructions.set_phase_clause(clause);
        tracing::debug!(from = ?self.last_phase_id, to = ?phase_id, "phase clause updated");
        self.last_phase_id = phase_id;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{Phase, PlanUpdate};

    fn plan_at(phase: PhaseId) -> PlanState {
        let mut plan = PlanState::new();
        plan.replace_plan(PlanUpdate {
            current_phase_id: Some(phase),
            goal: Some("write report".into()),
            phases: Some(vec![
                Phase::new(1, "research", "web-search"),
                Phase::new(2, "draft", ""),
                Phase::new(3, "deliver", "messaging"),
            ]),
        });
        plan
    }

    fn clause_count(text: &str) -> usize {
        text.matches("You are in phase").count()
    }

    #[test]
    fn test_no_clause_without_plan() {
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        assert!(!hook.on_tool_end(&PlanState::new()));
        assert_eq!(hook.instructions().render(), "base");
    }

    #[test]
    fn test_repeated_firing_is_idempotent() {
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base"));
        let plan = plan_at(1);
        assert!(hook.on_tool_end(&plan));
        let first = hook.instructions().render();
        assert!(!hook.on_tool_end(&plan));
        assert_eq!(hook.instructions().render(), first);
        assert!(first.starts_with("base\n\nYou are in phase 1"));
        assert!(first.contains("the current phase is research."));
    }

    #[test]
    fn test_single_clause_after_many_changes() {
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new("base prompt"));
        for phase in [1, 2, 3, 1, 2] {
            hook.on_tool_end(&plan_at(phase));
        }
        let text = hook.instructions().render();
        assert_eq!(clause_count(&text), 1);
        assert!(text.contains("You are in phase 2,"));
        assert!(text.contains("the current phase is draft."));
        assert_eq!(hook.instructions().base(), "base prompt");
    }

    #[test]
    fn test_unknown_phase_renders_empty_title() {
        let mut hook = PhaseClauseHook::new(InstructionBuffer::new(""));
        hook.on_tool_end(&plan_at(9));
        let clause = hook.instructions().phase_clause().unwrap();
        assert!(clause.contains("the current phase is . If this is empty"));
    }
}
