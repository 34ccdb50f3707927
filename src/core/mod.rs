//! 核心层：错误类型、计划状态、指令同步

pub mod error;
pub mod instructions;
pub mod plan;

pub use error::{AgentError, ToolError, ToolFailure};
pub use instructions::{phase_clause, InstructionBuffer, PhaseClauseHook};
pub use plan::{
    parse_start_time, Phase, PhaseId, PlanHandle, PlanState, PlanUpdate, ScheduleKind,
    ScheduledTask,
};
