//! 运行层：模型执行器抽象、事件、主循环、脚本回放执行器

pub mod events;
pub mod loop_;
pub mod model;
pub mod scripted;

pub use events::{RunEvent, RunNotice};
pub use loop_::{
    describe_call, run_agent, IncompleteReason, RunOutcome, RunReport, RunSession,
    DEFAULT_MAX_TURNS,
};
pub use model::{EventStream, ModelRunner, TranscriptItem, TurnRequest};
pub use scripted::{Script, ScriptedRunner};
