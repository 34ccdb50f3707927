//! Steward - 任务编排内核
//!
//! 模块划分：
//! - **agent**: 按配置组装工具、分发器、计划与指令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 计划状态、阶段子句钩子、错误类型
//! - **observability**: 日志初始化
//! - **run**: 模型执行器抽象、事件流、运行主循环
//! - **tools**: 工具注册表、分发器与 17 个内置工具

pub mod agent;
pub mod config;
pub mod core;
pub mod observability;
pub mod run;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents, Collaborators};
pub use run::{run_agent, RunOutcome, RunReport, RunSession};
