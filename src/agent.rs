//! Agent 组装
//!
//! create_agent_components 按配置注册全部工具（agent / message / file / info 四类）、
//! 构建分发器与共享计划，并读取基础指令；注册在这里一次性完成，之后注册表只读。

use std::path::Path;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentError, InstructionBuffer, PhaseClauseHook, PlanHandle};
use crate::tools::{
    AdvancePhaseTool, AskUserTool, ConsoleChannel, EmailUserTool, EndTaskTool, FileAppendTool,
    FileCopyTool, FileDeleteTool, FileListTool, FileMakeDirTool, FileMoveTool, FileReadTool,
    FileReplaceTool, FileWriteTool, Mailer, NotifyUserTool, PathResolver, ScheduleTaskTool,
    SearchTool, SmtpMailer, ToolContext, ToolDispatcher, ToolRegistry, UpdatePlanTool,
    UserChannel,
};

/// 内置基础指令（未配置 instructions_path 时使用）
pub const DEFAULT_INSTRUCTIONS: &str = "You are an autonomous assistant that completes tasks by calling tools.\n\
Always start by creating a task plan with agent_update_plan, work through the phases in order, \
advance with agent_advance_phase only when a phase is complete, deliver results to the user with \
message_notify_user, and finish with agent_end_task.";

/// 外部协作者：用户交互通道与邮件投递
pub struct Collaborators {
    pub user: Arc<dyn UserChannel>,
    pub mailer: Arc<dyn Mailer>,
}

impl Collaborators {
    /// 控制台 + SMTP
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            user: Arc::new(ConsoleChannel::new()),
            mailer: Arc::new(SmtpMailer::new(
                cfg.tools.email.host(),
                cfg.tools.email.port(),
            )),
        }
    }
}

/// 预构建的 Agent 组件
pub struct AgentComponents {
    pub name: String,
    pub dispatcher: ToolDispatcher,
    pub ctx: ToolContext,
    /// 持有指令文本的阶段钩子
    pub hook: PhaseClauseHook,
    pub max_turns: usize,
}

/// 读取基础指令：配置的文件优先，读取失败时退回内置指令
pub fn load_instructions(path: Option<&Path>) -> String {
    match path.map(std::fs::read_to_string) {
        Some(Ok(text)) => text,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "failed to read instructions, using built-in");
            DEFAULT_INSTRUCTIONS.to_string()
        }
        None => DEFAULT_INSTRUCTIONS.to_string(),
    }
}

/// 注册全部工具
pub fn build_registry(cfg: &AppConfig, collaborators: &Collaborators) -> ToolRegistry {
    let resolver = match &cfg.tools.base_dir {
        Some(dir) => PathResolver::new(dir),
        None => PathResolver::from_cwd(),
    };

    let mut tools = ToolRegistry::new();
    tools.register(UpdatePlanTool);
    tools.register(AdvancePhaseTool);
    tools.register(EndTaskTool);
    tools.register(ScheduleTaskTool);

    tools.register(NotifyUserTool::new(collaborators.user.clone()));
    tools.register(AskUserTool::new(collaborators.user.clone()));
    tools.register(EmailUserTool::new(
        collaborators.mailer.clone(),
        cfg.tools.email.from(),
    ));

    tools.register(FileReadTool::new(resolver.clone()));
    tools.register(FileWriteTool::new(resolver.clone()));
    tools.register(FileAppendTool::new(resolver.clone()));
    tools.register(FileReplaceTool::new(resolver.clone()));
    tools.register(FileDeleteTool::new(resolver.clone()));
    tools.register(FileListTool::new(resolver.clone()));
    tools.register(FileMakeDirTool::new(resolver.clone()));
    tools.register(FileCopyTool::new(resolver.clone()));
    tools.register(FileMoveTool::new(resolver));

    let search = &cfg.tools.search;
    if search.enabled {
        tools.register(SearchTool::new(
            search.endpoint.clone(),
            search.api_key.clone().unwrap_or_default(),
            search.cx.clone().unwrap_or_default(),
            search.timeout_secs,
            search.max_result_chars,
        ));
    }
    tools
}

/// 创建 Agent 组件；配置不合法（如缺少搜索凭据）时在任何运行开始前返回错误
pub fn create_agent_components(
    cfg: &AppConfig,
    collaborators: Collaborators,
    plan: PlanHandle,
) -> Result<AgentComponents, AgentError> {
    cfg.validate()?;

    let registry = build_registry(cfg, &collaborators);
    tracing::info!(tools = ?registry.tool_names(), "tools registered");

    let base = load_instructions(cfg.app.instructions_path.as_deref());
    Ok(AgentComponents {
        name: cfg.app.name.clone(),
        dispatcher: ToolDispatcher::new(registry, cfg.tools.tool_timeout_secs),
        ctx: ToolContext::new(plan),
        hook: PhaseClauseHook::new(InstructionBuffer::new(base)),
        max_turns: cfg.app.max_turns,
    })
}
