//! 工具箱：注册表、分发器，以及 agent / message / file / info 四类工具

pub mod agent;
pub mod executor;
pub mod filesystem;
pub mod message;
pub mod registry;
pub mod search;

pub use agent::{AdvancePhaseTool, EndTaskTool, ScheduleTaskTool, UpdatePlanTool};
pub use executor::{ToolContext, ToolDispatcher};
pub use filesystem::{
    FileAppendTool, FileCopyTool, FileDeleteTool, FileListTool, FileMakeDirTool, FileMoveTool,
    FileReadTool, FileReplaceTool, FileWriteTool, PathResolver,
};
pub use message::{
    AskUserTool, ConsoleChannel, Email, EmailUserTool, Mailer, NotifyUserTool, SmtpMailer,
    UserChannel,
};
pub use registry::{Tool, ToolRegistry, ToolSpec, TypedTool};
pub use search::{DateRange, SearchTool, DEFAULT_SEARCH_ENDPOINT};
