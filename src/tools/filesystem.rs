//! 文件系统工具
//!
//! PathResolver 负责 `~` 展开与绝对路径归一化（相对路径基于 base_dir）；
//! 九个 file_* 工具共享同一个 resolver。写入 / 追加 / 复制 / 移动会自动创建父目录。

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::ToolError;
use crate::tools::{ToolContext, TypedTool};

/// 路径解析：展开 `~`，相对路径拼到 base_dir，再去掉 `.` / `..`
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

impl PathResolver {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base = base_dir.as_ref().to_path_buf();
        let base_dir = if base.is_absolute() {
            base
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&base))
                .unwrap_or(base)
        };
        Self {
            base_dir: normalize(&base_dir),
        }
    }

    /// 以当前工作目录为基准
    pub fn from_cwd() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        let full = if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        };
        normalize(&full)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// 词法归一化（不要求路径存在）
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn ensure_parent(path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// 按半开区间 [start, end) 截取行；越界或空区间返回 InvalidRange
pub fn slice_lines(content: &str, start: Option<i64>, end: Option<i64>) -> Result<String, ToolError> {
    if start.is_none() && end.is_none() {
        return Ok(content.to_string());
    }
    let lines: Vec<&str> = content.lines().collect();
    let line_count = lines.len();
    let invalid = || ToolError::InvalidRange {
        start,
        end,
        line_count,
    };
    let from = start.unwrap_or(0);
    let to = end.unwrap_or(line_count as i64);
    if from < 0 || to > line_count as i64 || from >= to {
        return Err(invalid());
    }
    Ok(lines[from as usize..to as usize].join("\n"))
}

/// 恰好替换一处 old_text；0 处或多处均拒绝
pub fn replace_once(content: &str, old_text: &str, new_text: &str) -> Result<String, ToolError> {
    let occurrences = if old_text.is_empty() {
        0
    } else {
        content.matches(old_text).count()
    };
    if occurrences != 1 {
        return Err(ToolError::AmbiguousReplacement { occurrences });
    }
    Ok(content.replacen(old_text, new_text, 1))
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), ToolError> {
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| ToolError::Io(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ToolError::Io(e.to_string()))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            ensure_parent(&target)?;
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

macro_rules! fs_tool {
    ($ty:ident) => {
        pub struct $ty {
            resolver: PathResolver,
        }

        impl $ty {
            pub fn new(resolver: PathResolver) -> Self {
                Self { resolver }
            }
        }
    };
}

fs_tool!(FileReadTool);
fs_tool!(FileWriteTool);
fs_tool!(FileAppendTool);
fs_tool!(FileReplaceTool);
fs_tool!(FileDeleteTool);
fs_tool!(FileListTool);
fs_tool!(FileMakeDirTool);
fs_tool!(FileCopyTool);
fs_tool!(FileMoveTool);

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileReadArgs {
    pub file: String,
    /// 起始行（从 0 开始，含）
    #[serde(default)]
    pub start_line: Option<i64>,
    /// 结束行（不含）
    #[serde(default)]
    pub end_line: Option<i64>,
    /// 兼容字段，忽略
    #[serde(default)]
    pub sudo: bool,
}

#[async_trait]
impl TypedTool for FileReadTool {
    type Args = FileReadArgs;
    const NAME: &'static str = "file_read";

    fn description(&self) -> &str {
        "Read the content of a text file, optionally only lines [start_line, end_line). \
         When uncertain, start by reading the first 20 lines."
    }

    fn describe(&self, args: &FileReadArgs) -> String {
        format!("Reading file {}", args.file)
    }

    async fn call(&self, _ctx: &ToolContext, args: FileReadArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.file);
        if !path.exists() {
            return Err(ToolError::NotFound(args.file));
        }
        if args.sudo {
            tracing::debug!("file_read sudo flag ignored");
        }
        let content = fs::read_to_string(&path)?;
        slice_lines(&content, args.start_line, args.end_line)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PathContentArgs {
    pub path: String,
    pub content: String,
}

#[async_trait]
impl TypedTool for FileWriteTool {
    type Args = PathContentArgs;
    const NAME: &'static str = "file_write";

    fn description(&self) -> &str {
        "Create a file or overwrite it with new content. Always output the full content."
    }

    fn describe(&self, args: &PathContentArgs) -> String {
        format!("Creating file {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: PathContentArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.path);
        ensure_parent(&path)?;
        fs::write(&path, args.content)?;
        tracing::info!(path = %path.display(), "file written");
        Ok(format!("File written: {}", args.path))
    }
}

#[async_trait]
impl TypedTool for FileAppendTool {
    type Args = PathContentArgs;
    const NAME: &'static str = "file_append_text";

    fn description(&self) -> &str {
        "Append content to a text file without overwriting it."
    }

    fn describe(&self, args: &PathContentArgs) -> String {
        format!("Adding content to file {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: PathContentArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.path);
        ensure_parent(&path)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(args.content.as_bytes())?;
        Ok(format!("File appended: {}", args.path))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileReplaceArgs {
    pub path: String,
    /// 必须在文件中恰好出现一次
    pub old_text: String,
    pub new_text: String,
}

#[async_trait]
impl TypedTool for FileReplaceTool {
    type Args = FileReplaceArgs;
    const NAME: &'static str = "file_replace_text";

    fn description(&self) -> &str {
        "Replace a string in a text file. old_text must match exactly one place in the file; \
         zero or multiple matches are rejected."
    }

    fn describe(&self, args: &FileReplaceArgs) -> String {
        format!("Editing file {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: FileReplaceArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.path);
        if !path.is_file() {
            return Err(ToolError::NotFound(args.path));
        }
        let content = fs::read_to_string(&path)?;
        let updated = replace_once(&content, &args.old_text, &args.new_text)?;
        fs::write(&path, updated)?;
        Ok(format!("File edited: {}", args.path))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PathArgs {
    pub path: String,
}

#[async_trait]
impl TypedTool for FileDeleteTool {
    type Args = PathArgs;
    const NAME: &'static str = "file_delete";

    fn description(&self) -> &str {
        "Delete a file or a directory tree. A missing path is not an error."
    }

    fn describe(&self, args: &PathArgs) -> String {
        format!("Deleting file {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: PathArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.path);
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(format!("File deleted: {}", args.path))
    }
}

#[async_trait]
impl TypedTool for FileListTool {
    type Args = PathArgs;
    const NAME: &'static str = "file_list";

    fn description(&self) -> &str {
        "List the files and directories in a directory (absolute paths)."
    }

    fn describe(&self, args: &PathArgs) -> String {
        format!("Listing contents of directory {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: PathArgs) -> Result<String, ToolError> {
        let path = self.resolver.resolve(&args.path);
        if !path.is_dir() {
            return Err(ToolError::NotFound(args.path));
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&path)? {
            entries.push(entry?.path().display().to_string());
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

#[async_trait]
impl TypedTool for FileMakeDirTool {
    type Args = PathArgs;
    const NAME: &'static str = "file_make_dir";

    fn description(&self) -> &str {
        "Create a directory and any missing parents."
    }

    fn describe(&self, args: &PathArgs) -> String {
        format!("Creating directory {}", args.path)
    }

    async fn call(&self, _ctx: &ToolContext, args: PathArgs) -> Result<String, ToolError> {
        fs::create_dir_all(self.resolver.resolve(&args.path))?;
        Ok(format!("Directory created: {}", args.path))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransferArgs {
    pub source: String,
    pub destination: String,
}

#[async_trait]
impl TypedTool for FileCopyTool {
    type Args = TransferArgs;
    const NAME: &'static str = "file_copy";

    fn description(&self) -> &str {
        "Copy a file or a directory tree to a destination."
    }

    fn describe(&self, args: &TransferArgs) -> String {
        format!("Copying {} to {}", args.source, args.destination)
    }

    async fn call(&self, _ctx: &ToolContext, args: TransferArgs) -> Result<String, ToolError> {
        let src = self.resolver.resolve(&args.source);
        let dst = self.resolver.resolve(&args.destination);
        if src.is_dir() {
            copy_tree(&src, &dst)?;
        } else if src.is_file() {
            ensure_parent(&dst)?;
            fs::copy(&src, &dst)?;
        } else {
            return Err(ToolError::NotFound(args.source));
        }
        Ok(format!("File copied: {} to {}", args.source, args.destination))
    }
}

#[async_trait]
impl TypedTool for FileMoveTool {
    type Args = TransferArgs;
    const NAME: &'static str = "file_move";

    fn description(&self) -> &str {
        "Move or rename a file or directory."
    }

    fn describe(&self, args: &TransferArgs) -> String {
        format!("Moving {} to {}", args.source, args.destination)
    }

    async fn call(&self, _ctx: &ToolContext, args: TransferArgs) -> Result<String, ToolError> {
        let src = self.resolver.resolve(&args.source);
        let dst = self.resolver.resolve(&args.destination);
        if !src.exists() {
            return Err(ToolError::NotFound(args.source));
        }
        ensure_parent(&dst)?;
        if fs::rename(&src, &dst).is_err() {
            // 跨设备时 rename 失败，退回复制后删除
            if src.is_dir() {
                copy_tree(&src, &dst)?;
                fs::remove_dir_all(&src)?;
            } else {
                fs::copy(&src, &dst)?;
                fs::remove_file(&src)?;
            }
        }
        Ok(format!("File moved: {} to {}", args.source, args.destination))
    }
}
