//! 任务计划状态：目标、阶段列表、当前阶段、完成标记、定时任务登记
//!
//! PlanState 只通过四个操作改变：replace_plan / advance_phase / end_task / schedule_task。
//! 每个操作先完整校验再写入，失败时状态保持不变。PlanHandle 用一把互斥锁包裹，
//! 多个运行共享同一计划时所有写操作串行执行。

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::ToolError;

/// 阶段编号（从 1 开始）
pub type PhaseId = u32;

/// 计划中的一个阶段；创建后不可修改，只能随整个列表一起替换
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Phase {
    pub id: PhaseId,
    pub title: String,
    /// 该阶段需要的能力（如 web-search、messaging），纯对话类阶段留空
    pub required_capabilities: String,
}

impl Phase {
    pub fn new(id: PhaseId, title: impl Into<String>, required_capabilities: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            required_capabilities: required_capabilities.into(),
        }
    }
}

/// 定时任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Recurring,
    Daily,
    Weekly,
    Monthly,
}

/// 已登记的定时任务（只记录意图，由外部调度器执行）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTask {
    pub description: String,
    pub schedule_kind: ScheduleKind,
    pub start_time: DateTime<Utc>,
}

/// 计划状态本体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanState {
    pub goal: Option<String>,
    pub phases: Vec<Phase>,
    pub current_phase_id: Option<PhaseId>,
    pub completed: bool,
    pub scheduled_tasks: Vec<ScheduledTask>,
}

/// replace_plan 的部分更新：缺省字段保持原值
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub current_phase_id: Option<PhaseId>,
    pub goal: Option<String>,
    pub phases: Option<Vec<Phase>>,
}

impl PlanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按 id 查找阶段（不假设 id 与下标对应）
    pub fn phase(&self, id: PhaseId) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.current_phase_id.and_then(|id| self.phase(id))
    }

    /// 部分更新计划；带 phases 视为新计划，completed 复位
    pub fn replace_plan(&mut self, update: PlanUpdate) -> String {
        if let Some(id) = update.current_phase_id {
            self.current_phase_id = Some(id);
        }
        if let Some(goal) = update.goal {
            self.goal = Some(goal);
        }
        if let Some(phases) = update.phases {
            self.phases = phases;
            self.completed = false;
        }
        if let Some(id) = self.current_phase_id {
            if !self.phases.is_empty() && self.phase(id).is_none() {
                tracing::warn!(phase_id = id, "current phase is not part of the plan");
            }
        }
        tracing::info!(
            goal = ?self.goal,
            current_phase_id = ?self.current_phase_id,
            phases = self.phases.len(),
            "task plan updated"
        );
        format!("Task plan updated:\n{}", self.render_plan(&format!(
            "Current phase:\n{}",
            display_id(self.current_phase_id)
        )))
    }

    /// 推进阶段：from 必须是当前阶段，to 必须是 from + 1 且存在于计划中
    pub fn advance_phase(&mut self, from: PhaseId, to: PhaseId) -> Result<String, ToolError> {
        if self.current_phase_id != Some(from) {
            return Err(ToolError::PhaseMismatch {
                current: self.current_phase_id,
                from,
            });
        }
        if from.checked_add(1) != Some(to) {
            return Err(ToolError::NonSequentialPhase { from, to });
        }
        if !self.phases.is_empty() && self.phase(to).is_none() {
            return Err(ToolError::UnknownPhase(to));
        }

        self.current_phase_id = Some(to);
        tracing::info!(from, to, "advanced phase");
        Ok(format!(
            "Advanced to the next phase:\n{}",
            self.render_plan(&format!("Previous phase: {from}\n\nNext phase: {to}"))
        ))
    }

    /// 标记任务完成（幂等）
    pub fn end_task(&mut self) -> String {
        self.completed = true;
        tracing::info!("task marked as completed");
        "ok".to_string()
    }

    /// 登记定时任务；start_time 解析失败时不写入
    pub fn schedule_task(
        &mut self,
        description: String,
        schedule_kind: ScheduleKind,
        start_time: &str,
    ) -> Result<String, ToolError> {
        let start_time = parse_start_time(start_time)?;
        let reply = format!(
            "Scheduled task '{}' ({:?}) starting at {}",
            description,
            schedule_kind,
            start_time.to_rfc3339()
        );
        tracing::info!(task = %description, kind = ?schedule_kind, start = %start_time, "scheduled task");
        self.scheduled_tasks.push(ScheduledTask {
            description,
            schedule_kind,
            start_time,
        });
        Ok(reply)
    }

    fn render_plan(&self, tail: &str) -> String {
        let mut phases = String::new();
        for p in &self.phases {
            let _ = write!(phases, "{}. {}", p.id, p.title);
            if !p.required_capabilities.is_empty() {
                let _ = write!(phases, " [{}]", p.required_capabilities);
            }
            phases.push('\n');
        }
        format!(
            "<task_plan>\nGoal:\n{}\n\nPhases:\n{}\n{}\n</task_plan>\n",
            self.goal.as_deref().unwrap_or(""),
            phases,
            tail
        )
    }
}

fn display_id(id: Option<PhaseId>) -> String {
    id.map(|i| i.to_string()).unwrap_or_default()
}

/// 解析 ISO-8601 时间；不带时区的时间按 UTC 处理，仅日期时取零点
pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, ToolError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(ToolError::InvalidTimestamp(raw.to_string()))
}

/// 共享计划句柄：所有写操作在一把锁内完成
#[derive(Debug, Clone, Default)]
pub struct PlanHandle {
    inner: Arc<Mutex<PlanState>>,
}

impl PlanHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: PlanState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn snapshot(&self) -> PlanState {
        self.inner.lock().await.clone()
    }

    pub async fn replace_plan(&self, update: PlanUpdate) -> String {
        self.inner.lock().await.replace_plan(update)
    }

    pub async fn advance_phase(&self, from: PhaseId, to: PhaseId) -> Result<String, ToolError> {
        self.inner.lock().await.advance_phase(from, to)
    }

    pub async fn end_task(&self) -> String {
        self.inner.lock().await.end_task()
    }

    pub async fn schedule_task(
        &self,
        description: String,
        schedule_kind: ScheduleKind,
        start_time: &str,
    ) -> Result<String, ToolError> {
        self.inner
            .lock()
            .await
            .schedule_task(description, schedule_kind, start_time)
    }
}
