//! Steward 命令行入口
//!
//! 初始化日志、加载配置、组装工具与计划，用脚本回放执行器跑一次完整运行，并在控制台逐条展示事件。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use steward::agent::{create_agent_components, Collaborators};
use steward::config::load_config;
use steward::core::PlanHandle;
use steward::observability;
use steward::run::{run_agent, RunNotice, RunOutcome, RunSession, Script, ScriptedRunner};

const DEFAULT_INPUT: &str = "Research the latest news on the stock market and write a report on it";

#[derive(Debug, Parser)]
#[command(name = "steward", about = "Drive an agent through a phased plan")]
struct Args {
    /// 事件脚本（JSON：{"input": "...", "turns": [[event, ...], ...]}）
    script: PathBuf,

    /// 额外的配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 覆盖 app.max_turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// 用户输入（默认取脚本中的 input）
    #[arg(long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let mut cfg = load_config(args.config.clone())
        .context("Failed to load config")?
        .apply_legacy_env();
    if let Some(max_turns) = args.max_turns {
        cfg.app.max_turns = max_turns;
    }

    let mut components =
        create_agent_components(&cfg, Collaborators::from_config(&cfg), PlanHandle::new())
            .context("Failed to create agent")?;

    let script = Script::load(&args.script).context("Failed to load script")?;
    let runner = ScriptedRunner::from_script(&script);
    let input = args
        .input
        .or(script.input)
        .unwrap_or_else(|| DEFAULT_INPUT.to_string());

    // 控制台展示：按到达顺序打印
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RunNotice>();
    let printer = tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            if let Some(line) = notice.render() {
                println!("{line}");
            }
        }
    });

    tracing::info!(agent = %components.name, "starting run");
    let report = {
        let session = RunSession::new(&runner, &components.dispatcher, &components.ctx)
            .with_max_turns(components.max_turns)
            .with_event_tx(&tx);
        run_agent(&session, &mut components.hook, &input)
            .await
            .context("Run failed")?
    };
    drop(tx);
    printer.await.context("Printer task failed")?;

    let plan = components.ctx.plan.snapshot().await;
    match report.outcome {
        RunOutcome::Terminated => println!(
            "Run {} finished after {} turns (completed: {})",
            report.run_id, report.turns, plan.completed
        ),
        RunOutcome::Incomplete(reason) => println!(
            "Run {} ended without completing the task after {} turns ({:?})",
            report.run_id, report.turns, reason
        ),
    }
    if !plan.scheduled_tasks.is_empty() {
        println!(
            "Scheduled tasks:\n{}",
            serde_json::to_string_pretty(&plan.scheduled_tasks)?
        );
    }
    Ok(())
}
