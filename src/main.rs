// ==========================================
// 生产智能核心 - 守护进程入口
// ==========================================
// 技术栈: Rust + SQLite + Tokio
// 装配顺序: 日志 → 数据库 → 仓储 → 引擎 → 编排器
// 周期行为 (SLA 升级检查) 由进程内 tick 驱动; ctrl-c 优雅停机
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shopfloor_core::config::ConfigManager;
use shopfloor_core::db;
use shopfloor_core::engine::{
    AgentOrchestrator, DefectWorkflow, HandlerRegistry, MaintenanceSchedulerHandler,
    ProcurementRequestHandler, QualitySupervisorHandler, SystemClock, TracingEventPublisher,
    WorkQueue,
};
use shopfloor_core::repository::{
    ActivityLogRepository, DefectCaseRepository, InspectionRepository, WorkOrderRepository,
};

/// SLA 升级检查间隔
const ESCALATION_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shopfloor_core::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 车间遥测与自治任务调度", shopfloor_core::APP_NAME);
    tracing::info!("系统版本: {}", shopfloor_core::VERSION);
    tracing::info!("==================================================");

    let db_path =
        std::env::var("SHOPFLOOR_DB").unwrap_or_else(|_| "shopfloor.db".to_string());
    tracing::info!("使用数据库: {}", db_path);

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;
    let conn = Arc::new(Mutex::new(conn));

    // 仓储层
    let work_order_repo = Arc::new(WorkOrderRepository::new(Arc::clone(&conn)));
    let case_repo = Arc::new(DefectCaseRepository::new(Arc::clone(&conn)));
    let inspection_repo = Arc::new(InspectionRepository::new(Arc::clone(&conn)));
    let activity_repo = Arc::new(ActivityLogRepository::new(Arc::clone(&conn)));
    let config = Arc::new(ConfigManager::from_connection(Arc::clone(&conn)));

    // 引擎层
    let clock = Arc::new(SystemClock);
    let events = Arc::new(TracingEventPublisher);
    let queue = Arc::new(WorkQueue::new(
        Arc::clone(&work_order_repo),
        Arc::clone(&config),
        clock.clone(),
        events.clone(),
    ));
    let workflow = Arc::new(DefectWorkflow::new(
        Arc::clone(&case_repo),
        Arc::clone(&inspection_repo),
        Arc::clone(&work_order_repo),
        Arc::clone(&activity_repo),
        Arc::clone(&config),
        clock.clone(),
        events.clone(),
    ));

    // 内置代理处理器
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(QualitySupervisorHandler::new(Arc::clone(
        &case_repo,
    ))));
    registry.register(Arc::new(MaintenanceSchedulerHandler));
    registry.register(Arc::new(ProcurementRequestHandler));

    let orchestrator = AgentOrchestrator::new(
        Arc::clone(&queue),
        Arc::clone(&activity_repo),
        Arc::clone(&config),
        clock,
        events,
        registry,
    );
    let handle = orchestrator.start()?;
    tracing::info!("编排器已启动, 工作者数量: {}", handle.worker_count());

    // SLA 升级检查 tick
    let escalation_workflow = Arc::clone(&workflow);
    let escalation_tick = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ESCALATION_TICK);
        loop {
            interval.tick().await;
            match escalation_workflow.check_escalations() {
                Ok(escalated) if !escalated.is_empty() => {
                    tracing::info!(count = escalated.len(), "本轮 SLA 升级完成");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "SLA 升级检查失败");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到停机信号,开始优雅停机");
    escalation_tick.abort();
    handle.shutdown().await;
    tracing::info!("守护进程已退出");
    Ok(())
}
