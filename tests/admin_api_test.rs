// ==========================================
// 管理查询 API 集成测试
// ==========================================
// 职责: 验证死信/OEE/开放缺陷/队列水位查询面
// ==========================================


use serde_json::json;
use std::sync::Arc;

use shopfloor_core::api::{AdminApi, ApiError};
use shopfloor_core::domain::activity_log::AgentActivityRecord;
use shopfloor_core::domain::types::{
    ActivityStatus, DefectSeverity, ShiftType, WorkOrderPriority, WorkOrderType,
};
use shopfloor_core::domain::work_order::WorkOrder;
use shopfloor_core::engine::{Clock, OeeAggregator};
use shopfloor_core::repository::ProductionLogSource;
use test_helpers::{
    base_time, create_failed_inspection, create_test_production_entry, test_date, CoreStack,
};

fn make_api(stack: &CoreStack) -> AdminApi {
    AdminApi::new(
        Arc::clone(&stack.work_order_repo),
        Arc::clone(&stack.case_repo),
        Arc::clone(&stack.oee_repo),
        Arc::clone(&stack.telemetry_repo),
        Arc::clone(&stack.activity_repo),
    )
}

#[test]
fn test_queue_stats_and_dead_letters() {
    let stack = CoreStack::create().expect("Failed to create stack");
    stack
        .config
        .set_value("global", "queue.max_attempts", "0")
        .unwrap();
    let queue = stack.work_queue();
    let api = make_api(&stack);

    // 一张直接死信 (max_attempts=0), 一张待租约
    let doomed = WorkOrder::new(
        WorkOrderType::Quality,
        WorkOrderPriority::Normal,
        None,
        json!({}),
        stack.clock.now(),
    );
    queue.enqueue(&doomed).unwrap();
    let leased = queue
        .lease_default(WorkOrderType::Quality, "agent-a")
        .unwrap()
        .unwrap();
    queue.nack(&leased.order_id, "agent-a", "失败").unwrap();

    let pending = WorkOrder::new(
        WorkOrderType::Maintenance,
        WorkOrderPriority::Low,
        None,
        json!({}),
        stack.clock.now(),
    );
    queue.enqueue(&pending).unwrap();

    let stats = api.queue_stats().unwrap();
    assert_eq!(stats.dead_letter, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.leased, 0);

    let dead = api.list_dead_letter_orders().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].order_id, doomed.order_id);
    assert_eq!(dead[0].state, "DEAD_LETTER");
}

#[test]
fn test_oee_metric_query() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let api = make_api(&stack);

    let source: Arc<dyn ProductionLogSource> = stack.production_log_repo.clone();
    let aggregator = OeeAggregator::new(
        Arc::clone(&stack.telemetry_repo),
        source,
        Arc::clone(&stack.oee_repo),
        Arc::clone(&stack.config),
        stack.clock.clone(),
    );

    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            480.0,
            470.0,
            0.0,
        ))
        .unwrap();
    aggregator
        .compute_shift(&shopfloor_core::domain::production::ShiftWindow::from_calendar(
            "M1",
            test_date(),
            ShiftType::Day,
            8,
            20,
            480,
        ))
        .unwrap();

    let metric = api
        .get_oee_metric("M1", test_date(), ShiftType::Day)
        .unwrap()
        .expect("metric missing");
    assert!(metric.oee > 0.0);

    // 未计算的班次返回 None, 空机台编码报错
    assert!(api
        .get_oee_metric("M1", test_date(), ShiftType::Night)
        .unwrap()
        .is_none());
    assert!(matches!(
        api.get_oee_metric("  ", test_date(), ShiftType::Day),
        Err(ApiError::InvalidInput(_))
    ));
}

#[test]
fn test_open_defect_cases_listing() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();
    let api = make_api(&stack);

    let first = create_failed_inspection("BATCH-101", base_time());
    workflow.record_inspection(&first).unwrap();
    let open_case = workflow
        .open_case(&first, DefectSeverity::Major, None)
        .unwrap();

    let second = create_failed_inspection("BATCH-102", base_time());
    workflow.record_inspection(&second).unwrap();
    let closed_case = workflow
        .open_case(&second, DefectSeverity::Minor, None)
        .unwrap();
    workflow
        .advance(
            &closed_case.case_id,
            shopfloor_core::domain::types::DefectState::Investigating,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(
            &closed_case.case_id,
            shopfloor_core::domain::types::DefectState::CorrectiveActionAssigned,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(
            &closed_case.case_id,
            shopfloor_core::domain::types::DefectState::PendingVerification,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(
            &closed_case.case_id,
            shopfloor_core::domain::types::DefectState::Closed,
            "QE-01",
            Some("复检合格"),
        )
        .unwrap();

    let open = api.list_open_defect_cases().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].case_id, open_case.case_id);
}

#[test]
fn test_agent_activity_listing() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let api = make_api(&stack);

    stack
        .activity_repo
        .append(&AgentActivityRecord::success(
            "maintenance",
            None,
            None,
            None,
            5,
            base_time(),
        ))
        .unwrap();
    stack
        .activity_repo
        .append(&AgentActivityRecord::failed(
            "maintenance",
            None,
            None,
            "下游系统超时",
            9,
            base_time() + chrono::Duration::seconds(1),
        ))
        .unwrap();
    stack
        .activity_repo
        .append(&AgentActivityRecord::success(
            "quality", None, None, None, 3,
            base_time(),
        ))
        .unwrap();

    // 只看指定代理类型,最近在前
    let recent = api.list_agent_activity("maintenance", 10).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].status, ActivityStatus::Failed);

    assert_eq!(api.list_agent_activity("maintenance", 1).unwrap().len(), 1);
    assert!(matches!(
        api.list_agent_activity("  ", 10),
        Err(ApiError::InvalidInput(_))
    ));
}

#[test]
fn test_rejected_reading_count_surface() {
    let stack = CoreStack::create().expect("Failed to create stack");
    stack
        .config
        .set_value("global", "ingest.rejected_reading_policy", "REVIEW")
        .unwrap();
    let api = make_api(&stack);

    let ingestor = shopfloor_core::engine::TelemetryIngestor::new(
        Arc::clone(&stack.telemetry_repo),
        Arc::clone(&stack.config),
        stack.clock.clone(),
    );
    ingestor
        .ingest_now(&test_helpers::create_test_reading(
            "EQ-01",
            "temperature",
            850.0,
            base_time(),
        ))
        .unwrap();
    let _ = ingestor.ingest_now(&test_helpers::create_test_reading(
        "EQ-01",
        "temperature",
        820.0,
        base_time() - chrono::Duration::hours(3),
    ));

    assert_eq!(api.rejected_reading_count().unwrap(), 1);
}
