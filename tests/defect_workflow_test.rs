// ==========================================
// 缺陷工作流集成测试
// ==========================================
// 职责: 验证状态机全生命周期、闭环不变式、SLA 升级与重复升级防护
// ==========================================


use chrono::Duration;

use shopfloor_core::domain::activity_log::AgentActivityRecord;
use shopfloor_core::domain::types::{DefectSeverity, DefectState, WorkOrderType};
use shopfloor_core::engine::{WorkflowError, WORKFLOW_AGENT};
use shopfloor_core::repository::RepositoryError;
use test_helpers::{base_time, create_failed_inspection, CoreStack};

#[test]
fn test_full_lifecycle_to_closed() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-001", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Major, Some("QE-01".to_string()))
        .unwrap();
    assert_eq!(case.state, DefectState::Opened);

    workflow
        .advance(&case.case_id, DefectState::Investigating, "QE-01", None)
        .unwrap();
    workflow
        .advance(
            &case.case_id,
            DefectState::CorrectiveActionAssigned,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::PendingVerification, "QE-01", None)
        .unwrap();
    let closed = workflow
        .advance(
            &case.case_id,
            DefectState::Closed,
            "QE-01",
            Some("更换导卫辊并复检合格"),
        )
        .unwrap();

    assert_eq!(closed.state, DefectState::Closed);
    assert!(closed.closed_at.is_some());
    assert!(closed.closure_invariant_holds());

    // 整改结论回写质检记录
    let stored = stack
        .inspection_repo
        .find(&inspection.inspection_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.corrective_action.as_deref(), Some("更换导卫辊并复检合格"));
}

#[test]
fn test_passed_inspection_cannot_open_case() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let mut inspection = create_failed_inspection("BATCH-002", base_time());
    inspection.passed = true;
    inspection.defect_codes.clear();
    workflow.record_inspection(&inspection).unwrap();

    assert!(matches!(
        workflow.open_case(&inspection, DefectSeverity::Minor, None),
        Err(WorkflowError::InspectionPassed(_))
    ));
}

#[test]
fn test_invalid_transition_rejected_without_state_change() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-003", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Minor, None)
        .unwrap();

    // OPENED 不能跳到 PENDING_VERIFICATION
    let result = workflow.advance(
        &case.case_id,
        DefectState::PendingVerification,
        "QE-01",
        None,
    );
    assert!(matches!(
        result,
        Err(WorkflowError::InvalidTransition { .. })
    ));

    let stored = stack.case_repo.find(&case.case_id).unwrap().unwrap();
    assert_eq!(stored.state, DefectState::Opened);
}

#[test]
fn test_close_requires_nonempty_resolution() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-004", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Major, None)
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::Investigating, "QE-01", None)
        .unwrap();
    workflow
        .advance(
            &case.case_id,
            DefectState::CorrectiveActionAssigned,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::PendingVerification, "QE-01", None)
        .unwrap();

    // 缺失或全空白的结论都拒绝
    assert!(matches!(
        workflow.advance(&case.case_id, DefectState::Closed, "QE-01", None),
        Err(WorkflowError::MissingResolution(_))
    ));
    assert!(matches!(
        workflow.advance(&case.case_id, DefectState::Closed, "QE-01", Some("   ")),
        Err(WorkflowError::MissingResolution(_))
    ));

    let stored = stack.case_repo.find(&case.case_id).unwrap().unwrap();
    assert_eq!(stored.state, DefectState::PendingVerification);
}

#[test]
fn test_critical_case_escalates_after_sla() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-005", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Critical, None)
        .unwrap();

    // SLA 内不升级 (CRITICAL 24h)
    stack.clock.advance(Duration::hours(23));
    assert!(workflow.check_escalations().unwrap().is_empty());

    stack.clock.advance(Duration::hours(2));
    let escalated = workflow.check_escalations().unwrap();
    assert_eq!(escalated, vec![case.case_id.clone()]);

    let stored = stack.case_repo.find(&case.case_id).unwrap().unwrap();
    assert_eq!(stored.state, DefectState::Escalated);
    assert!(stored.escalated);

    // 监督代理工单已建 (quality 类型,主体为缺陷工单号)
    assert!(stack
        .work_order_repo
        .has_open_order(WorkOrderType::Quality, &case.case_id)
        .unwrap());
    assert_eq!(stack.events.count_of("DefectEscalated"), 1);
}

#[test]
fn test_escalation_tick_is_not_duplicated() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-006", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Major, None)
        .unwrap();

    stack.clock.advance(Duration::hours(73));
    assert_eq!(workflow.check_escalations().unwrap().len(), 1);

    // 重复 tick: 不重复升级、不重复建单、不重复发事件
    for _ in 0..3 {
        assert!(workflow.check_escalations().unwrap().is_empty());
    }
    assert_eq!(stack.events.count_of("DefectEscalated"), 1);

    let queue = stack.work_queue();
    let supervision = queue
        .lease_default(WorkOrderType::Quality, "supervisor-1")
        .unwrap()
        .expect("supervision order missing");
    assert_eq!(supervision.subject_id.as_deref(), Some(case.case_id.as_str()));
    assert!(queue
        .lease_default(WorkOrderType::Quality, "supervisor-2")
        .unwrap()
        .is_none());
}

#[test]
fn test_escalated_case_can_be_closed_with_resolution() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-007", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Critical, None)
        .unwrap();
    stack.clock.advance(Duration::hours(25));
    workflow.check_escalations().unwrap();

    let closed = workflow
        .advance(
            &case.case_id,
            DefectState::Closed,
            "SUPERVISOR-01",
            Some("升级处置: 批次隔离并返工"),
        )
        .unwrap();
    assert_eq!(closed.state, DefectState::Closed);
    assert!(closed.closure_invariant_holds());
}

#[test]
fn test_closed_case_is_terminal() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-008", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Critical, None)
        .unwrap();
    stack.clock.advance(Duration::hours(25));
    workflow.check_escalations().unwrap();
    workflow
        .advance(&case.case_id, DefectState::Closed, "QE-01", Some("返工"))
        .unwrap();

    assert!(workflow
        .advance(&case.case_id, DefectState::Investigating, "QE-01", None)
        .is_err());

    // 已闭环工单不再参与升级
    stack.clock.advance(Duration::hours(100));
    assert!(workflow.check_escalations().unwrap().is_empty());
}

#[test]
fn test_failed_closure_writeback_rolls_back_transition() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-009", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Major, None)
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::Investigating, "QE-01", None)
        .unwrap();
    workflow
        .advance(
            &case.case_id,
            DefectState::CorrectiveActionAssigned,
            "QE-01",
            None,
        )
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::PendingVerification, "QE-01", None)
        .unwrap();
    let audits_before = stack
        .activity_repo
        .list_recent_by_agent(WORKFLOW_AGENT, 50)
        .unwrap()
        .len();

    // 质检回写指向不存在的记录: 整个迁移事务回滚
    let audit = AgentActivityRecord::success(WORKFLOW_AGENT, None, None, None, 0, base_time());
    let result = stack.case_repo.transition_with_audit(
        &case.case_id,
        DefectState::PendingVerification,
        DefectState::Closed,
        base_time(),
        Some("复检合格"),
        Some(base_time()),
        None,
        Some(("missing-inspection", "复检合格")),
        &audit,
    );
    assert!(matches!(result, Err(RepositoryError::NotFound { .. })));

    // 状态未半提交: 结论为空、无多余审计,重试同一迁移不报冲突
    let current = stack.case_repo.find(&case.case_id).unwrap().unwrap();
    assert_eq!(current.state, DefectState::PendingVerification);
    assert!(current.resolution.is_none());
    assert_eq!(
        stack
            .activity_repo
            .list_recent_by_agent(WORKFLOW_AGENT, 50)
            .unwrap()
            .len(),
        audits_before
    );

    let closed = workflow
        .advance(&case.case_id, DefectState::Closed, "QE-01", Some("复检合格"))
        .unwrap();
    assert_eq!(closed.state, DefectState::Closed);
}

#[test]
fn test_stale_expected_state_appends_no_audit() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let workflow = stack.defect_workflow();

    let inspection = create_failed_inspection("BATCH-010", base_time());
    workflow.record_inspection(&inspection).unwrap();
    let case = workflow
        .open_case(&inspection, DefectSeverity::Minor, None)
        .unwrap();
    workflow
        .advance(&case.case_id, DefectState::Investigating, "QE-01", None)
        .unwrap();
    let audits_before = stack
        .activity_repo
        .list_recent_by_agent(WORKFLOW_AGENT, 50)
        .unwrap()
        .len();

    // 并发失败方: 以过期的 expected_state 发起迁移
    let audit = AgentActivityRecord::success(WORKFLOW_AGENT, None, None, None, 0, base_time());
    let updated = stack
        .case_repo
        .transition_with_audit(
            &case.case_id,
            DefectState::Opened,
            DefectState::Investigating,
            base_time(),
            None,
            None,
            None,
            None,
            &audit,
        )
        .unwrap();
    assert!(!updated);

    // 零行更新整体回滚,不留孤儿审计
    assert_eq!(
        stack
            .activity_repo
            .list_recent_by_agent(WORKFLOW_AGENT, 50)
            .unwrap()
            .len(),
        audits_before
    );
    let current = stack.case_repo.find(&case.case_id).unwrap().unwrap();
    assert_eq!(current.state, DefectState::Investigating);
}
