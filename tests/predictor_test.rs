// ==========================================
// 维护预测适配器集成测试
// ==========================================
// 职责: 验证阈值策略、建单去重、告警审计与评分输入窗口
// ==========================================


use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shopfloor_core::domain::telemetry::Reading;
use shopfloor_core::domain::types::{WorkOrderPriority, WorkOrderType};
use shopfloor_core::engine::{MaintenancePredictor, Prediction, PredictorError, ScoringModel};
use test_helpers::{base_time, create_test_reading, CoreStack};

/// 固定输出评分模型,并记录每次收到的读数条数
struct FixedModel {
    probability: f64,
    seen_readings: AtomicUsize,
}

impl FixedModel {
    fn new(probability: f64) -> Arc<Self> {
        Arc::new(Self {
            probability,
            seen_readings: AtomicUsize::new(0),
        })
    }
}

impl ScoringModel for FixedModel {
    fn score(&self, _equipment_id: &str, readings: &[Reading]) -> Result<Prediction, String> {
        self.seen_readings.store(readings.len(), Ordering::SeqCst);
        Ok(Prediction {
            failure_probability: self.probability,
            predicted_window_days: 14,
        })
    }
}

struct FailingModel;

impl ScoringModel for FailingModel {
    fn score(&self, _equipment_id: &str, _readings: &[Reading]) -> Result<Prediction, String> {
        Err("特征缺失".to_string())
    }
}

fn make_predictor(stack: &CoreStack, model: Arc<dyn ScoringModel>) -> MaintenancePredictor {
    MaintenancePredictor::new(
        model,
        Arc::clone(&stack.telemetry_repo),
        Arc::clone(&stack.score_repo),
        Arc::clone(&stack.work_order_repo),
        Arc::clone(&stack.config),
        stack.clock.clone(),
        stack.events.clone(),
    )
}

#[test]
fn test_high_probability_creates_urgent_order() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let predictor = make_predictor(&stack, FixedModel::new(0.85));

    let score = predictor.evaluate("EQ-01").unwrap();
    assert_eq!(score.failure_probability, 0.85);

    // 最新评分落库
    let latest = stack.score_repo.find_latest("EQ-01").unwrap().unwrap();
    assert_eq!(latest.failure_probability, 0.85);

    // URGENT 维护工单 + 事件 + 审计痕
    let queue = stack.work_queue();
    let order = queue
        .lease_default(WorkOrderType::Maintenance, "agent-m")
        .unwrap()
        .expect("maintenance order missing");
    assert_eq!(order.priority, WorkOrderPriority::Urgent);
    assert_eq!(order.subject_id.as_deref(), Some("EQ-01"));
    assert_eq!(order.payload["equipment_id"], "EQ-01");
    assert_eq!(stack.events.count_of("MaintenanceWorkOrderCreated"), 1);
    assert_eq!(stack.score_repo.alert_audit_count("EQ-01").unwrap(), 1);
}

#[test]
fn test_reevaluation_does_not_duplicate_open_order() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let predictor = make_predictor(&stack, FixedModel::new(0.9));

    predictor.evaluate("EQ-01").unwrap();
    stack.clock.advance(Duration::hours(1));
    predictor.evaluate("EQ-01").unwrap();

    // 同设备未完结工单存在时不重复建单; 审计痕每次越线都留
    assert_eq!(stack.events.count_of("MaintenanceWorkOrderCreated"), 1);
    assert_eq!(stack.score_repo.alert_audit_count("EQ-01").unwrap(), 2);

    let queue = stack.work_queue();
    assert!(queue
        .lease_default(WorkOrderType::Maintenance, "agent-a")
        .unwrap()
        .is_some());
    assert!(queue
        .lease_default(WorkOrderType::Maintenance, "agent-b")
        .unwrap()
        .is_none());
}

#[test]
fn test_mid_band_probability_creates_normal_order() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let predictor = make_predictor(&stack, FixedModel::new(0.55));

    predictor.evaluate("EQ-02").unwrap();

    let order = stack
        .work_queue()
        .lease_default(WorkOrderType::Maintenance, "agent-m")
        .unwrap()
        .expect("maintenance order missing");
    assert_eq!(order.priority, WorkOrderPriority::Normal);
    // 排入预测窗口对应的维护时点
    assert!(order.payload.get("scheduled_for").is_some());
}

#[test]
fn test_low_probability_creates_nothing() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let predictor = make_predictor(&stack, FixedModel::new(0.2));

    predictor.evaluate("EQ-03").unwrap();

    assert!(stack
        .work_queue()
        .lease_default(WorkOrderType::Maintenance, "agent-m")
        .unwrap()
        .is_none());
    assert_eq!(stack.score_repo.alert_audit_count("EQ-03").unwrap(), 0);
    // 评分本身仍保留
    assert!(stack.score_repo.find_latest("EQ-03").unwrap().is_some());
}

#[test]
fn test_model_only_sees_window_readings() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let model = FixedModel::new(0.1);
    let predictor = make_predictor(&stack, model.clone());

    // 窗口默认 7 天: 2 条在窗内, 1 条在窗外
    let now = base_time();
    let inserted = stack
        .telemetry_repo
        .batch_insert(&[
            create_test_reading("EQ-04", "vibration", 2.1, now - Duration::days(1)),
            create_test_reading("EQ-04", "vibration", 2.4, now - Duration::days(6)),
            create_test_reading("EQ-04", "vibration", 1.9, now - Duration::days(10)),
        ])
        .unwrap();
    assert_eq!(inserted, 3);

    predictor.evaluate("EQ-04").unwrap();
    assert_eq!(model.seen_readings.load(Ordering::SeqCst), 2);
}

#[test]
fn test_model_failure_surfaces_as_error() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let predictor = make_predictor(&stack, Arc::new(FailingModel));

    assert!(matches!(
        predictor.evaluate("EQ-05"),
        Err(PredictorError::Model(_))
    ));
    // 失败不落评分、不建单
    assert!(stack.score_repo.find_latest("EQ-05").unwrap().is_none());
}

#[test]
fn test_thresholds_are_configurable() {
    let stack = CoreStack::create().expect("Failed to create stack");
    stack
        .config
        .set_value("global", "predictor.threshold_high", "0.95")
        .unwrap();
    let predictor = make_predictor(&stack, FixedModel::new(0.85));

    predictor.evaluate("EQ-06").unwrap();

    // 0.85 低于调高后的 high 阈值 → NORMAL 而非 URGENT
    let order = stack
        .work_queue()
        .lease_default(WorkOrderType::Maintenance, "agent-m")
        .unwrap()
        .expect("maintenance order missing");
    assert_eq!(order.priority, WorkOrderPriority::Normal);
}
