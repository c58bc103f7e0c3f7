// ==========================================
// OEE 聚合引擎集成测试
// ==========================================
// 职责: 验证三因子计算、数据不足守卫、幂等重算与停机来源优先级
// ==========================================


use chrono::Duration;
use std::sync::Arc;

use shopfloor_core::domain::production::ShiftWindow;
use shopfloor_core::domain::types::{MetricStatus, ShiftType};
use shopfloor_core::engine::{OeeAggregator, DOWNTIME_SENSOR};
use shopfloor_core::repository::ProductionLogSource;
use test_helpers::{
    create_test_production_entry, create_test_reading, test_date, CoreStack,
};

fn make_aggregator(stack: &CoreStack) -> OeeAggregator {
    let source: Arc<dyn ProductionLogSource> = stack.production_log_repo.clone();
    OeeAggregator::new(
        Arc::clone(&stack.telemetry_repo),
        source,
        Arc::clone(&stack.oee_repo),
        Arc::clone(&stack.config),
        stack.clock.clone(),
    )
}

fn day_window(machine_id: &str) -> ShiftWindow {
    ShiftWindow::from_calendar(machine_id, test_date(), ShiftType::Day, 8, 20, 480)
}

const EPS: f64 = 1e-9;

#[test]
fn test_three_factor_computation() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    // 理想节拍 0.5 分钟/件 (机台级覆写)
    stack
        .config
        .set_value("M1", "oee.ideal_cycle_time_min", "0.5")
        .unwrap();

    // 计划 480 分钟, 停机 30 分钟 (遥测), 产量 900 / 良品 870
    stack
        .telemetry_repo
        .insert(&create_test_reading(
            "M1",
            DOWNTIME_SENSOR,
            30.0,
            window.start + Duration::hours(2),
        ))
        .unwrap();
    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            900.0,
            870.0,
            0.0,
        ))
        .unwrap();

    let metric = aggregator.compute_shift(&window).unwrap();

    assert_eq!(metric.status, MetricStatus::Ok);
    assert!((metric.availability - 0.9375).abs() < EPS);
    assert!((metric.performance - 1.0).abs() < EPS);
    assert!((metric.quality - 870.0 / 900.0).abs() < EPS);
    assert!((metric.oee - 0.9375 * (870.0 / 900.0)).abs() < EPS);
    assert!(metric.is_consistent(EPS));

    // 落库可查
    let stored = stack
        .oee_repo
        .find("M1", test_date(), ShiftType::Day)
        .unwrap()
        .expect("metric not stored");
    assert!((stored.oee - metric.oee).abs() < EPS);
}

#[test]
fn test_telemetry_downtime_takes_precedence_over_log() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    // 生产日志声称停机 400 分钟, 遥测只有 60 分钟 → 以遥测为准
    stack
        .telemetry_repo
        .insert(&create_test_reading(
            "M1",
            DOWNTIME_SENSOR,
            60.0,
            window.start + Duration::hours(1),
        ))
        .unwrap();
    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            400.0,
            400.0,
            400.0,
        ))
        .unwrap();

    let metric = aggregator.compute_shift(&window).unwrap();
    assert!((metric.availability - 420.0 / 480.0).abs() < EPS);
}

#[test]
fn test_falls_back_to_log_downtime_when_no_readings() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            400.0,
            380.0,
            120.0,
        ))
        .unwrap();

    let metric = aggregator.compute_shift(&window).unwrap();
    assert!((metric.availability - 360.0 / 480.0).abs() < EPS);
}

#[test]
fn test_missing_production_log_marks_insufficient_data() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);

    let metric = aggregator.compute_shift(&day_window("M9")).unwrap();
    assert_eq!(metric.status, MetricStatus::InsufficientData);
    assert_eq!(metric.oee, 0.0);

    // 数据不足也落库,可查询
    let stored = stack
        .oee_repo
        .find("M9", test_date(), ShiftType::Day)
        .unwrap()
        .expect("insufficient metric not stored");
    assert_eq!(stored.status, MetricStatus::InsufficientData);
}

#[test]
fn test_full_shift_downtime_marks_insufficient_data() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    // 停机吞掉全部计划时间 → 运行时间不为正,标记数据不足而非除零
    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            0.0,
            0.0,
            480.0,
        ))
        .unwrap();

    let metric = aggregator.compute_shift(&window).unwrap();
    assert_eq!(metric.status, MetricStatus::InsufficientData);
}

#[test]
fn test_zero_actual_quantity_gives_zero_quality() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            0.0,
            0.0,
            30.0,
        ))
        .unwrap();

    let metric = aggregator.compute_shift(&window).unwrap();
    assert_eq!(metric.status, MetricStatus::Ok);
    assert_eq!(metric.quality, 0.0);
    assert_eq!(metric.oee, 0.0);
}

#[test]
fn test_recompute_is_idempotent_last_write_wins() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let aggregator = make_aggregator(&stack);
    let window = day_window("M1");

    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            500.0,
            450.0,
            0.0,
        ))
        .unwrap();
    let first = aggregator.compute_shift(&window).unwrap();

    // 修正后的生产日志到达,重算覆盖同键指标
    stack
        .production_log_repo
        .insert_for_collaborator(&create_test_production_entry(
            "M1",
            test_date(),
            ShiftType::Day,
            500.0,
            500.0,
            0.0,
        ))
        .unwrap();
    stack.clock.advance(Duration::minutes(5));
    let second = aggregator.compute_shift(&window).unwrap();

    assert!(first.quality < second.quality);
    let rows = stack.oee_repo.list_by_machine("M1").unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].quality - 1.0).abs() < EPS);
}
