// ==========================================
// 遥测接入引擎集成测试
// ==========================================
// 职责: 验证读数校验、乱序容忍策略、重复拒绝与有界缓冲背压
// ==========================================


use chrono::Duration;
use std::sync::Arc;

use shopfloor_core::domain::types::ShiftType;
use shopfloor_core::engine::{IngestError, TelemetryIngestor};
use test_helpers::{base_time, create_test_reading, CoreStack};

fn make_ingestor(stack: &CoreStack) -> Arc<TelemetryIngestor> {
    Arc::new(TelemetryIngestor::new(
        Arc::clone(&stack.telemetry_repo),
        Arc::clone(&stack.config),
        stack.clock.clone(),
    ))
}

#[test]
fn test_valid_reading_is_stored() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    let reading = create_test_reading("EQ-01", "temperature", 850.5, base_time());
    ingestor.ingest_now(&reading).unwrap();

    let stored = stack
        .telemetry_repo
        .query_equipment_range(
            "EQ-01",
            base_time() - Duration::minutes(1),
            base_time() + Duration::minutes(1),
        )
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, 850.5);
}

#[test]
fn test_malformed_readings_are_rejected() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    let empty_equipment = create_test_reading("", "temperature", 1.0, base_time());
    assert!(matches!(
        ingestor.ingest_now(&empty_equipment),
        Err(IngestError::Validation(_))
    ));

    let nan_value = create_test_reading("EQ-01", "temperature", f64::NAN, base_time());
    assert!(matches!(
        ingestor.ingest_now(&nan_value),
        Err(IngestError::Validation(_))
    ));
}

#[test]
fn test_duplicate_reading_is_rejected() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    let reading = create_test_reading("EQ-01", "temperature", 850.5, base_time());
    ingestor.ingest_now(&reading).unwrap();

    let dup = create_test_reading("EQ-01", "temperature", 851.0, base_time());
    assert!(matches!(
        ingestor.ingest_now(&dup),
        Err(IngestError::Duplicate { .. })
    ));
}

#[test]
fn test_out_of_order_within_tolerance_is_accepted() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    ingestor
        .ingest_now(&create_test_reading("EQ-01", "temperature", 850.0, base_time()))
        .unwrap();

    // 落后 30 分钟,在默认 60 分钟容忍窗口内
    ingestor
        .ingest_now(&create_test_reading(
            "EQ-01",
            "temperature",
            848.0,
            base_time() - Duration::minutes(30),
        ))
        .unwrap();
    assert_eq!(ingestor.rejected_count(), 0);
}

#[test]
fn test_out_of_order_beyond_tolerance_is_dropped_and_counted() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    ingestor
        .ingest_now(&create_test_reading("EQ-01", "temperature", 850.0, base_time()))
        .unwrap();

    let stale = create_test_reading(
        "EQ-01",
        "temperature",
        840.0,
        base_time() - Duration::minutes(90),
    );
    assert!(matches!(
        ingestor.ingest_now(&stale),
        Err(IngestError::OutOfOrder { .. })
    ));
    assert_eq!(ingestor.rejected_count(), 1);

    // DROP 策略 (默认): 不落 rejected_reading 表
    assert_eq!(stack.telemetry_repo.rejected_count().unwrap(), 0);
}

#[test]
fn test_review_policy_persists_rejected_reading() {
    let stack = CoreStack::create().expect("Failed to create stack");
    stack
        .config
        .set_value("global", "ingest.rejected_reading_policy", "REVIEW")
        .unwrap();
    let ingestor = make_ingestor(&stack);

    ingestor
        .ingest_now(&create_test_reading("EQ-01", "temperature", 850.0, base_time()))
        .unwrap();
    let stale = create_test_reading(
        "EQ-01",
        "temperature",
        840.0,
        base_time() - Duration::minutes(90),
    );
    assert!(ingestor.ingest_now(&stale).is_err());

    assert_eq!(stack.telemetry_repo.rejected_count().unwrap(), 1);
}

#[test]
fn test_tolerance_is_per_sensor_key() {
    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);

    ingestor
        .ingest_now(&create_test_reading("EQ-01", "temperature", 850.0, base_time()))
        .unwrap();

    // 其他传感器/设备不受 EQ-01 温度水位影响
    ingestor
        .ingest_now(&create_test_reading(
            "EQ-01",
            "vibration",
            2.2,
            base_time() - Duration::hours(5),
        ))
        .unwrap();
    ingestor
        .ingest_now(&create_test_reading(
            "EQ-02",
            "temperature",
            760.0,
            base_time() - Duration::hours(5),
        ))
        .unwrap();
}

#[tokio::test]
async fn test_buffered_ingestion_applies_backpressure() {
    let stack = CoreStack::create().expect("Failed to create stack");
    stack
        .config
        .set_value("global", "ingest.queue_capacity", "2")
        .unwrap();
    let ingestor = make_ingestor(&stack);

    let (handle, drain) = ingestor.spawn_buffered().unwrap();

    // 容量 2 的缓冲: 快速灌入直到出现 Overloaded
    let mut overloaded = false;
    for i in 0..200 {
        let reading = create_test_reading(
            "EQ-01",
            "temperature",
            800.0 + i as f64,
            base_time() + Duration::seconds(i),
        );
        if matches!(handle.submit(reading), Err(IngestError::Overloaded)) {
            overloaded = true;
            break;
        }
    }
    assert!(overloaded, "满载缓冲必须返回 Overloaded");

    // 句柄释放后泄洪任务自然退出
    drop(handle);
    drain.await.unwrap();
}

#[test]
fn test_downtime_reading_flows_to_oee_shift() {
    use shopfloor_core::domain::production::ShiftWindow;
    use shopfloor_core::engine::DOWNTIME_SENSOR;
    use test_helpers::{create_test_production_entry, test_date};

    let stack = CoreStack::create().expect("Failed to create stack");
    let ingestor = make_ingestor(&stack);
    let window = ShiftWindow::from_calendar("M1", test_date(), ShiftType::Day, 8, 20, 480);

    // 接入的 downtime 读数进入后续班次聚合
    ingestor
        .ingest_now(&create_test_reading(
            "M1",
            DOWNTIME_SENSOR,
            45.0,
            window.start + Duration::hours(3),
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
            0.0,
        ))
        .unwrap();

    let readings = stack
        .telemetry_repo
        .query_range("M1", DOWNTIME_SENSOR, window.start, window.end)
        .unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, 45.0);
}
