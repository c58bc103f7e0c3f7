// ==========================================
// 生产智能核心 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免"部分模块外键开启/部分不开启"
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供幂等建表入口 (CREATE TABLE IF NOT EXISTS)
// ==========================================

use rusqlite::Connection;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 幂等初始化核心 schema
///
/// 所有表使用 CREATE TABLE IF NOT EXISTS，可在任意已有库上安全重复执行。
/// 时间戳统一 RFC3339 TEXT；枚举列统一 SCREAMING_SNAKE_CASE。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- 配置表 (key-value + scope; scope_id='global' 或机台编码)
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- 遥测读数 (append-only, 唯一键防重)
        CREATE TABLE IF NOT EXISTS telemetry_reading (
            equipment_id TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (equipment_id, sensor_type, timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_telemetry_equipment_ts
            ON telemetry_reading (equipment_id, sensor_type, timestamp);

        -- 超容忍乱序读数 (policy=REVIEW 时落库)
        CREATE TABLE IF NOT EXISTS rejected_reading (
            equipment_id TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT,
            timestamp TEXT NOT NULL,
            reason TEXT NOT NULL,
            rejected_at TEXT NOT NULL
        );

        -- 生产日志 (外部事实表,核心只读; 表结构供协作方/测试灌入)
        CREATE TABLE IF NOT EXISTS production_log (
            machine_id TEXT NOT NULL,
            shift_date TEXT NOT NULL,
            shift_type TEXT NOT NULL,
            target_quantity REAL NOT NULL,
            actual_quantity REAL NOT NULL,
            good_quantity REAL NOT NULL,
            downtime_minutes REAL NOT NULL DEFAULT 0,
            downtime_reason TEXT,
            PRIMARY KEY (machine_id, shift_date, shift_type)
        );

        -- OEE 指标 (幂等 upsert, last-write-wins)
        CREATE TABLE IF NOT EXISTS oee_metric (
            machine_id TEXT NOT NULL,
            shift_date TEXT NOT NULL,
            shift_type TEXT NOT NULL,
            availability REAL NOT NULL,
            performance REAL NOT NULL,
            quality REAL NOT NULL,
            oee REAL NOT NULL,
            status TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (machine_id, shift_date, shift_type)
        );

        -- 质检记录 (corrective_action 为唯一可追加字段)
        CREATE TABLE IF NOT EXISTS inspection (
            inspection_id TEXT PRIMARY KEY,
            batch_number TEXT NOT NULL,
            inspection_type TEXT NOT NULL,
            inspector_id TEXT NOT NULL,
            passed INTEGER NOT NULL,
            defect_codes_json TEXT NOT NULL DEFAULT '[]',
            measurements_json TEXT NOT NULL DEFAULT '{}',
            corrective_action TEXT,
            created_at TEXT NOT NULL
        );

        -- 缺陷工单 (状态机实例)
        CREATE TABLE IF NOT EXISTS defect_case (
            case_id TEXT PRIMARY KEY,
            inspection_id TEXT NOT NULL REFERENCES inspection(inspection_id),
            severity TEXT NOT NULL,
            state TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            state_changed_at TEXT NOT NULL,
            assignee TEXT,
            resolution TEXT,
            closed_at TEXT,
            escalated INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_defect_case_state ON defect_case (state);

        -- 维护评分 (每设备仅保留最新)
        CREATE TABLE IF NOT EXISTS maintenance_score (
            equipment_id TEXT PRIMARY KEY,
            failure_probability REAL NOT NULL,
            predicted_window_days INTEGER NOT NULL,
            computed_at TEXT NOT NULL
        );

        -- 越过告警阈值评分的审计链 (append-only)
        CREATE TABLE IF NOT EXISTS maintenance_alert_audit (
            audit_id TEXT PRIMARY KEY,
            equipment_id TEXT NOT NULL,
            failure_probability REAL NOT NULL,
            predicted_window_days INTEGER NOT NULL,
            computed_at TEXT NOT NULL
        );

        -- 工单队列 (租约式 at-least-once 投递)
        CREATE TABLE IF NOT EXISTS work_order (
            order_id TEXT PRIMARY KEY,
            order_type TEXT NOT NULL,
            priority INTEGER NOT NULL,
            subject_id TEXT,
            payload_json TEXT NOT NULL DEFAULT '{}',
            state TEXT NOT NULL DEFAULT 'PENDING',
            lease_owner TEXT,
            lease_expiry TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_work_order_lease
            ON work_order (order_type, state, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_work_order_subject
            ON work_order (order_type, subject_id, state);

        -- 代理活动记录 (append-only)
        CREATE TABLE IF NOT EXISTS activity_log (
            record_id TEXT PRIMARY KEY,
            agent_type TEXT NOT NULL,
            work_order_id TEXT,
            input_json TEXT,
            output_json TEXT,
            status TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_log_order
            ON activity_log (work_order_id, created_at);
        "#,
    )?;
    Ok(())
}
