// ==========================================
// 生产智能核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// scope_id = 'global' 或机台/设备编码 (机台级覆写优先)
// ==========================================

use crate::domain::types::RejectedReadingPolicy;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// 默认值全集
// ==========================================

/// 乱序容忍窗口 (分钟)
pub const DEFAULT_OUT_OF_ORDER_TOLERANCE_MIN: i64 = 60;
/// 接入缓冲队列容量 (满载即背压)
pub const DEFAULT_INGESTION_QUEUE_CAPACITY: usize = 1024;
/// 超容忍乱序读数处理策略
pub const DEFAULT_REJECTED_READING_POLICY: RejectedReadingPolicy = RejectedReadingPolicy::Drop;
/// 维护预测高阈值 (p > high ⇒ URGENT 工单)
pub const DEFAULT_THRESHOLD_HIGH: f64 = 0.7;
/// 维护预测低阈值 (low < p ≤ high ⇒ NORMAL 工单)
pub const DEFAULT_THRESHOLD_LOW: f64 = 0.4;
/// 预测评分输入窗口 (天)
pub const DEFAULT_SCORE_WINDOW_DAYS: i64 = 7;
/// 租约时长 (秒)
pub const DEFAULT_LEASE_DURATION_SECS: i64 = 300;
/// 重试上限 (超过即死信)
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// CRITICAL 缺陷 SLA (小时)
pub const DEFAULT_SLA_CRITICAL_HOURS: i64 = 24;
/// 其余严重度 SLA (小时)
pub const DEFAULT_SLA_DEFAULT_HOURS: i64 = 72;
/// 退避基数 (秒)
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 1;
/// 退避上限 (秒, 5 分钟)
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 300;
/// 空队列轮询间隔 (毫秒, 有界等待)
pub const DEFAULT_LEASE_POLL_INTERVAL_MS: u64 = 500;
/// 每类型代理池大小
pub const DEFAULT_POOL_SIZE: usize = 2;
/// 理想节拍 (分钟/件)
pub const DEFAULT_IDEAL_CYCLE_TIME_MIN: f64 = 1.0;
/// 白班起始小时
pub const DEFAULT_DAY_SHIFT_START_HOUR: u32 = 8;
/// 夜班起始小时
pub const DEFAULT_NIGHT_SHIFT_START_HOUR: u32 = 20;
/// 班次时长 (分钟)
pub const DEFAULT_SHIFT_LENGTH_MIN: i64 = 480;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================

pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 读取指定 scope 的配置值
    fn get_scoped_value(&self, scope_id: &str, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("锁获取失败: {e}"))?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![scope_id, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 读取 global scope 的配置值
    pub fn get_global_value(&self, key: &str) -> Result<Option<String>> {
        self.get_scoped_value("global", key)
    }

    /// 写入配置值 (upsert)
    pub fn set_value(&self, scope_id: &str, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("锁获取失败: {e}"))?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT (scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![scope_id, key, value],
        )?;
        Ok(())
    }

    fn get_parsed_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get_global_value(key)? {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|_| anyhow!("配置值解析失败: key={key}, value={raw}")),
            None => Ok(default),
        }
    }

    // ==========================================
    // 遥测接入
    // ==========================================

    pub fn out_of_order_tolerance_min(&self) -> Result<i64> {
        self.get_parsed_or("ingest.out_of_order_tolerance_min", DEFAULT_OUT_OF_ORDER_TOLERANCE_MIN)
    }

    pub fn ingestion_queue_capacity(&self) -> Result<usize> {
        self.get_parsed_or("ingest.queue_capacity", DEFAULT_INGESTION_QUEUE_CAPACITY)
    }

    pub fn rejected_reading_policy(&self) -> Result<RejectedReadingPolicy> {
        match self.get_global_value("ingest.rejected_reading_policy")? {
            Some(raw) => RejectedReadingPolicy::from_str(&raw)
                .ok_or_else(|| anyhow!("无法识别的拒绝策略: {raw}")),
            None => Ok(DEFAULT_REJECTED_READING_POLICY),
        }
    }

    // ==========================================
    // 维护预测
    // ==========================================

    pub fn threshold_high(&self) -> Result<f64> {
        self.get_parsed_or("predictor.threshold_high", DEFAULT_THRESHOLD_HIGH)
    }

    pub fn threshold_low(&self) -> Result<f64> {
        self.get_parsed_or("predictor.threshold_low", DEFAULT_THRESHOLD_LOW)
    }

    pub fn score_window_days(&self) -> Result<i64> {
        self.get_parsed_or("predictor.score_window_days", DEFAULT_SCORE_WINDOW_DAYS)
    }

    // ==========================================
    // 工单队列 / 编排器
    // ==========================================

    pub fn lease_duration_secs(&self) -> Result<i64> {
        self.get_parsed_or("queue.lease_duration_secs", DEFAULT_LEASE_DURATION_SECS)
    }

    pub fn max_attempts(&self) -> Result<i32> {
        self.get_parsed_or("queue.max_attempts", DEFAULT_MAX_ATTEMPTS)
    }

    pub fn backoff_base_secs(&self) -> Result<u64> {
        self.get_parsed_or("orchestrator.backoff_base_secs", DEFAULT_BACKOFF_BASE_SECS)
    }

    pub fn backoff_cap_secs(&self) -> Result<u64> {
        self.get_parsed_or("orchestrator.backoff_cap_secs", DEFAULT_BACKOFF_CAP_SECS)
    }

    pub fn lease_poll_interval_ms(&self) -> Result<u64> {
        self.get_parsed_or("orchestrator.lease_poll_interval_ms", DEFAULT_LEASE_POLL_INTERVAL_MS)
    }

    /// 代理池大小 (按类型覆写: orchestrator.pool_size.quality 等)
    pub fn pool_size(&self, agent_type: &str) -> Result<usize> {
        let key = format!("orchestrator.pool_size.{agent_type}");
        match self.get_global_value(&key)? {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| anyhow!("配置值解析失败: key={key}, value={raw}")),
            None => self.get_parsed_or("orchestrator.pool_size", DEFAULT_POOL_SIZE),
        }
    }

    // ==========================================
    // 缺陷工作流 SLA
    // ==========================================

    pub fn sla_critical_hours(&self) -> Result<i64> {
        self.get_parsed_or("workflow.sla_critical_hours", DEFAULT_SLA_CRITICAL_HOURS)
    }

    pub fn sla_default_hours(&self) -> Result<i64> {
        self.get_parsed_or("workflow.sla_default_hours", DEFAULT_SLA_DEFAULT_HOURS)
    }

    // ==========================================
    // OEE / 班次日历
    // ==========================================

    /// 理想节拍 (分钟/件), 机台级覆写优先于 global
    pub fn ideal_cycle_time_min(&self, machine_id: &str) -> Result<f64> {
        if let Some(raw) = self.get_scoped_value(machine_id, "oee.ideal_cycle_time_min")? {
            return raw
                .parse::<f64>()
                .map_err(|_| anyhow!("配置值解析失败: machine={machine_id}, value={raw}"));
        }
        self.get_parsed_or("oee.ideal_cycle_time_min", DEFAULT_IDEAL_CYCLE_TIME_MIN)
    }

    pub fn day_shift_start_hour(&self) -> Result<u32> {
        self.get_parsed_or("shift.day_start_hour", DEFAULT_DAY_SHIFT_START_HOUR)
    }

    pub fn night_shift_start_hour(&self) -> Result<u32> {
        self.get_parsed_or("shift.night_start_hour", DEFAULT_NIGHT_SHIFT_START_HOUR)
    }

    pub fn shift_length_min(&self) -> Result<i64> {
        self.get_parsed_or("shift.length_min", DEFAULT_SHIFT_LENGTH_MIN)
    }
}
