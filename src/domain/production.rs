// ==========================================
// 生产智能核心 - 班次窗口 / 生产日志 / OEE 指标
// ==========================================
// OEE = availability × performance × quality
// 唯一键: (machine_id, shift_date, shift_type), 幂等重算 last-write-wins
// ==========================================

use crate::domain::types::{MetricStatus, ShiftType};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ShiftWindow - 班次窗口
// ==========================================

/// 班次窗口 (派生值对象,不独立存储)
///
/// 由外部班次日历计算得到; 核心按 (机台, 日期, 班次) 聚合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub machine_id: String,
    pub shift_date: NaiveDate,
    pub shift_type: ShiftType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    pub fn new(
        machine_id: impl Into<String>,
        shift_date: NaiveDate,
        shift_type: ShiftType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            shift_date,
            shift_type,
            start,
            end,
        }
    }

    /// 按班次日历派生窗口
    ///
    /// # 参数
    /// - day_start_hour / night_start_hour: 班次起始小时 (0-23)
    /// - shift_length_min: 班次时长 (分钟); 夜班允许跨日
    pub fn from_calendar(
        machine_id: impl Into<String>,
        shift_date: NaiveDate,
        shift_type: ShiftType,
        day_start_hour: u32,
        night_start_hour: u32,
        shift_length_min: i64,
    ) -> Self {
        let start_hour = match shift_type {
            ShiftType::Day => day_start_hour,
            ShiftType::Night => night_start_hour,
        };
        let start_time =
            NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
        let start = Utc.from_utc_datetime(&shift_date.and_time(start_time));
        let end = start + Duration::minutes(shift_length_min);
        Self::new(machine_id, shift_date, shift_type, start, end)
    }

    /// 计划时间 (分钟)
    pub fn planned_minutes(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 60.0
    }

    /// 时间点是否落在窗口内 [start, end)
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

// ==========================================
// ProductionLogEntry - 生产日志 (外部事实表)
// ==========================================

/// 生产日志条目
///
/// 外部协作方提供的事实表,核心只读不写。
/// performance/quality 数量以此为权威来源。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionLogEntry {
    pub machine_id: String,
    pub shift_date: NaiveDate,
    pub shift_type: ShiftType,
    pub target_quantity: f64,
    pub actual_quantity: f64,
    pub good_quantity: f64,
    /// 停机分钟数 (遥测无 downtime 读数时的回退来源)
    pub downtime_minutes: f64,
    pub downtime_reason: Option<String>,
}

// ==========================================
// OeeMetric - OEE 指标
// ==========================================

/// OEE 指标 (每机台每班次唯一,幂等重算)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeMetric {
    pub machine_id: String,
    pub shift_date: NaiveDate,
    pub shift_type: ShiftType,
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
    pub status: MetricStatus,
    pub computed_at: DateTime<Utc>,
}

impl OeeMetric {
    /// 数据不足标记 (除零守卫,不抛错)
    pub fn insufficient_data(window: &ShiftWindow, computed_at: DateTime<Utc>) -> Self {
        Self {
            machine_id: window.machine_id.clone(),
            shift_date: window.shift_date,
            shift_type: window.shift_type,
            availability: 0.0,
            performance: 0.0,
            quality: 0.0,
            oee: 0.0,
            status: MetricStatus::InsufficientData,
            computed_at,
        }
    }

    /// 不变式: oee = availability × performance × quality (浮点容差 ε)
    pub fn is_consistent(&self, epsilon: f64) -> bool {
        (self.oee - self.availability * self.performance * self.quality).abs() <= epsilon
    }
}
