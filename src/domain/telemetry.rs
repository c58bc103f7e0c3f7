// ==========================================
// 生产智能核心 - 遥测读数实体
// ==========================================
// 红线: 读数一经写入不可变,核心层永不删除 (归档是外部关注点)
// 唯一键: (equipment_id, sensor_type, timestamp)
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 归一化传感器读数
///
/// 由外部接入适配器产出 (OPC-UA/PLC 轮询等协议解析不在核心范围)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// 设备编码
    pub equipment_id: String,
    /// 传感器类型 (如 temperature, vibration, downtime_minutes)
    pub sensor_type: String,
    /// 读数值
    pub value: f64,
    /// 单位 (可选,如 °C / mm/s / min)
    pub unit: Option<String>,
    /// 采样时间
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        equipment_id: impl Into<String>,
        sensor_type: impl Into<String>,
        value: f64,
        unit: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            sensor_type: sensor_type.into(),
            value,
            unit,
            timestamp,
        }
    }
}

/// 被拒绝的乱序读数 (policy=REVIEW 时落库供人工复核)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedReading {
    pub equipment_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// 拒绝原因 (如超出乱序容忍窗口)
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}
