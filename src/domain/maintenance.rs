// ==========================================
// 生产智能核心 - 维护预测评分实体
// ==========================================
// 瞬态数据: 每轮预测重算,核心仅保留每台设备最新评分;
// 越过告警阈值的评分另行落入审计表 (已升为工单的证据链)
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 维护预测评分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceScore {
    pub equipment_id: String,
    /// 失效概率 [0, 1]
    pub failure_probability: f64,
    /// 预测失效窗口 (天)
    pub predicted_window_days: i64,
    pub computed_at: DateTime<Utc>,
}

impl MaintenanceScore {
    pub fn new(
        equipment_id: impl Into<String>,
        failure_probability: f64,
        predicted_window_days: i64,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            failure_probability,
            predicted_window_days,
            computed_at,
        }
    }
}
