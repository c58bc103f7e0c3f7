// ==========================================
// 生产智能核心 - 工单实体
// ==========================================
// 所有权链: 创建组件 → Work Queue (未租约) → 持有有效租约的代理
// 租约到期或显式释放后回到队列; 超过重试上限进入 DEAD_LETTER
// ==========================================

use crate::domain::types::{WorkOrderPriority, WorkOrderState, WorkOrderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 工单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub order_id: String,
    pub order_type: WorkOrderType,
    pub priority: WorkOrderPriority,
    /// 去重主体 (设备编码或缺陷工单号): 同主体同类型存在未完结工单时不重复建单
    pub subject_id: Option<String>,
    /// 任务载荷 (自由结构 JSON,由处理器解释)
    pub payload: serde_json::Value,
    pub state: WorkOrderState,
    /// 当前租约持有者 (代理标识); 任意时刻至多一个有效持有者
    pub lease_owner: Option<String>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    /// 取消请求标记 (已租约工单的取消是建议性的,处理器在检查点自查)
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn new(
        order_type: WorkOrderType,
        priority: WorkOrderPriority,
        subject_id: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            order_type,
            priority,
            subject_id,
            payload,
            state: WorkOrderState::Pending,
            lease_owner: None,
            lease_expiry: None,
            attempt_count: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// 指定时刻是否持有有效 (未过期) 租约
    pub fn has_valid_lease(&self, now: DateTime<Utc>) -> bool {
        self.state == WorkOrderState::Leased
            && self.lease_owner.is_some()
            && self.lease_expiry.map(|e| e > now).unwrap_or(false)
    }
}
