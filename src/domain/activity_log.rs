// ==========================================
// 生产智能核心 - 代理活动记录
// ==========================================
// 红线: 只追加 (append-only),一次写入后永不修改
// 用途: 可观测性 + 回放调试; 每次任务尝试 (成功或失败) 都落一条
// ==========================================

use crate::domain::types::ActivityStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 代理活动记录
///
/// 编排器在每次任务尝试后写入; 缺陷工作流的状态迁移审计
/// 也复用此结构 (work_order_id 为空)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivityRecord {
    pub record_id: String,
    /// 代理类型标识 (quality / maintenance / procurement / defect_workflow)
    pub agent_type: String,
    pub work_order_id: Option<String>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub status: ActivityStatus,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentActivityRecord {
    /// 成功记录
    pub fn success(
        agent_type: impl Into<String>,
        work_order_id: Option<String>,
        input: Option<serde_json::Value>,
        output: Option<serde_json::Value>,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            work_order_id,
            input,
            output,
            status: ActivityStatus::Success,
            duration_ms,
            error: None,
            created_at: now,
        }
    }

    /// 失败记录 (必须携带错误信息)
    pub fn failed(
        agent_type: impl Into<String>,
        work_order_id: Option<String>,
        input: Option<serde_json::Value>,
        error: impl Into<String>,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            work_order_id,
            input,
            output: None,
            status: ActivityStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            created_at: now,
        }
    }
}
