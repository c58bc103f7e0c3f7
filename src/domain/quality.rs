// ==========================================
// 生产智能核心 - 质检与缺陷实体
// ==========================================
// Inspection: 创建后不可变,仅 corrective_action 字段可在整改阶段追加
// DefectCase: 缺陷工作流状态机实例,归 Defect Workflow 独占所有
// ==========================================

use crate::domain::types::{DefectSeverity, DefectState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Inspection - 质检记录
// ==========================================

/// 质检记录 (由外部质检员动作创建)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub inspection_id: String,
    pub batch_number: String,
    pub inspection_type: String,
    pub inspector_id: String,
    pub passed: bool,
    /// 缺陷代码列表 (JSON 数组存储)
    pub defect_codes: Vec<String>,
    /// 检测量值 (自由结构 JSON)
    pub measurements: serde_json::Value,
    /// 整改措施 (唯一可追加字段,工作流闭环时写入)
    pub corrective_action: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Inspection {
    pub fn new(
        batch_number: impl Into<String>,
        inspection_type: impl Into<String>,
        inspector_id: impl Into<String>,
        passed: bool,
        defect_codes: Vec<String>,
        measurements: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inspection_id: Uuid::new_v4().to_string(),
            batch_number: batch_number.into(),
            inspection_type: inspection_type.into(),
            inspector_id: inspector_id.into(),
            passed,
            defect_codes,
            measurements,
            corrective_action: None,
            created_at,
        }
    }
}

// ==========================================
// DefectCase - 缺陷工单
// ==========================================

/// 缺陷工作流实例 (每条需整改的失败质检对应一个)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectCase {
    pub case_id: String,
    pub inspection_id: String,
    pub severity: DefectSeverity,
    pub state: DefectState,
    pub opened_at: DateTime<Utc>,
    /// 最近一次状态变更时间 (SLA 升级计时基准)
    pub state_changed_at: DateTime<Utc>,
    pub assignee: Option<String>,
    pub resolution: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    /// 升级标记 (防止定时检查重复升级/重复建单)
    pub escalated: bool,
}

impl DefectCase {
    /// 开立缺陷工单 (初始状态 OPENED)
    pub fn open(
        inspection_id: impl Into<String>,
        severity: DefectSeverity,
        assignee: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id: Uuid::new_v4().to_string(),
            inspection_id: inspection_id.into(),
            severity,
            state: DefectState::Opened,
            opened_at: now,
            state_changed_at: now,
            assignee,
            resolution: None,
            closed_at: None,
            escalated: false,
        }
    }

    /// 不变式: CLOSED 必须携带非空 resolution
    pub fn closure_invariant_holds(&self) -> bool {
        self.state != DefectState::Closed
            || self
                .resolution
                .as_ref()
                .map(|r| !r.trim().is_empty())
                .unwrap_or(false)
    }
}
