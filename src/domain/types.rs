// ==========================================
// 生产智能核心 - 领域类型定义
// ==========================================
// 红线: 等级制/状态制枚举,不是自由字符串
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工单类型 (Work Order Type)
// ==========================================
// 固定的三类自治代理能力集,新增类型需同时注册处理器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderType {
    Quality,     // 质量代理
    Maintenance, // 维护代理
    Procurement, // 采购代理
}

impl WorkOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderType::Quality => "QUALITY",
            WorkOrderType::Maintenance => "MAINTENANCE",
            WorkOrderType::Procurement => "PROCUREMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUALITY" => Some(WorkOrderType::Quality),
            "MAINTENANCE" => Some(WorkOrderType::Maintenance),
            "PROCUREMENT" => Some(WorkOrderType::Procurement),
            _ => None,
        }
    }
}

impl fmt::Display for WorkOrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工单优先级 (Work Order Priority)
// ==========================================
// 同一优先级内按创建时间 FIFO; URGENT 永远抢占 NORMAL/LOW
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderPriority {
    Low,
    Normal,
    Urgent,
}

impl WorkOrderPriority {
    /// 数据库排序用的数值等级 (越大越优先)
    pub fn rank(&self) -> i32 {
        match self {
            WorkOrderPriority::Low => 0,
            WorkOrderPriority::Normal => 1,
            WorkOrderPriority::Urgent => 2,
        }
    }

    pub fn from_rank(rank: i32) -> Option<Self> {
        match rank {
            0 => Some(WorkOrderPriority::Low),
            1 => Some(WorkOrderPriority::Normal),
            2 => Some(WorkOrderPriority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderPriority::Low => "LOW",
            WorkOrderPriority::Normal => "NORMAL",
            WorkOrderPriority::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for WorkOrderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工单状态 (Work Order State)
// ==========================================
// PENDING: 可租约
// LEASED: 被某个代理独占持有 (lease_owner + lease_expiry)
// COMPLETED/CANCELLED/DEAD_LETTER: 终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderState {
    Pending,
    Leased,
    Completed,
    Cancelled,
    DeadLetter,
}

impl WorkOrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderState::Pending => "PENDING",
            WorkOrderState::Leased => "LEASED",
            WorkOrderState::Completed => "COMPLETED",
            WorkOrderState::Cancelled => "CANCELLED",
            WorkOrderState::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(WorkOrderState::Pending),
            "LEASED" => Some(WorkOrderState::Leased),
            "COMPLETED" => Some(WorkOrderState::Completed),
            "CANCELLED" => Some(WorkOrderState::Cancelled),
            "DEAD_LETTER" => Some(WorkOrderState::DeadLetter),
            _ => None,
        }
    }

    /// 是否为终态 (不再参与租约)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkOrderState::Completed | WorkOrderState::Cancelled | WorkOrderState::DeadLetter
        )
    }
}

impl fmt::Display for WorkOrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 缺陷状态 (Defect Case State)
// ==========================================
// 主路径: OPENED → INVESTIGATING → CORRECTIVE_ACTION_ASSIGNED
//        → PENDING_VERIFICATION → CLOSED
// 旁路:   OPENED|INVESTIGATING → ESCALATED → CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectState {
    Opened,
    Investigating,
    CorrectiveActionAssigned,
    PendingVerification,
    Escalated,
    Closed,
}

impl DefectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectState::Opened => "OPENED",
            DefectState::Investigating => "INVESTIGATING",
            DefectState::CorrectiveActionAssigned => "CORRECTIVE_ACTION_ASSIGNED",
            DefectState::PendingVerification => "PENDING_VERIFICATION",
            DefectState::Escalated => "ESCALATED",
            DefectState::Closed => "CLOSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPENED" => Some(DefectState::Opened),
            "INVESTIGATING" => Some(DefectState::Investigating),
            "CORRECTIVE_ACTION_ASSIGNED" => Some(DefectState::CorrectiveActionAssigned),
            "PENDING_VERIFICATION" => Some(DefectState::PendingVerification),
            "ESCALATED" => Some(DefectState::Escalated),
            "CLOSED" => Some(DefectState::Closed),
            _ => None,
        }
    }

    /// CLOSED 是唯一终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DefectState::Closed)
    }
}

impl fmt::Display for DefectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 缺陷严重度 (Defect Severity)
// ==========================================
// CRITICAL 的 SLA 升级窗口为 24h,其余为 72h
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectSeverity {
    Minor,
    Major,
    Critical,
}

impl DefectSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectSeverity::Minor => "MINOR",
            DefectSeverity::Major => "MAJOR",
            DefectSeverity::Critical => "CRITICAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MINOR" => Some(DefectSeverity::Minor),
            "MAJOR" => Some(DefectSeverity::Major),
            "CRITICAL" => Some(DefectSeverity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for DefectSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 班次类型 (Shift Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftType {
    Day,   // 白班
    Night, // 夜班
}

impl ShiftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftType::Day => "DAY",
            ShiftType::Night => "NIGHT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DAY" => Some(ShiftType::Day),
            "NIGHT" => Some(ShiftType::Night),
            _ => None,
        }
    }
}

impl fmt::Display for ShiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 指标状态 (Metric Status)
// ==========================================
// planned_time=0 等除零场景标记 INSUFFICIENT_DATA 而非报错
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    Ok,
    InsufficientData,
}

impl MetricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Ok => "OK",
            MetricStatus::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(MetricStatus::Ok),
            "INSUFFICIENT_DATA" => Some(MetricStatus::InsufficientData),
            _ => None,
        }
    }
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 活动记录状态 (Activity Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Success,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "SUCCESS",
            ActivityStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(ActivityStatus::Success),
            "FAILED" => Some(ActivityStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 超容忍乱序读数处理策略 (Rejected Reading Policy)
// ==========================================
// DROP: 丢弃并计数 (默认)
// REVIEW: 落入 rejected_reading 表供人工复核
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectedReadingPolicy {
    Drop,
    Review,
}

impl RejectedReadingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectedReadingPolicy::Drop => "DROP",
            RejectedReadingPolicy::Review => "REVIEW",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DROP" => Some(RejectedReadingPolicy::Drop),
            "REVIEW" => Some(RejectedReadingPolicy::Review),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank_ordering() {
        assert!(WorkOrderPriority::Urgent.rank() > WorkOrderPriority::Normal.rank());
        assert!(WorkOrderPriority::Normal.rank() > WorkOrderPriority::Low.rank());
        assert_eq!(
            WorkOrderPriority::from_rank(WorkOrderPriority::Urgent.rank()),
            Some(WorkOrderPriority::Urgent)
        );
    }

    #[test]
    fn test_state_str_roundtrip() {
        for s in [
            WorkOrderState::Pending,
            WorkOrderState::Leased,
            WorkOrderState::Completed,
            WorkOrderState::Cancelled,
            WorkOrderState::DeadLetter,
        ] {
            assert_eq!(WorkOrderState::from_str(s.as_str()), Some(s));
        }
        assert_eq!(WorkOrderState::from_str("BOGUS"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(WorkOrderState::DeadLetter.is_terminal());
        assert!(!WorkOrderState::Leased.is_terminal());
        assert!(DefectState::Closed.is_terminal());
        assert!(!DefectState::Escalated.is_terminal());
    }
}
