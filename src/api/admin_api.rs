// ==========================================
// 生产智能核心 - 管理查询 API
// ==========================================
// 职责: 运维侧只读查询面 (死信、OEE、开放缺陷、队列水位)
// 说明: 进程内查询门面,外层传输 (HTTP/RPC) 在核心范围之外
// ==========================================

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::production::OeeMetric;
use crate::domain::quality::DefectCase;
use crate::domain::types::{ShiftType, WorkOrderState};
use crate::domain::work_order::WorkOrder;
use crate::repository::{
    ActivityLogRepository, DefectCaseRepository, OeeRepository, TelemetryRepository,
    WorkOrderRepository,
};

// ==========================================
// 查询 DTO
// ==========================================

/// 工单摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrderInfo {
    pub order_id: String,
    pub order_type: String,
    pub priority: String,
    pub state: String,
    pub subject_id: Option<String>,
    pub attempt_count: i32,
    pub lease_owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkOrder> for WorkOrderInfo {
    fn from(order: WorkOrder) -> Self {
        Self {
            order_id: order.order_id,
            order_type: order.order_type.as_str().to_string(),
            priority: order.priority.as_str().to_string(),
            state: order.state.as_str().to_string(),
            subject_id: order.subject_id,
            attempt_count: order.attempt_count,
            lease_owner: order.lease_owner,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// 缺陷工单摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectCaseInfo {
    pub case_id: String,
    pub inspection_id: String,
    pub severity: String,
    pub state: String,
    pub opened_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    pub assignee: Option<String>,
    pub escalated: bool,
}

impl From<DefectCase> for DefectCaseInfo {
    fn from(case: DefectCase) -> Self {
        Self {
            case_id: case.case_id,
            inspection_id: case.inspection_id,
            severity: case.severity.as_str().to_string(),
            state: case.state.as_str().to_string(),
            opened_at: case.opened_at,
            state_changed_at: case.state_changed_at,
            assignee: case.assignee,
            escalated: case.escalated,
        }
    }
}

/// 队列水位快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatsInfo {
    pub pending: i64,
    pub leased: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub dead_letter: i64,
}

// ==========================================
// AdminApi - 管理查询 API
// ==========================================

pub struct AdminApi {
    work_orders: Arc<WorkOrderRepository>,
    cases: Arc<DefectCaseRepository>,
    oee: Arc<OeeRepository>,
    telemetry: Arc<TelemetryRepository>,
    activity: Arc<ActivityLogRepository>,
}

impl AdminApi {
    pub fn new(
        work_orders: Arc<WorkOrderRepository>,
        cases: Arc<DefectCaseRepository>,
        oee: Arc<OeeRepository>,
        telemetry: Arc<TelemetryRepository>,
        activity: Arc<ActivityLogRepository>,
    ) -> Self {
        Self {
            work_orders,
            cases,
            oee,
            telemetry,
            activity,
        }
    }

    /// 死信工单列表 (人工介入入口)
    pub fn list_dead_letter_orders(&self) -> ApiResult<Vec<WorkOrderInfo>> {
        let orders = self.work_orders.list_dead_letters()?;
        Ok(orders.into_iter().map(WorkOrderInfo::from).collect())
    }

    /// 查询单机台单班次 OEE 指标
    ///
    /// # 返回
    /// - Ok(Some(OeeMetric)): 已计算的指标 (含 INSUFFICIENT_DATA 标记)
    /// - Ok(None): 该班次尚未计算
    pub fn get_oee_metric(
        &self,
        machine_id: &str,
        shift_date: NaiveDate,
        shift_type: ShiftType,
    ) -> ApiResult<Option<OeeMetric>> {
        if machine_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机台编码不能为空".to_string()));
        }
        Ok(self.oee.find(machine_id, shift_date, shift_type)?)
    }

    /// 机台历史 OEE 指标列表
    pub fn list_oee_metrics(&self, machine_id: &str) -> ApiResult<Vec<OeeMetric>> {
        if machine_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("机台编码不能为空".to_string()));
        }
        Ok(self.oee.list_by_machine(machine_id)?)
    }

    /// 未闭环缺陷工单列表
    pub fn list_open_defect_cases(&self) -> ApiResult<Vec<DefectCaseInfo>> {
        let cases = self.cases.list_open()?;
        Ok(cases.into_iter().map(DefectCaseInfo::from).collect())
    }

    /// 工单按状态计数 (队列水位)
    pub fn queue_stats(&self) -> ApiResult<QueueStatsInfo> {
        Ok(QueueStatsInfo {
            pending: self.work_orders.count_by_state(WorkOrderState::Pending)?,
            leased: self.work_orders.count_by_state(WorkOrderState::Leased)?,
            completed: self.work_orders.count_by_state(WorkOrderState::Completed)?,
            cancelled: self.work_orders.count_by_state(WorkOrderState::Cancelled)?,
            dead_letter: self.work_orders.count_by_state(WorkOrderState::DeadLetter)?,
        })
    }

    /// 待人工复核的乱序读数累计 (REVIEW 策略落库的)
    pub fn rejected_reading_count(&self) -> ApiResult<i64> {
        Ok(self.telemetry.rejected_count()?)
    }

    /// 代理类型的最近执行记录 (观察单个代理池的健康度)
    pub fn list_agent_activity(
        &self,
        agent_type: &str,
        limit: i64,
    ) -> ApiResult<Vec<crate::domain::activity_log::AgentActivityRecord>> {
        if agent_type.trim().is_empty() {
            return Err(ApiError::InvalidInput("代理类型不能为空".to_string()));
        }
        Ok(self.activity.list_recent_by_agent(agent_type, limit)?)
    }

    /// 工单的全部执行记录 (排障回放)
    pub fn list_order_activity(
        &self,
        order_id: &str,
    ) -> ApiResult<Vec<crate::domain::activity_log::AgentActivityRecord>> {
        if order_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("工单编号不能为空".to_string()));
        }
        Ok(self.activity.list_by_work_order(order_id)?)
    }
}
