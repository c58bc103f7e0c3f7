// ==========================================
// 生产智能核心 - 缺陷工作流引擎
// ==========================================
// 状态机: OPENED → INVESTIGATING → CORRECTIVE_ACTION_ASSIGNED
//        → PENDING_VERIFICATION → CLOSED
// 旁路:   OPENED|INVESTIGATING --超SLA--> ESCALATED → CLOSED
// 红线: 非法迁移直接拒绝且不改状态; CLOSED 必须携带非空 resolution;
//       每次迁移追加一条活动审计
// 升级是唯一由计时器 (而非阈值越线) 建单的组件
// ==========================================

use crate::config::ConfigManager;
use crate::domain::activity_log::AgentActivityRecord;
use crate::domain::quality::{DefectCase, Inspection};
use crate::domain::types::{DefectSeverity, DefectState, WorkOrderPriority, WorkOrderType};
use crate::domain::work_order::WorkOrder;
use crate::engine::clock::Clock;
use crate::engine::events::{CoreEvent, EventPublisher};
use crate::repository::error::RepositoryError;
use crate::repository::{
    ActivityLogRepository, DefectCaseRepository, InspectionRepository, WorkOrderRepository,
};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// 工作流审计记录的代理类型标识
pub const WORKFLOW_AGENT: &str = "defect_workflow";

// ==========================================
// 错误类型
// ==========================================

#[derive(Error, Debug)]
pub enum WorkflowError {
    /// 工作流编程错误,直接暴露不重试
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidTransition { from: DefectState, to: DefectState },

    #[error("闭环必须携带非空整改结论: case_id={0}")]
    MissingResolution(String),

    #[error("缺陷工单未找到: {0}")]
    CaseNotFound(String),

    #[error("质检已通过,无需开立缺陷工单: inspection_id={0}")]
    InspectionPassed(String),

    /// 并发迁移冲突 (状态已被他方变更),调用方重读后重试
    #[error("状态迁移冲突: case_id={0}")]
    Conflict(String),

    #[error("存储不可用: {0}")]
    Storage(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    Config(String),
}

/// 状态机迁移表
fn transition_allowed(from: DefectState, to: DefectState) -> bool {
    use DefectState::*;
    matches!(
        (from, to),
        (Opened, Investigating)
            | (Investigating, CorrectiveActionAssigned)
            | (CorrectiveActionAssigned, PendingVerification)
            | (PendingVerification, Closed)
            | (Opened, Escalated)
            | (Investigating, Escalated)
            | (Escalated, Closed)
    )
}

// ==========================================
// DefectWorkflow - 缺陷工作流引擎
// ==========================================

pub struct DefectWorkflow {
    cases: Arc<DefectCaseRepository>,
    inspections: Arc<InspectionRepository>,
    work_orders: Arc<WorkOrderRepository>,
    activity: Arc<ActivityLogRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl DefectWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cases: Arc<DefectCaseRepository>,
        inspections: Arc<InspectionRepository>,
        work_orders: Arc<WorkOrderRepository>,
        activity: Arc<ActivityLogRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            cases,
            inspections,
            work_orders,
            activity,
            config,
            clock,
            events,
        }
    }

    /// 登记质检记录 (外部质检员动作的落库入口)
    pub fn record_inspection(&self, inspection: &Inspection) -> Result<(), WorkflowError> {
        self.inspections.insert(inspection)?;
        Ok(())
    }

    /// 为失败质检开立缺陷工单 (初始 OPENED)
    ///
    /// 严重度由调用方判定 (质检系统分级,核心不猜测)。
    pub fn open_case(
        &self,
        inspection: &Inspection,
        severity: DefectSeverity,
        assignee: Option<String>,
    ) -> Result<DefectCase, WorkflowError> {
        if inspection.passed {
            return Err(WorkflowError::InspectionPassed(
                inspection.inspection_id.clone(),
            ));
        }

        let now = self.clock.now();
        let case = DefectCase::open(&inspection.inspection_id, severity, assignee, now);
        self.cases.insert(&case)?;

        self.append_audit(
            &case.case_id,
            "open",
            json!({
                "inspection_id": inspection.inspection_id,
                "severity": severity,
                "defect_codes": inspection.defect_codes,
            }),
            now,
        )?;
        info!(
            case_id = %case.case_id,
            inspection_id = %inspection.inspection_id,
            severity = %severity,
            "缺陷工单已开立"
        );
        Ok(case)
    }

    /// 推进状态机
    ///
    /// - 非法迁移返回 InvalidTransition,不改状态
    /// - 迁移到 CLOSED 要求非空 resolution,并回写质检记录的整改措施字段
    pub fn advance(
        &self,
        case_id: &str,
        target: DefectState,
        actor: &str,
        resolution: Option<&str>,
    ) -> Result<DefectCase, WorkflowError> {
        let case = self
            .cases
            .find(case_id)?
            .ok_or_else(|| WorkflowError::CaseNotFound(case_id.to_string()))?;

        if !transition_allowed(case.state, target) {
            return Err(WorkflowError::InvalidTransition {
                from: case.state,
                to: target,
            });
        }

        let now = self.clock.now();
        let (resolution_to_set, closed_at) = if target == DefectState::Closed {
            let resolution = resolution
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| WorkflowError::MissingResolution(case_id.to_string()))?;
            (Some(resolution), Some(now))
        } else {
            (None, None)
        };

        // 状态 CAS、质检整改回写与审计在仓储层单事务提交
        let audit = Self::audit_record(
            case_id,
            "advance",
            json!({
                "from": case.state,
                "to": target,
                "actor": actor,
                "resolution": resolution_to_set,
            }),
            now,
        );
        let updated = self.cases.transition_with_audit(
            case_id,
            case.state,
            target,
            now,
            resolution_to_set,
            closed_at,
            None,
            resolution_to_set.map(|r| (case.inspection_id.as_str(), r)),
            &audit,
        )?;
        if !updated {
            return Err(WorkflowError::Conflict(case_id.to_string()));
        }

        info!(
            case_id = %case_id,
            from = %case.state,
            to = %target,
            actor = %actor,
            "缺陷状态已迁移"
        );

        self.cases
            .find(case_id)?
            .ok_or_else(|| WorkflowError::CaseNotFound(case_id.to_string()))
    }

    /// SLA 升级检查 (外部定时 tick 驱动)
    ///
    /// OPENED/INVESTIGATING 停留超过 SLA (CRITICAL 24h / 其余 72h) 的工单
    /// 迁移到 ESCALATED,并为监督代理角色建一张 quality 工单。
    /// escalated 标记 + 同主体去重保证重复 tick 不重复升级/建单。
    ///
    /// # 返回
    /// 本次被升级的工单 ID 列表
    pub fn check_escalations(&self) -> Result<Vec<String>, WorkflowError> {
        let now = self.clock.now();
        let sla_critical = self
            .config
            .sla_critical_hours()
            .map_err(|e| WorkflowError::Config(e.to_string()))?;
        let sla_default = self
            .config
            .sla_default_hours()
            .map_err(|e| WorkflowError::Config(e.to_string()))?;

        let mut escalated_ids = Vec::new();
        for case in self.cases.list_escalation_candidates()? {
            let sla_hours = match case.severity {
                DefectSeverity::Critical => sla_critical,
                _ => sla_default,
            };
            if now - case.state_changed_at <= Duration::hours(sla_hours) {
                continue;
            }

            let audit = Self::audit_record(
                &case.case_id,
                "escalate",
                json!({
                    "from": case.state,
                    "to": DefectState::Escalated,
                    "severity": case.severity,
                    "sla_hours": sla_hours,
                }),
                now,
            );
            let updated = self.cases.transition_with_audit(
                &case.case_id,
                case.state,
                DefectState::Escalated,
                now,
                None,
                None,
                Some(true),
                None,
                &audit,
            )?;
            if !updated {
                // 状态已被并发推进,下轮 tick 再看
                warn!(case_id = %case.case_id, "升级时状态已变更,跳过");
                continue;
            }

            // 监督代理工单 (同主体去重)
            if !self
                .work_orders
                .has_open_order(WorkOrderType::Quality, &case.case_id)?
            {
                let order = WorkOrder::new(
                    WorkOrderType::Quality,
                    WorkOrderPriority::Urgent,
                    Some(case.case_id.clone()),
                    json!({
                        "case_id": case.case_id,
                        "inspection_id": case.inspection_id,
                        "severity": case.severity,
                        "role": "supervisor",
                    }),
                    now,
                );
                self.work_orders.insert(&order)?;
            }

            self.events.publish(CoreEvent::DefectEscalated {
                case_id: case.case_id.clone(),
                inspection_id: case.inspection_id.clone(),
                severity: case.severity,
                escalated_at: now,
            });
            info!(
                case_id = %case.case_id,
                severity = %case.severity,
                "缺陷已超 SLA 升级"
            );
            escalated_ids.push(case.case_id);
        }
        Ok(escalated_ids)
    }

    fn audit_record(
        case_id: &str,
        action: &str,
        detail: serde_json::Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AgentActivityRecord {
        AgentActivityRecord::success(
            WORKFLOW_AGENT,
            None,
            Some(json!({ "case_id": case_id, "action": action })),
            Some(detail),
            0,
            now,
        )
    }

    fn append_audit(
        &self,
        case_id: &str,
        action: &str,
        detail: serde_json::Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), WorkflowError> {
        self.activity
            .append(&Self::audit_record(case_id, action, detail, now))?;
        Ok(())
    }
}
