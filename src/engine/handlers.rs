// ==========================================
// 生产智能核心 - 内置代理处理器
// ==========================================
// 编排器按类型分发; 处理器只解释载荷并产出结构化结果,
// 不直接操作队列 (ack/nack 由编排器统一做)。
// 长任务在检查点自查取消标记,发现后干净中止。
// ==========================================

use crate::domain::types::{DefectState, WorkOrderType};
use crate::domain::work_order::WorkOrder;
use crate::engine::orchestrator::{AgentHandler, HandlerError, TaskContext};
use crate::repository::DefectCaseRepository;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn payload_str<'a>(
    payload: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, HandlerError> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HandlerError::Failed(format!("载荷缺少字段: {key}")))
}

// ==========================================
// 质量监督处理器
// ==========================================

/// 升级缺陷的监督复核: 拉取工单现状,产出复核摘要
pub struct QualitySupervisorHandler {
    cases: Arc<DefectCaseRepository>,
}

impl QualitySupervisorHandler {
    pub fn new(cases: Arc<DefectCaseRepository>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl AgentHandler for QualitySupervisorHandler {
    fn agent_type(&self) -> WorkOrderType {
        WorkOrderType::Quality
    }

    async fn handle(
        &self,
        order: &WorkOrder,
        ctx: &TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        if ctx.cancellation_requested() {
            return Err(HandlerError::Cancelled);
        }

        let case_id = payload_str(&order.payload, "case_id")?;
        let case = self
            .cases
            .find(case_id)
            .map_err(|e| HandlerError::Failed(e.to_string()))?
            .ok_or_else(|| HandlerError::Failed(format!("缺陷工单未找到: {case_id}")))?;

        // 工单在监督介入前已被闭环,复核即完成
        let action_required = case.state != DefectState::Closed;
        info!(
            case_id = %case.case_id,
            state = %case.state,
            action_required,
            "监督复核完成"
        );
        Ok(json!({
            "case_id": case.case_id,
            "inspection_id": case.inspection_id,
            "severity": case.severity,
            "state": case.state,
            "action_required": action_required,
        }))
    }
}

// ==========================================
// 维护排程处理器
// ==========================================

/// 维护工单排程确认: 校验载荷并确认排程窗口
pub struct MaintenanceSchedulerHandler;

#[async_trait]
impl AgentHandler for MaintenanceSchedulerHandler {
    fn agent_type(&self) -> WorkOrderType {
        WorkOrderType::Maintenance
    }

    async fn handle(
        &self,
        order: &WorkOrder,
        ctx: &TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        if ctx.cancellation_requested() {
            return Err(HandlerError::Cancelled);
        }

        let equipment_id = payload_str(&order.payload, "equipment_id")?;
        let scheduled_for = order
            .payload
            .get("scheduled_for")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        info!(
            equipment_id = %equipment_id,
            scheduled_for = ?scheduled_for,
            priority = %order.priority,
            "维护任务已排程"
        );
        Ok(json!({
            "equipment_id": equipment_id,
            "scheduled_for": scheduled_for,
            "priority": order.priority,
            "scheduled": true,
        }))
    }
}

// ==========================================
// 采购请求处理器
// ==========================================

/// 采购请求整备: 校验物料与数量,产出请求载荷
/// (供应商选择在核心范围外,由下游采购协作方消费事件)
pub struct ProcurementRequestHandler;

#[async_trait]
impl AgentHandler for ProcurementRequestHandler {
    fn agent_type(&self) -> WorkOrderType {
        WorkOrderType::Procurement
    }

    async fn handle(
        &self,
        order: &WorkOrder,
        ctx: &TaskContext,
    ) -> Result<serde_json::Value, HandlerError> {
        if ctx.cancellation_requested() {
            return Err(HandlerError::Cancelled);
        }

        let material_code = payload_str(&order.payload, "material_code")?;
        let quantity = order
            .payload
            .get("quantity")
            .and_then(serde_json::Value::as_f64)
            .filter(|q| *q > 0.0)
            .ok_or_else(|| HandlerError::Failed("采购数量必须为正数".to_string()))?;

        info!(
            material_code = %material_code,
            quantity,
            "采购请求已整备"
        );
        Ok(json!({
            "material_code": material_code,
            "quantity": quantity,
            "urgency": order.priority,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use crate::db;
    use crate::domain::types::WorkOrderPriority;
    use crate::engine::clock::SystemClock;
    use crate::engine::events::CollectingEventPublisher;
    use crate::engine::work_queue::WorkQueue;
    use crate::repository::WorkOrderRepository;
    use chrono::Utc;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn test_ctx(order_id: &str) -> TaskContext {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let queue = WorkQueue::new(
            Arc::new(WorkOrderRepository::new(Arc::clone(&conn))),
            Arc::new(ConfigManager::from_connection(conn)),
            Arc::new(SystemClock),
            Arc::new(CollectingEventPublisher::new()),
        );
        TaskContext::new(Arc::new(queue), order_id)
    }

    #[tokio::test]
    async fn test_procurement_handler_validates_payload() {
        let handler = ProcurementRequestHandler;
        let order = WorkOrder::new(
            WorkOrderType::Procurement,
            WorkOrderPriority::Normal,
            None,
            json!({ "material_code": "ROLL-CR-02", "quantity": 120.0 }),
            Utc::now(),
        );
        let ctx = test_ctx(&order.order_id);

        let output = handler.handle(&order, &ctx).await.unwrap();
        assert_eq!(output["material_code"], "ROLL-CR-02");
        assert_eq!(output["quantity"], 120.0);
    }

    #[tokio::test]
    async fn test_procurement_handler_rejects_missing_material() {
        let handler = ProcurementRequestHandler;
        let order = WorkOrder::new(
            WorkOrderType::Procurement,
            WorkOrderPriority::Normal,
            None,
            json!({ "quantity": 10.0 }),
            Utc::now(),
        );
        let ctx = test_ctx(&order.order_id);

        assert!(handler.handle(&order, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_handler_echoes_schedule() {
        let handler = MaintenanceSchedulerHandler;
        let order = WorkOrder::new(
            WorkOrderType::Maintenance,
            WorkOrderPriority::Urgent,
            Some("EQ-01".to_string()),
            json!({ "equipment_id": "EQ-01", "scheduled_for": "2025-07-01" }),
            Utc::now(),
        );
        let ctx = test_ctx(&order.order_id);

        let output = handler.handle(&order, &ctx).await.unwrap();
        assert_eq!(output["equipment_id"], "EQ-01");
        assert_eq!(output["scheduled"], true);
    }
}
