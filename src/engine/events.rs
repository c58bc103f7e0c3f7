// ==========================================
// 生产智能核心 - 引擎层事件发布
// ==========================================
// 职责: 定义结构化事件与发布 trait,实现依赖倒置
// 说明: 核心只发结构化事件,人类可读渲染/投递是通知协作方的职责
// 投递保证: 至少一次发射,无投递回执
// ==========================================

use crate::domain::types::{DefectSeverity, WorkOrderPriority, WorkOrderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ==========================================
// 核心事件类型
// ==========================================

/// 核心结构化事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoreEvent {
    /// 缺陷超 SLA 升级
    DefectEscalated {
        case_id: String,
        inspection_id: String,
        severity: DefectSeverity,
        escalated_at: DateTime<Utc>,
    },
    /// 维护工单创建 (阈值越线)
    MaintenanceWorkOrderCreated {
        order_id: String,
        equipment_id: String,
        priority: WorkOrderPriority,
        failure_probability: f64,
    },
    /// 工单进入死信 (需人工介入)
    WorkOrderDeadLettered {
        order_id: String,
        order_type: WorkOrderType,
        attempt_count: i32,
    },
    /// 采购请求 (procurement 工单成功后发出)
    ProcurementRequested {
        material_code: String,
        quantity: f64,
        urgency: WorkOrderPriority,
    },
}

impl CoreEvent {
    /// 事件类型标识 (日志/路由用)
    pub fn kind(&self) -> &'static str {
        match self {
            CoreEvent::DefectEscalated { .. } => "DefectEscalated",
            CoreEvent::MaintenanceWorkOrderCreated { .. } => "MaintenanceWorkOrderCreated",
            CoreEvent::WorkOrderDeadLettered { .. } => "WorkOrderDeadLettered",
            CoreEvent::ProcurementRequested { .. } => "ProcurementRequested",
        }
    }
}

// ==========================================
// 发布 trait (通知/采购协作方在边界外实现)
// ==========================================

/// 事件发布接口
///
/// 发布失败不阻断核心业务路径,由调用方记日志降级。
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: CoreEvent);
}

/// 默认发布器: 以结构化日志形式发射事件
///
/// 部署时由对接消息总线/Webhook 的适配器替换。
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: CoreEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => {
                tracing::info!(event_type = event.kind(), payload = %payload, "发布核心事件");
            }
            Err(e) => {
                tracing::warn!(event_type = event.kind(), error = %e, "事件序列化失败");
            }
        }
    }
}

/// 收集发布器 (测试用,捕获全部事件)
#[derive(Default, Clone)]
pub struct CollectingEventPublisher {
    events: Arc<Mutex<Vec<CoreEvent>>>,
}

impl CollectingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventPublisher for CollectingEventPublisher {
    fn publish(&self, event: CoreEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
