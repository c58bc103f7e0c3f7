// ==========================================
// 生产智能核心 - 维护预测适配器
// ==========================================
// 职责: 包装可替换的评分函数,将评分按阈值策略转为维护工单
// 红线: 适配器不实现预测模型本身,只做评分、阈值与建单编排;
//       同设备已有未完结维护工单时不重复建单 (幂等)
// 触发: 外部 tick (每接入批次或固定周期),适配器本身无状态
// ==========================================

use crate::config::ConfigManager;
use crate::domain::maintenance::MaintenanceScore;
use crate::domain::telemetry::Reading;
use crate::domain::types::{WorkOrderPriority, WorkOrderType};
use crate::domain::work_order::WorkOrder;
use crate::engine::clock::Clock;
use crate::engine::events::{CoreEvent, EventPublisher};
use crate::repository::error::RepositoryError;
use crate::repository::{MaintenanceScoreRepository, TelemetryRepository, WorkOrderRepository};
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

// ==========================================
// 评分函数抽象
// ==========================================

/// 模型输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// 失效概率 [0, 1]
    pub failure_probability: f64,
    /// 预测失效窗口 (天)
    pub predicted_window_days: i64,
}

/// 可注入的评分函数
///
/// 输入为该设备最近 N 天的全部读数; 模型实现在核心范围之外。
pub trait ScoringModel: Send + Sync {
    fn score(&self, equipment_id: &str, readings: &[Reading]) -> Result<Prediction, String>;
}

// ==========================================
// 错误类型
// ==========================================

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("评分模型失败: {0}")]
    Model(String),

    #[error("存储不可用: {0}")]
    Storage(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    Config(String),
}

// ==========================================
// MaintenancePredictor - 维护预测适配器
// ==========================================

pub struct MaintenancePredictor {
    model: Arc<dyn ScoringModel>,
    telemetry: Arc<TelemetryRepository>,
    score_repo: Arc<MaintenanceScoreRepository>,
    work_orders: Arc<WorkOrderRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl MaintenancePredictor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ScoringModel>,
        telemetry: Arc<TelemetryRepository>,
        score_repo: Arc<MaintenanceScoreRepository>,
        work_orders: Arc<WorkOrderRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            model,
            telemetry,
            score_repo,
            work_orders,
            config,
            clock,
            events,
        }
    }

    /// 评估单台设备: 评分 → 保留最新 → 阈值策略建单
    pub fn evaluate(&self, equipment_id: &str) -> Result<MaintenanceScore, PredictorError> {
        let now = self.clock.now();
        let window_days = self
            .config
            .score_window_days()
            .map_err(|e| PredictorError::Config(e.to_string()))?;
        let from = now - Duration::days(window_days);

        let readings = self.telemetry.query_equipment_range(equipment_id, from, now)?;
        let prediction = self
            .model
            .score(equipment_id, &readings)
            .map_err(PredictorError::Model)?;

        let score = MaintenanceScore::new(
            equipment_id,
            prediction.failure_probability,
            prediction.predicted_window_days,
            now,
        );
        self.score_repo.upsert_latest(&score)?;

        self.apply_thresholds(&score)?;
        Ok(score)
    }

    /// 阈值策略:
    /// - p > threshold_high ⇒ URGENT 维护工单
    /// - threshold_low < p ≤ threshold_high ⇒ NORMAL 维护工单 (排入下个维护窗口)
    /// - 其余不建单
    fn apply_thresholds(&self, score: &MaintenanceScore) -> Result<(), PredictorError> {
        let high = self
            .config
            .threshold_high()
            .map_err(|e| PredictorError::Config(e.to_string()))?;
        let low = self
            .config
            .threshold_low()
            .map_err(|e| PredictorError::Config(e.to_string()))?;

        let priority = if score.failure_probability > high {
            WorkOrderPriority::Urgent
        } else if score.failure_probability > low {
            WorkOrderPriority::Normal
        } else {
            debug!(
                equipment_id = %score.equipment_id,
                failure_probability = score.failure_probability,
                "评分未越线,不建单"
            );
            return Ok(());
        };

        // 越线评分留审计痕 (建单与否都留)
        self.score_repo.append_alert_audit(score)?;

        // 同设备已有未完结维护工单时不重复建单
        if self
            .work_orders
            .has_open_order(WorkOrderType::Maintenance, &score.equipment_id)?
        {
            debug!(
                equipment_id = %score.equipment_id,
                "已有未完结维护工单,跳过建单"
            );
            return Ok(());
        }

        let scheduled_for =
            (score.computed_at + Duration::days(score.predicted_window_days)).date_naive();
        let payload = json!({
            "equipment_id": score.equipment_id,
            "failure_probability": score.failure_probability,
            "predicted_window_days": score.predicted_window_days,
            "scheduled_for": scheduled_for,
        });

        let order = WorkOrder::new(
            WorkOrderType::Maintenance,
            priority,
            Some(score.equipment_id.clone()),
            payload,
            score.computed_at,
        );
        self.work_orders.insert(&order)?;
        info!(
            equipment_id = %score.equipment_id,
            order_id = %order.order_id,
            priority = %priority,
            failure_probability = score.failure_probability,
            "维护工单已创建"
        );

        self.events.publish(CoreEvent::MaintenanceWorkOrderCreated {
            order_id: order.order_id,
            equipment_id: score.equipment_id.clone(),
            priority,
            failure_probability: score.failure_probability,
        });
        Ok(())
    }
}
