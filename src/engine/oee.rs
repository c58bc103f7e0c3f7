// ==========================================
// 生产智能核心 - OEE 聚合引擎
// ==========================================
// OEE = availability × performance × quality
// - availability = (计划时间 − 停机分钟) / 计划时间
// - performance  = (实际产量 × 理想节拍) / 运行时间
// - quality      = 良品量 / 实际产量 (实际产量为 0 时取 0)
// 输入: 遥测读数 (停机权威来源) + 生产日志 (产量权威来源)
// 纯函数重算,同键 upsert 幂等 (last-write-wins)
// ==========================================

use crate::config::ConfigManager;
use crate::domain::production::{OeeMetric, ShiftWindow};
use crate::domain::types::MetricStatus;
use crate::engine::clock::Clock;
use crate::repository::error::RepositoryError;
use crate::repository::{OeeRepository, ProductionLogSource, TelemetryRepository};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// 停机读数的传感器类型约定 (接入适配器归一化产出)
pub const DOWNTIME_SENSOR: &str = "downtime_minutes";

#[derive(Error, Debug)]
pub enum OeeError {
    #[error("存储不可用: {0}")]
    Storage(#[from] RepositoryError),

    #[error("配置读取失败: {0}")]
    Config(String),
}

// ==========================================
// OeeAggregator - OEE 聚合引擎
// ==========================================

pub struct OeeAggregator {
    telemetry: Arc<TelemetryRepository>,
    production_log: Arc<dyn ProductionLogSource>,
    oee_repo: Arc<OeeRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
}

impl OeeAggregator {
    pub fn new(
        telemetry: Arc<TelemetryRepository>,
        production_log: Arc<dyn ProductionLogSource>,
        oee_repo: Arc<OeeRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            telemetry,
            production_log,
            oee_repo,
            config,
            clock,
        }
    }

    /// 计算单机台单班次 OEE 并幂等落库
    ///
    /// 除零场景 (计划时间为 0、运行时间不为正、生产日志缺失)
    /// 一律标记 INSUFFICIENT_DATA,不抛错。
    pub fn compute_shift(&self, window: &ShiftWindow) -> Result<OeeMetric, OeeError> {
        let computed_at = self.clock.now();
        let planned_min = window.planned_minutes();

        if planned_min <= 0.0 {
            return self.store_insufficient(window, "计划时间为 0");
        }

        let Some(entry) = self.production_log.find_entry(
            &window.machine_id,
            window.shift_date,
            window.shift_type,
        )?
        else {
            return self.store_insufficient(window, "生产日志缺失");
        };

        // 停机: 遥测 downtime 读数为权威,窗口内无读数时回退生产日志
        let downtime_readings = self.telemetry.query_range(
            &window.machine_id,
            DOWNTIME_SENSOR,
            window.start,
            window.end,
        )?;
        let downtime_min = if downtime_readings.is_empty() {
            entry.downtime_minutes
        } else {
            downtime_readings.iter().map(|r| r.value).sum()
        };

        let run_time_min = planned_min - downtime_min;
        if run_time_min <= 0.0 {
            return self.store_insufficient(window, "运行时间不为正");
        }

        let ideal_cycle_min = self
            .config
            .ideal_cycle_time_min(&window.machine_id)
            .map_err(|e| OeeError::Config(e.to_string()))?;

        let availability = run_time_min / planned_min;
        let performance = entry.actual_quantity * ideal_cycle_min / run_time_min;
        let quality = if entry.actual_quantity > 0.0 {
            entry.good_quantity / entry.actual_quantity
        } else {
            0.0
        };
        let oee = availability * performance * quality;

        let metric = OeeMetric {
            machine_id: window.machine_id.clone(),
            shift_date: window.shift_date,
            shift_type: window.shift_type,
            availability,
            performance,
            quality,
            oee,
            status: MetricStatus::Ok,
            computed_at,
        };

        self.oee_repo.upsert(&metric)?;
        info!(
            machine_id = %metric.machine_id,
            shift_date = %metric.shift_date,
            shift_type = %metric.shift_type,
            oee = metric.oee,
            "OEE 指标已计算"
        );
        Ok(metric)
    }

    fn store_insufficient(
        &self,
        window: &ShiftWindow,
        reason: &str,
    ) -> Result<OeeMetric, OeeError> {
        debug!(
            machine_id = %window.machine_id,
            shift_date = %window.shift_date,
            reason,
            "OEE 数据不足"
        );
        let metric = OeeMetric::insufficient_data(window, self.clock.now());
        self.oee_repo.upsert(&metric)?;
        Ok(metric)
    }
}
