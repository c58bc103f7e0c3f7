// ==========================================
// 生产智能核心 - 遥测接入引擎
// ==========================================
// 职责: 读数校验、乱序容忍判定、有界缓冲背压
// 红线: 缓冲有界,满载即拒 (Overloaded),适配器退避重试;
//       核心不做无界内存囤积
// ==========================================

use crate::config::ConfigManager;
use crate::domain::telemetry::{Reading, RejectedReading};
use crate::domain::types::RejectedReadingPolicy;
use crate::engine::clock::Clock;
use crate::repository::error::RepositoryError;
use crate::repository::TelemetryRepository;
use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ==========================================
// 错误类型
// ==========================================

#[derive(Error, Debug)]
pub enum IngestError {
    /// 畸形读数,拒绝且不重试
    #[error("读数校验失败: {0}")]
    Validation(String),

    /// 超出乱序容忍窗口 (已按策略处理)
    #[error("乱序读数超出容忍窗口: equipment={equipment_id}, sensor={sensor_type}")]
    OutOfOrder {
        equipment_id: String,
        sensor_type: String,
    },

    /// 同键读数已存在
    #[error("重复读数: equipment={equipment_id}, sensor={sensor_type}")]
    Duplicate {
        equipment_id: String,
        sensor_type: String,
    },

    /// 接入缓冲满载 (背压信号,适配器退避重试)
    #[error("接入缓冲满载,请退避重试")]
    Overloaded,

    /// 存储暂不可用 (瞬态,调用方指数退避重试)
    #[error("存储不可用: {0}")]
    Storage(#[from] RepositoryError),
}

// ==========================================
// TelemetryIngestor - 遥测接入引擎
// ==========================================

pub struct TelemetryIngestor {
    repo: Arc<TelemetryRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    /// 被拒绝读数累计 (乱序丢弃计数指标)
    rejected_counter: AtomicU64,
}

impl TelemetryIngestor {
    pub fn new(
        repo: Arc<TelemetryRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            config,
            clock,
            rejected_counter: AtomicU64::new(0),
        }
    }

    /// 同步接入一条读数 (校验 → 乱序判定 → 落库)
    pub fn ingest_now(&self, reading: &Reading) -> Result<(), IngestError> {
        self.validate(reading)?;
        self.check_out_of_order(reading)?;

        match self.repo.insert(reading) {
            Ok(()) => {
                debug!(
                    equipment_id = %reading.equipment_id,
                    sensor_type = %reading.sensor_type,
                    "读数已落库"
                );
                Ok(())
            }
            Err(RepositoryError::UniqueConstraintViolation(_)) => Err(IngestError::Duplicate {
                equipment_id: reading.equipment_id.clone(),
                sensor_type: reading.sensor_type.clone(),
            }),
            Err(e) => Err(IngestError::Storage(e)),
        }
    }

    fn validate(&self, reading: &Reading) -> Result<(), IngestError> {
        if reading.equipment_id.trim().is_empty() {
            return Err(IngestError::Validation("equipment_id 不能为空".to_string()));
        }
        if reading.sensor_type.trim().is_empty() {
            return Err(IngestError::Validation("sensor_type 不能为空".to_string()));
        }
        if !reading.value.is_finite() {
            return Err(IngestError::Validation(format!(
                "读数值非有限数: {}",
                reading.value
            )));
        }
        Ok(())
    }

    /// 乱序判定: 落后于该 (设备, 传感器) 最大已见时间戳超过容忍窗口即拒
    /// (保护下游窗口聚合不被无界回填污染)
    fn check_out_of_order(&self, reading: &Reading) -> Result<(), IngestError> {
        let tolerance_min = self
            .config
            .out_of_order_tolerance_min()
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        let latest = self
            .repo
            .latest_timestamp(&reading.equipment_id, &reading.sensor_type)?;

        let Some(latest) = latest else {
            return Ok(());
        };
        if reading.timestamp >= latest - Duration::minutes(tolerance_min) {
            return Ok(());
        }

        self.rejected_counter.fetch_add(1, Ordering::Relaxed);
        let policy = self
            .config
            .rejected_reading_policy()
            .unwrap_or(RejectedReadingPolicy::Drop);
        warn!(
            equipment_id = %reading.equipment_id,
            sensor_type = %reading.sensor_type,
            timestamp = %reading.timestamp,
            latest = %latest,
            policy = policy.as_str(),
            "读数超出乱序容忍窗口"
        );

        if policy == RejectedReadingPolicy::Review {
            let rejected = RejectedReading {
                equipment_id: reading.equipment_id.clone(),
                sensor_type: reading.sensor_type.clone(),
                value: reading.value,
                unit: reading.unit.clone(),
                timestamp: reading.timestamp,
                reason: format!("超出乱序容忍窗口 {tolerance_min} 分钟"),
                rejected_at: self.clock.now(),
            };
            self.repo.insert_rejected(&rejected)?;
        }

        Err(IngestError::OutOfOrder {
            equipment_id: reading.equipment_id.clone(),
            sensor_type: reading.sensor_type.clone(),
        })
    }

    /// 被拒绝读数累计
    pub fn rejected_count(&self) -> u64 {
        self.rejected_counter.load(Ordering::Relaxed)
    }

    /// 启动有界缓冲接入 (返回入口句柄 + 泄洪任务)
    ///
    /// 入口句柄 `submit` 满载即返回 Overloaded; 全部句柄释放后泄洪任务自然退出。
    pub fn spawn_buffered(
        self: &Arc<Self>,
    ) -> Result<(IngestHandle, tokio::task::JoinHandle<()>), IngestError> {
        let capacity = self
            .config
            .ingestion_queue_capacity()
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        let (tx, mut rx) = mpsc::channel::<Reading>(capacity);

        let ingestor = Arc::clone(self);
        let drain = tokio::spawn(async move {
            while let Some(reading) = rx.recv().await {
                match ingestor.ingest_now(&reading) {
                    Ok(()) => {}
                    // 乱序/重复在 ingest_now 内已按策略处理并记日志
                    Err(IngestError::OutOfOrder { .. }) | Err(IngestError::Duplicate { .. }) => {}
                    Err(e) => {
                        warn!(error = %e, "缓冲泄洪落库失败,读数丢弃");
                    }
                }
            }
            debug!("接入缓冲泄洪任务退出");
        });

        Ok((IngestHandle { tx }, drain))
    }
}

/// 接入入口句柄 (适配器侧持有)
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Reading>,
}

impl IngestHandle {
    /// 非阻塞提交; 缓冲满载返回 Overloaded (背压)
    pub fn submit(&self, reading: Reading) -> Result<(), IngestError> {
        self.tx.try_send(reading).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngestError::Overloaded,
            mpsc::error::TrySendError::Closed(_) => {
                IngestError::Validation("接入通道已关闭".to_string())
            }
        })
    }
}
