// ==========================================
// 生产智能核心 - 工单队列引擎
// ==========================================
// 持久化、优先级有序、租约式 at-least-once 投递。
// 租约到期是全系统的安全网: 任何未捕获失败 (崩溃/超时/分区)
// 都表现为租约过期、工单重新可见,重试次数由死信上限封顶。
// ==========================================

use crate::config::ConfigManager;
use crate::domain::types::{WorkOrderState, WorkOrderType};
use crate::domain::work_order::WorkOrder;
use crate::engine::clock::Clock;
use crate::engine::events::{CoreEvent, EventPublisher};
use crate::repository::error::RepositoryError;
use crate::repository::work_order_repo::{CancelOutcome, LeaseAttempt};
use crate::repository::WorkOrderRepository;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ==========================================
// 错误类型
// ==========================================

#[derive(Error, Debug)]
pub enum QueueError {
    /// 并发下的预期冲突,调用方重试租约尝试
    #[error("租约冲突: {0}")]
    LeaseConflict(String),

    #[error("工单未找到: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作 (如 ack 非自己持有的租约)
    #[error("工单状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("配置读取失败: {0}")]
    Config(String),

    #[error("存储不可用: {0}")]
    Storage(RepositoryError),
}

impl From<RepositoryError> for QueueError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                QueueError::NotFound(format!("{entity}:{id}"))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                QueueError::InvalidState(format!("from={from} to={to}"))
            }
            other => QueueError::Storage(other),
        }
    }
}

/// 单次租约尝试内的乐观冲突重试上限
const LEASE_CONFLICT_RETRIES: usize = 3;

// ==========================================
// WorkQueue - 工单队列
// ==========================================

pub struct WorkQueue {
    repo: Arc<WorkOrderRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
}

impl WorkQueue {
    pub fn new(
        repo: Arc<WorkOrderRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repo,
            config,
            clock,
            events,
        }
    }

    /// 入队
    pub fn enqueue(&self, order: &WorkOrder) -> Result<String, QueueError> {
        let order_id = self.repo.insert(order)?;
        debug!(
            order_id = %order_id,
            order_type = %order.order_type,
            priority = %order.priority,
            "工单已入队"
        );
        Ok(order_id)
    }

    /// 取得一个租约
    ///
    /// 先回收过期租约 (attempt_count + 1,超上限入死信并发事件),
    /// 再按 priority DESC + created_at FIFO 条件更新抢占。
    /// 乐观冲突在内部做有限次重试; 队列空返回 None。
    pub fn lease(
        &self,
        agent_type: WorkOrderType,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<Option<WorkOrder>, QueueError> {
        let now = self.clock.now();
        self.reclaim_and_publish(now)?;

        for _ in 0..LEASE_CONFLICT_RETRIES {
            match self
                .repo
                .try_lease(agent_type, owner, now, now + lease_duration)?
            {
                LeaseAttempt::Leased(order) => {
                    debug!(
                        order_id = %order.order_id,
                        owner = %owner,
                        attempt_count = order.attempt_count,
                        "租约已取得"
                    );
                    return Ok(Some(order));
                }
                LeaseAttempt::Empty => return Ok(None),
                LeaseAttempt::Conflict => continue,
            }
        }
        Err(QueueError::LeaseConflict(format!(
            "agent_type={agent_type} 连续 {LEASE_CONFLICT_RETRIES} 次候选被抢占"
        )))
    }

    /// 以默认租约时长取租约
    pub fn lease_default(
        &self,
        agent_type: WorkOrderType,
        owner: &str,
    ) -> Result<Option<WorkOrder>, QueueError> {
        let secs = self
            .config
            .lease_duration_secs()
            .map_err(|e| QueueError::Config(e.to_string()))?;
        self.lease(agent_type, owner, Duration::seconds(secs))
    }

    /// 确认完成 (COMPLETED 终态)
    pub fn ack(&self, order_id: &str, owner: &str) -> Result<(), QueueError> {
        self.repo.ack(order_id, owner, self.clock.now())?;
        debug!(order_id = %order_id, owner = %owner, "工单已确认完成");
        Ok(())
    }

    /// 否定确认: 立即释放租约并计一次尝试,超上限入死信
    pub fn nack(&self, order_id: &str, owner: &str, reason: &str) -> Result<(), QueueError> {
        let max_attempts = self
            .config
            .max_attempts()
            .map_err(|e| QueueError::Config(e.to_string()))?;
        let order = self
            .repo
            .nack(order_id, owner, self.clock.now(), max_attempts)?;
        warn!(
            order_id = %order_id,
            owner = %owner,
            reason = %reason,
            attempt_count = order.attempt_count,
            state = %order.state,
            "工单被否定确认"
        );
        if order.state == WorkOrderState::DeadLetter {
            self.publish_dead_letter(&order);
        }
        Ok(())
    }

    /// 续约 (以默认租约时长顺延)
    pub fn extend_lease(&self, order_id: &str, owner: &str) -> Result<(), QueueError> {
        let now = self.clock.now();
        let secs = self
            .config
            .lease_duration_secs()
            .map_err(|e| QueueError::Config(e.to_string()))?;
        self.repo
            .extend_lease(order_id, owner, now, now + Duration::seconds(secs))?;
        debug!(order_id = %order_id, owner = %owner, "租约已顺延");
        Ok(())
    }

    /// 取消工单 (仅未租约时生效; 已租约置建议性标记)
    pub fn cancel(&self, order_id: &str) -> Result<CancelOutcome, QueueError> {
        let outcome = self.repo.cancel(order_id, self.clock.now())?;
        info!(order_id = %order_id, outcome = ?outcome, "工单取消请求已处理");
        Ok(outcome)
    }

    /// 取消请求标记查询 (处理器检查点)
    pub fn cancellation_requested(&self, order_id: &str) -> Result<bool, QueueError> {
        Ok(self.repo.cancellation_requested(order_id)?)
    }

    /// 死信列表 (管理查询面)
    pub fn list_dead_letters(&self) -> Result<Vec<WorkOrder>, QueueError> {
        Ok(self.repo.list_dead_letters()?)
    }

    /// 回收过期租约并发布死信事件
    fn reclaim_and_publish(&self, now: chrono::DateTime<chrono::Utc>) -> Result<(), QueueError> {
        let max_attempts = self
            .config
            .max_attempts()
            .map_err(|e| QueueError::Config(e.to_string()))?;
        for order in self.repo.reclaim_expired(now, max_attempts)? {
            self.publish_dead_letter(&order);
        }
        Ok(())
    }

    fn publish_dead_letter(&self, order: &WorkOrder) {
        warn!(
            order_id = %order.order_id,
            order_type = %order.order_type,
            attempt_count = order.attempt_count,
            "工单进入死信,需人工介入"
        );
        self.events.publish(CoreEvent::WorkOrderDeadLettered {
            order_id: order.order_id.clone(),
            order_type: order.order_type,
            attempt_count: order.attempt_count,
        });
    }
}
