// ==========================================
// 生产智能核心 - 代理编排器
// ==========================================
// 每种代理类型一个逻辑工作池,独立定容。
// 工作者循环: 租约 → 执行类型处理器 → ack/nack → 落活动记录。
// 红线: 处理器失败必须在工作者边界捕获并转为 nack,
//       单个处理器失败永不拖垮工作池;
//       空队列等待有界 (轮询间隔 + 停机信号),池可缩容可排空
// 同工单重试间隔为带抖动的指数退避 (基数 2x,上限 5 分钟),
// 避免瞬态失败后的惊群式重租约
// ==========================================

use crate::config::ConfigManager;
use crate::domain::activity_log::AgentActivityRecord;
use crate::domain::types::WorkOrderType;
use crate::domain::work_order::WorkOrder;
use crate::engine::clock::Clock;
use crate::engine::events::{CoreEvent, EventPublisher};
use crate::engine::work_queue::{QueueError, WorkQueue};
use crate::repository::ActivityLogRepository;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ==========================================
// 处理器抽象
// ==========================================

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("处理器执行失败: {0}")]
    Failed(String),

    /// 处理器在检查点发现取消请求,干净中止 (仍走 nack 释放租约)
    #[error("任务在检查点被取消")]
    Cancelled,
}

/// 任务执行上下文 (长任务在检查点自查取消标记)
pub struct TaskContext {
    queue: Arc<WorkQueue>,
    order_id: String,
}

impl TaskContext {
    pub fn new(queue: Arc<WorkQueue>, order_id: impl Into<String>) -> Self {
        Self {
            queue,
            order_id: order_id.into(),
        }
    }

    /// 取消标记查询 (查询失败按未取消处理,不阻断任务)
    pub fn cancellation_requested(&self) -> bool {
        self.queue
            .cancellation_requested(&self.order_id)
            .unwrap_or(false)
    }
}

/// 类型化任务处理器
///
/// 新增代理类型 = 注册一个处理器,编排器核心不改动。
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn agent_type(&self) -> WorkOrderType;

    async fn handle(
        &self,
        order: &WorkOrder,
        ctx: &TaskContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// 处理器注册表
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkOrderType, Arc<dyn AgentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(handler.agent_type(), handler);
    }

    pub fn get(&self, agent_type: WorkOrderType) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.get(&agent_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<WorkOrderType> {
        self.handlers.keys().copied().collect()
    }
}

// ==========================================
// 退避策略
// ==========================================

/// 带抖动的指数退避: base × 2^attempt,封顶 cap,抖动 ±50%
fn backoff_with_jitter(attempt_count: i32, base_secs: u64, cap_secs: u64) -> Duration {
    let exp = attempt_count.clamp(0, 30) as u32;
    let raw = base_secs.saturating_mul(1u64 << exp.min(20)).min(cap_secs);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis(((raw * 1000) as f64 * jitter) as u64)
}

// ==========================================
// AgentOrchestrator - 代理编排器
// ==========================================

pub struct AgentOrchestrator {
    queue: Arc<WorkQueue>,
    activity: Arc<ActivityLogRepository>,
    config: Arc<ConfigManager>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    registry: HandlerRegistry,
}

/// 运行中编排器的控制句柄
pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// 发停机信号并等待全部工作者退出
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("编排器已停机");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// 工作者循环的不变参数快照 (启动时读一次配置)
#[derive(Clone)]
struct WorkerParams {
    poll_interval: Duration,
    backoff_base_secs: u64,
    backoff_cap_secs: u64,
}

impl AgentOrchestrator {
    pub fn new(
        queue: Arc<WorkQueue>,
        activity: Arc<ActivityLogRepository>,
        config: Arc<ConfigManager>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            queue,
            activity,
            config,
            clock,
            events,
            registry,
        }
    }

    /// 启动全部工作池
    pub fn start(&self) -> Result<OrchestratorHandle, QueueError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let params = WorkerParams {
            poll_interval: Duration::from_millis(
                self.config
                    .lease_poll_interval_ms()
                    .map_err(|e| QueueError::Config(e.to_string()))?,
            ),
            backoff_base_secs: self
                .config
                .backoff_base_secs()
                .map_err(|e| QueueError::Config(e.to_string()))?,
            backoff_cap_secs: self
                .config
                .backoff_cap_secs()
                .map_err(|e| QueueError::Config(e.to_string()))?,
        };

        let mut workers = Vec::new();
        for agent_type in self.registry.registered_types() {
            let Some(handler) = self.registry.get(agent_type) else {
                continue;
            };
            let pool_size = self
                .config
                .pool_size(&agent_type.as_str().to_lowercase())
                .map_err(|e| QueueError::Config(e.to_string()))?;

            info!(
                agent_type = %agent_type,
                pool_size,
                "启动代理工作池"
            );
            for index in 0..pool_size {
                let worker_id = format!("{}-worker-{}", agent_type.as_str().to_lowercase(), index);
                workers.push(tokio::spawn(Self::worker_loop(
                    worker_id,
                    agent_type,
                    Arc::clone(&handler),
                    Arc::clone(&self.queue),
                    Arc::clone(&self.activity),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.events),
                    params.clone(),
                    shutdown_rx.clone(),
                )));
            }
        }

        Ok(OrchestratorHandle {
            shutdown_tx,
            workers,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_loop(
        worker_id: String,
        agent_type: WorkOrderType,
        handler: Arc<dyn AgentHandler>,
        queue: Arc<WorkQueue>,
        activity: Arc<ActivityLogRepository>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        params: WorkerParams,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!(worker_id = %worker_id, "工作者启动");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match queue.lease_default(agent_type, &worker_id) {
                Ok(Some(order)) => {
                    let backoff = Self::process_order(
                        &worker_id, &order, &handler, &queue, &activity, &clock, &events, &params,
                    )
                    .await;
                    if let Some(backoff) = backoff {
                        // 失败后的带抖动退避,期间可被停机信号打断
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                }
                Ok(None) => {
                    // 有界等待: 轮询间隔或停机信号,先到先醒
                    tokio::select! {
                        _ = tokio::time::sleep(params.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(QueueError::LeaseConflict(_)) => {
                    // 并发抢占是预期情况,立即重试
                    continue;
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "租约获取失败,退避后重试");
                    tokio::select! {
                        _ = tokio::time::sleep(params.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }
        debug!(worker_id = %worker_id, "工作者退出");
    }

    /// 执行一次任务尝试; 失败时返回应休眠的退避时长
    #[allow(clippy::too_many_arguments)]
    async fn process_order(
        worker_id: &str,
        order: &WorkOrder,
        handler: &Arc<dyn AgentHandler>,
        queue: &Arc<WorkQueue>,
        activity: &Arc<ActivityLogRepository>,
        clock: &Arc<dyn Clock>,
        events: &Arc<dyn EventPublisher>,
        params: &WorkerParams,
    ) -> Option<Duration> {
        let agent_type = order.order_type.as_str().to_lowercase();
        let ctx = TaskContext::new(Arc::clone(queue), &order.order_id);
        let started = Instant::now();
        let result = handler.handle(order, &ctx).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        let now = clock.now();

        match result {
            Ok(output) => {
                if let Err(e) = queue.ack(&order.order_id, worker_id) {
                    // ack 失败 (如租约已过期被回收): 工单会被重新投递,at-least-once
                    warn!(
                        worker_id = %worker_id,
                        order_id = %order.order_id,
                        error = %e,
                        "确认完成失败,工单将被重新投递"
                    );
                }

                let record = AgentActivityRecord::success(
                    &agent_type,
                    Some(order.order_id.clone()),
                    Some(order.payload.clone()),
                    Some(output.clone()),
                    duration_ms,
                    now,
                );
                if let Err(e) = activity.append(&record) {
                    error!(order_id = %order.order_id, error = %e, "活动记录写入失败");
                }

                if order.order_type == WorkOrderType::Procurement {
                    Self::publish_procurement(order, &output, events);
                }
                None
            }
            Err(handler_error) => {
                let cancelled = matches!(handler_error, HandlerError::Cancelled);
                let reason = handler_error.to_string();
                if let Err(e) = queue.nack(&order.order_id, worker_id, &reason) {
                    warn!(
                        worker_id = %worker_id,
                        order_id = %order.order_id,
                        error = %e,
                        "否定确认失败,租约将自然过期回收"
                    );
                }

                let record = AgentActivityRecord::failed(
                    &agent_type,
                    Some(order.order_id.clone()),
                    Some(order.payload.clone()),
                    &reason,
                    duration_ms,
                    now,
                );
                if let Err(e) = activity.append(&record) {
                    error!(order_id = %order.order_id, error = %e, "活动记录写入失败");
                }

                if cancelled {
                    // 取消中止的工单在释放时落 CANCELLED,不会再投递
                    None
                } else {
                    Some(backoff_with_jitter(
                        order.attempt_count,
                        params.backoff_base_secs,
                        params.backoff_cap_secs,
                    ))
                }
            }
        }
    }

    /// procurement 工单成功 ⇒ 发 ProcurementRequested 事件
    /// (供应商选择/沟通由采购协作方负责)
    fn publish_procurement(
        order: &WorkOrder,
        output: &serde_json::Value,
        events: &Arc<dyn EventPublisher>,
    ) {
        let payload = if output.get("material_code").is_some() {
            output
        } else {
            &order.payload
        };
        let material_code = payload
            .get("material_code")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let quantity = payload
            .get("quantity")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        if material_code.is_empty() {
            warn!(order_id = %order.order_id, "采购载荷缺少 material_code,跳过事件");
            return;
        }
        events.publish(CoreEvent::ProcurementRequested {
            material_code,
            quantity,
            urgency: order.priority,
        });
    }
}
