// ==========================================
// WorkOrderRepository - 工单仓储
// ==========================================
// 租约获取 = 条件更新 (lease_owner 为空或已过期才允许设置),
// 零行更新即乐观冲突,由调用方重试 —— 这是全系统唯一
// 需要严格一致性的同步点。
// 排序: priority 数值降序, 同级按 created_at FIFO。
// ==========================================

use crate::domain::types::{WorkOrderPriority, WorkOrderState, WorkOrderType};
use crate::domain::work_order::WorkOrder;
use crate::repository::error::{parse_enum, RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

/// 租约尝试结果
#[derive(Debug)]
pub enum LeaseAttempt {
    /// 成功取得租约
    Leased(WorkOrder),
    /// 候选被并发抢走 (乐观冲突,调用方重试)
    Conflict,
    /// 该类型暂无可租约工单
    Empty,
}

/// 取消结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 未租约,直接取消
    Cancelled,
    /// 已被租约,仅置建议性取消标记
    AdvisoryRequested,
}

const ORDER_COLUMNS: &str = r#"
    order_id, order_type, priority, subject_id, payload_json, state,
    lease_owner, lease_expiry, attempt_count, cancel_requested, created_at, updated_at
"#;

type OrderRow = (
    String,
    String,
    i32,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    i32,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn read_order_row(row: &Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn to_order(row: OrderRow) -> RepositoryResult<WorkOrder> {
    let (order_id, type_raw, priority_rank, subject_id, payload_raw, state_raw, lease_owner, lease_expiry, attempt_count, cancel_requested, created_at, updated_at) =
        row;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        RepositoryError::FieldValueError {
            field: "payload_json".to_string(),
            message: e.to_string(),
        }
    })?;
    Ok(WorkOrder {
        order_id,
        order_type: parse_enum("order_type", &type_raw, WorkOrderType::from_str)?,
        priority: WorkOrderPriority::from_rank(priority_rank).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "priority".to_string(),
                message: format!("无法识别的优先级等级: {priority_rank}"),
            }
        })?,
        subject_id,
        payload,
        state: parse_enum("state", &state_raw, WorkOrderState::from_str)?,
        lease_owner,
        lease_expiry,
        attempt_count,
        cancel_requested,
        created_at,
        updated_at,
    })
}

pub struct WorkOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl WorkOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    pub fn insert(&self, order: &WorkOrder) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO work_order (
                order_id, order_type, priority, subject_id, payload_json, state,
                lease_owner, lease_expiry, attempt_count, cancel_requested,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                order.order_id,
                order.order_type.as_str(),
                order.priority.rank(),
                order.subject_id,
                order.payload.to_string(),
                order.state.as_str(),
                order.lease_owner,
                order.lease_expiry,
                order.attempt_count,
                order.cancel_requested,
                order.created_at,
                order.updated_at,
            ],
        )?;
        Ok(order.order_id.clone())
    }

    /// 回收过期租约
    ///
    /// 三步,单事务:
    /// 1. 带取消标记的过期 LEASED → CANCELLED (主动取消不算失败)
    /// 2. 其余过期 LEASED → PENDING, attempt_count + 1, 清空租约
    /// 3. attempt_count 超过上限的 PENDING → DEAD_LETTER
    ///
    /// # 返回
    /// 本次被判入死信的工单 (供上层发布事件)
    pub fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> RepositoryResult<Vec<WorkOrder>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            UPDATE work_order SET
                state = 'CANCELLED',
                lease_owner = NULL,
                lease_expiry = NULL,
                updated_at = ?1
            WHERE state = 'LEASED' AND lease_expiry < ?1 AND cancel_requested = 1
            "#,
            params![now],
        )?;

        tx.execute(
            r#"
            UPDATE work_order SET
                state = 'PENDING',
                lease_owner = NULL,
                lease_expiry = NULL,
                attempt_count = attempt_count + 1,
                updated_at = ?1
            WHERE state = 'LEASED' AND lease_expiry < ?1
            "#,
            params![now],
        )?;

        let dead: Vec<WorkOrder> = {
            let mut stmt = tx.prepare(&format!(
                r#"
                SELECT {ORDER_COLUMNS} FROM work_order
                WHERE state = 'PENDING' AND attempt_count > ?1
                "#
            ))?;
            let rows = stmt.query_map(params![max_attempts], read_order_row)?;
            let mut dead = Vec::new();
            for row in rows {
                dead.push(to_order(row?)?);
            }
            dead
        };

        for order in &dead {
            tx.execute(
                r#"
                UPDATE work_order SET state = 'DEAD_LETTER', updated_at = ?2
                WHERE order_id = ?1
                "#,
                params![order.order_id, now],
            )?;
        }

        tx.commit()?;

        // 返回死信终态的实体快照
        Ok(dead
            .into_iter()
            .map(|mut o| {
                o.state = WorkOrderState::DeadLetter;
                o.updated_at = now;
                o
            })
            .collect())
    }

    /// 尝试取得一个租约 (按优先级 + FIFO 选候选,条件更新上锁)
    pub fn try_lease(
        &self,
        order_type: WorkOrderType,
        owner: &str,
        now: DateTime<Utc>,
        lease_expiry: DateTime<Utc>,
    ) -> RepositoryResult<LeaseAttempt> {
        let conn = self.get_conn()?;

        let candidate: Option<String> = conn
            .query_row(
                r#"
                SELECT order_id FROM work_order
                WHERE order_type = ?1 AND state = 'PENDING'
                ORDER BY priority DESC, created_at ASC, order_id ASC
                LIMIT 1
                "#,
                params![order_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(order_id) = candidate else {
            return Ok(LeaseAttempt::Empty);
        };

        // 单一活跃租约持有者的 CAS: lease_owner 为空或已过期才允许设置
        let rows = conn.execute(
            r#"
            UPDATE work_order SET
                state = 'LEASED',
                lease_owner = ?2,
                lease_expiry = ?3,
                updated_at = ?4
            WHERE order_id = ?1
              AND state = 'PENDING'
              AND (lease_owner IS NULL OR lease_expiry < ?4)
            "#,
            params![order_id, owner, lease_expiry, now],
        )?;

        if rows == 0 {
            return Ok(LeaseAttempt::Conflict);
        }

        let row = conn.query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM work_order WHERE order_id = ?1"),
            params![order_id],
            read_order_row,
        )?;
        Ok(LeaseAttempt::Leased(to_order(row)?))
    }

    /// 确认完成 (仅限当前租约持有者)
    pub fn ack(&self, order_id: &str, owner: &str, now: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE work_order SET
                state = 'COMPLETED',
                lease_owner = NULL,
                lease_expiry = NULL,
                updated_at = ?3
            WHERE order_id = ?1 AND state = 'LEASED' AND lease_owner = ?2
            "#,
            params![order_id, owner, now],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: format!("order_id={order_id} 非 {owner} 持有的有效租约"),
                to: "COMPLETED".to_string(),
            });
        }
        Ok(())
    }

    /// 否定确认: 立即释放租约, attempt_count + 1
    ///
    /// 重试节奏由失败方的退避负责,队列侧不做可见性延迟。
    /// 带取消标记的工单释放时落 CANCELLED (不再投递也不入死信);
    /// 其余超过重试上限时转入 DEAD_LETTER。
    ///
    /// # 返回
    /// 否定确认后的工单快照 (state 为 PENDING、CANCELLED 或 DEAD_LETTER)
    pub fn nack(
        &self,
        order_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        max_attempts: i32,
    ) -> RepositoryResult<WorkOrder> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            r#"
            UPDATE work_order SET
                state = 'PENDING',
                lease_owner = NULL,
                lease_expiry = NULL,
                attempt_count = attempt_count + 1,
                updated_at = ?3
            WHERE order_id = ?1 AND state = 'LEASED' AND lease_owner = ?2
            "#,
            params![order_id, owner, now],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: format!("order_id={order_id} 非 {owner} 持有的有效租约"),
                to: "PENDING".to_string(),
            });
        }

        tx.execute(
            r#"
            UPDATE work_order SET state = 'CANCELLED'
            WHERE order_id = ?1 AND cancel_requested = 1
            "#,
            params![order_id],
        )?;

        tx.execute(
            r#"
            UPDATE work_order SET state = 'DEAD_LETTER'
            WHERE order_id = ?1 AND state = 'PENDING' AND attempt_count > ?2
            "#,
            params![order_id, max_attempts],
        )?;

        let row = tx.query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM work_order WHERE order_id = ?1"),
            params![order_id],
            read_order_row,
        )?;
        tx.commit()?;
        to_order(row)
    }

    /// 续约 (仅限当前租约持有者,且租约尚未过期)
    pub fn extend_lease(
        &self,
        order_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE work_order SET lease_expiry = ?3, updated_at = ?4
            WHERE order_id = ?1 AND state = 'LEASED' AND lease_owner = ?2
              AND lease_expiry >= ?4
            "#,
            params![order_id, owner, new_expiry, now],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: format!("order_id={order_id} 非 {owner} 持有的有效租约"),
                to: "LEASED(续约)".to_string(),
            });
        }
        Ok(())
    }

    /// 取消工单
    ///
    /// - PENDING: 直接置 CANCELLED
    /// - LEASED: 仅置建议性取消标记,处理器在检查点自查后 nack
    pub fn cancel(&self, order_id: &str, now: DateTime<Utc>) -> RepositoryResult<CancelOutcome> {
        let conn = self.get_conn()?;

        let rows = conn.execute(
            r#"
            UPDATE work_order SET state = 'CANCELLED', updated_at = ?2
            WHERE order_id = ?1 AND state = 'PENDING'
            "#,
            params![order_id, now],
        )?;
        if rows > 0 {
            return Ok(CancelOutcome::Cancelled);
        }

        let rows = conn.execute(
            r#"
            UPDATE work_order SET cancel_requested = 1, updated_at = ?2
            WHERE order_id = ?1 AND state = 'LEASED'
            "#,
            params![order_id, now],
        )?;
        if rows > 0 {
            return Ok(CancelOutcome::AdvisoryRequested);
        }

        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM work_order WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        match state {
            None => Err(RepositoryError::NotFound {
                entity: "WorkOrder".to_string(),
                id: order_id.to_string(),
            }),
            Some(s) => Err(RepositoryError::InvalidStateTransition {
                from: s,
                to: "CANCELLED".to_string(),
            }),
        }
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find(&self, order_id: &str) -> RepositoryResult<Option<WorkOrder>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM work_order WHERE order_id = ?1"),
                params![order_id],
                read_order_row,
            )
            .optional()?;
        row.map(to_order).transpose()
    }

    /// 同主体同类型是否已有未完结工单 (PENDING/LEASED) —— 建单去重依据
    pub fn has_open_order(
        &self,
        order_type: WorkOrderType,
        subject_id: &str,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let exists: bool = conn
            .query_row(
                r#"
                SELECT 1 FROM work_order
                WHERE order_type = ?1 AND subject_id = ?2
                  AND state IN ('PENDING', 'LEASED')
                LIMIT 1
                "#,
                params![order_type.as_str(), subject_id],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// 取消请求标记 (处理器在检查点轮询)
    pub fn cancellation_requested(&self, order_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let flag = conn.query_row(
            "SELECT cancel_requested FROM work_order WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(flag)
    }

    /// 死信工单列表 (管理查询面,需人工介入)
    pub fn list_dead_letters(&self) -> RepositoryResult<Vec<WorkOrder>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM work_order
            WHERE state = 'DEAD_LETTER'
            ORDER BY created_at ASC
            "#
        ))?;
        let rows = stmt.query_map([], read_order_row)?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(to_order(row?)?);
        }
        Ok(orders)
    }

    /// 按状态统计 (测试/查询面使用)
    pub fn count_by_state(&self, state: WorkOrderState) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM work_order WHERE state = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
