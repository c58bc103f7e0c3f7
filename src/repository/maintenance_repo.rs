// ==========================================
// MaintenanceScoreRepository - 维护评分仓储
// ==========================================
// 最新评分: 每设备一行 upsert
// 告警审计: 越过阈值的评分 append-only 留痕
// ==========================================

use crate::domain::maintenance::MaintenanceScore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct MaintenanceScoreRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MaintenanceScoreRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 覆盖最新评分 (瞬态数据,仅保留每设备最近一次)
    pub fn upsert_latest(&self, score: &MaintenanceScore) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO maintenance_score
                (equipment_id, failure_probability, predicted_window_days, computed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (equipment_id) DO UPDATE SET
                failure_probability = excluded.failure_probability,
                predicted_window_days = excluded.predicted_window_days,
                computed_at = excluded.computed_at
            "#,
            params![
                score.equipment_id,
                score.failure_probability,
                score.predicted_window_days,
                score.computed_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_latest(&self, equipment_id: &str) -> RepositoryResult<Option<MaintenanceScore>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT equipment_id, failure_probability, predicted_window_days, computed_at
                FROM maintenance_score WHERE equipment_id = ?1
                "#,
                params![equipment_id],
                |row| {
                    Ok(MaintenanceScore {
                        equipment_id: row.get(0)?,
                        failure_probability: row.get(1)?,
                        predicted_window_days: row.get(2)?,
                        computed_at: row.get::<_, DateTime<Utc>>(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// 告警审计留痕 (append-only)
    pub fn append_alert_audit(&self, score: &MaintenanceScore) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO maintenance_alert_audit
                (audit_id, equipment_id, failure_probability, predicted_window_days, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                Uuid::new_v4().to_string(),
                score.equipment_id,
                score.failure_probability,
                score.predicted_window_days,
                score.computed_at,
            ],
        )?;
        Ok(())
    }

    /// 设备的告警审计条数 (测试/查询面使用)
    pub fn alert_audit_count(&self, equipment_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM maintenance_alert_audit WHERE equipment_id = ?1",
            params![equipment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
