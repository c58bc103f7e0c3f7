// ==========================================
// OeeRepository - OEE 指标仓储
// ==========================================
// 幂等 upsert: 同 (machine_id, shift_date, shift_type) 后写覆盖先写
// (指标是读数+生产日志的纯函数,last-write-wins 无腐败风险)
// ==========================================

use crate::domain::production::OeeMetric;
use crate::domain::types::{MetricStatus, ShiftType};
use crate::repository::error::{parse_enum, RepositoryError, RepositoryResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct OeeRepository {
    conn: Arc<Mutex<Connection>>,
}

type OeeRow = (
    String,
    NaiveDate,
    String,
    f64,
    f64,
    f64,
    f64,
    String,
    DateTime<Utc>,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<OeeRow> {
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
    ))
}

fn to_metric(row: OeeRow) -> RepositoryResult<OeeMetric> {
    let (machine_id, shift_date, shift_type_raw, availability, performance, quality, oee, status_raw, computed_at) =
        row;
    Ok(OeeMetric {
        machine_id,
        shift_date,
        shift_type: parse_enum("shift_type", &shift_type_raw, ShiftType::from_str)?,
        availability,
        performance,
        quality,
        oee,
        status: parse_enum("status", &status_raw, MetricStatus::from_str)?,
        computed_at,
    })
}

impl OeeRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 幂等 upsert
    pub fn upsert(&self, metric: &OeeMetric) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO oee_metric (
                machine_id, shift_date, shift_type,
                availability, performance, quality, oee, status, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (machine_id, shift_date, shift_type) DO UPDATE SET
                availability = excluded.availability,
                performance = excluded.performance,
                quality = excluded.quality,
                oee = excluded.oee,
                status = excluded.status,
                computed_at = excluded.computed_at
            "#,
            params![
                metric.machine_id,
                metric.shift_date,
                metric.shift_type.as_str(),
                metric.availability,
                metric.performance,
                metric.quality,
                metric.oee,
                metric.status.as_str(),
                metric.computed_at,
            ],
        )?;
        Ok(())
    }

    /// 查询单机台单班次指标
    pub fn find(
        &self,
        machine_id: &str,
        shift_date: NaiveDate,
        shift_type: ShiftType,
    ) -> RepositoryResult<Option<OeeMetric>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT machine_id, shift_date, shift_type,
                       availability, performance, quality, oee, status, computed_at
                FROM oee_metric
                WHERE machine_id = ?1 AND shift_date = ?2 AND shift_type = ?3
                "#,
                params![machine_id, shift_date, shift_type.as_str()],
                read_row,
            )
            .optional()?;

        row.map(to_metric).transpose()
    }

    /// 查询机台的全部指标 (按班次日期升序)
    pub fn list_by_machine(&self, machine_id: &str) -> RepositoryResult<Vec<OeeMetric>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT machine_id, shift_date, shift_type,
                   availability, performance, quality, oee, status, computed_at
            FROM oee_metric
            WHERE machine_id = ?1
            ORDER BY shift_date ASC, shift_type ASC
            "#,
        )?;
        let rows = stmt.query_map(params![machine_id], read_row)?;

        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(to_metric(row?)?);
        }
        Ok(metrics)
    }
}
