// ==========================================
// ProductionLogRepository - 生产日志仓储 (只读)
// ==========================================
// 生产日志是外部协作方的事实表,核心只读不写。
// insert_for_collaborator 仅供协作方接入/测试灌数使用。
// ==========================================

use crate::domain::production::ProductionLogEntry;
use crate::domain::types::ShiftType;
use crate::repository::error::{parse_enum, RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// 生产日志查询接口
///
/// OEE 聚合器依赖的抽象: performance/quality 数量的权威来源。
/// 具体部署可替换为对接 MES 的实现。
pub trait ProductionLogSource: Send + Sync {
    fn find_entry(
        &self,
        machine_id: &str,
        shift_date: NaiveDate,
        shift_type: ShiftType,
    ) -> RepositoryResult<Option<ProductionLogEntry>>;
}

pub struct ProductionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 协作方/测试灌入生产日志 (核心业务路径不调用)
    pub fn insert_for_collaborator(&self, entry: &ProductionLogEntry) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO production_log (
                machine_id, shift_date, shift_type,
                target_quantity, actual_quantity, good_quantity,
                downtime_minutes, downtime_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.machine_id,
                entry.shift_date,
                entry.shift_type.as_str(),
                entry.target_quantity,
                entry.actual_quantity,
                entry.good_quantity,
                entry.downtime_minutes,
                entry.downtime_reason,
            ],
        )?;
        Ok(())
    }
}

impl ProductionLogSource for ProductionLogRepository {
    fn find_entry(
        &self,
        machine_id: &str,
        shift_date: NaiveDate,
        shift_type: ShiftType,
    ) -> RepositoryResult<Option<ProductionLogEntry>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT machine_id, shift_date, shift_type,
                       target_quantity, actual_quantity, good_quantity,
                       downtime_minutes, downtime_reason
                FROM production_log
                WHERE machine_id = ?1 AND shift_date = ?2 AND shift_type = ?3
                "#,
                params![machine_id, shift_date, shift_type.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, NaiveDate>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((machine_id, shift_date, shift_type_raw, target, actual, good, downtime, reason)) => {
                let shift_type = parse_enum("shift_type", &shift_type_raw, ShiftType::from_str)?;
                Ok(Some(ProductionLogEntry {
                    machine_id,
                    shift_date,
                    shift_type,
                    target_quantity: target,
                    actual_quantity: actual,
                    good_quantity: good,
                    downtime_minutes: downtime,
                    downtime_reason: reason,
                }))
            }
        }
    }
}
