// ==========================================
// ActivityLogRepository - 代理活动记录仓储
// ==========================================
// 红线: append-only,无 UPDATE/DELETE 入口
// ==========================================

use crate::domain::activity_log::AgentActivityRecord;
use crate::domain::types::ActivityStatus;
use crate::repository::error::{parse_enum, RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

pub struct ActivityLogRepository {
    conn: Arc<Mutex<Connection>>,
}

type RecordRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    i64,
    Option<String>,
    DateTime<Utc>,
);

fn read_record_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
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

fn parse_json_opt(field: &str, raw: Option<String>) -> RepositoryResult<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: e.to_string(),
        })
    })
    .transpose()
}

fn to_record(row: RecordRow) -> RepositoryResult<AgentActivityRecord> {
    let (record_id, agent_type, work_order_id, input_raw, output_raw, status_raw, duration_ms, error, created_at) =
        row;
    Ok(AgentActivityRecord {
        record_id,
        agent_type,
        work_order_id,
        input: parse_json_opt("input_json", input_raw)?,
        output: parse_json_opt("output_json", output_raw)?,
        status: parse_enum("status", &status_raw, ActivityStatus::from_str)?,
        duration_ms,
        error,
        created_at,
    })
}

impl ActivityLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加活动记录
    pub fn append(&self, record: &AgentActivityRecord) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO activity_log (
                record_id, agent_type, work_order_id, input_json, output_json,
                status, duration_ms, error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.record_id,
                record.agent_type,
                record.work_order_id,
                record.input.as_ref().map(|v| v.to_string()),
                record.output.as_ref().map(|v| v.to_string()),
                record.status.as_str(),
                record.duration_ms,
                record.error,
                record.created_at,
            ],
        )?;
        Ok(record.record_id.clone())
    }

    /// 按工单查询活动记录 (与该工单租约/确认序列保持因果顺序)
    pub fn list_by_work_order(
        &self,
        work_order_id: &str,
    ) -> RepositoryResult<Vec<AgentActivityRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT record_id, agent_type, work_order_id, input_json, output_json,
                   status, duration_ms, error, created_at
            FROM activity_log
            WHERE work_order_id = ?1
            ORDER BY created_at ASC, record_id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![work_order_id], read_record_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(to_record(row?)?);
        }
        Ok(records)
    }

    /// 按代理类型查询最近的活动记录
    pub fn list_recent_by_agent(
        &self,
        agent_type: &str,
        limit: i64,
    ) -> RepositoryResult<Vec<AgentActivityRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT record_id, agent_type, work_order_id, input_json, output_json,
                   status, duration_ms, error, created_at
            FROM activity_log
            WHERE agent_type = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![agent_type, limit], read_record_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(to_record(row?)?);
        }
        Ok(records)
    }
}
