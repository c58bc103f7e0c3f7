// ==========================================
// 质检/缺陷仓储
// ==========================================
// InspectionRepository: 质检记录 (仅 corrective_action 可更新,
//   且仅在状态迁移事务内回写)
// DefectCaseRepository: 缺陷工单 (状态迁移语义在 engine/defect_workflow)
// ==========================================

use crate::domain::activity_log::AgentActivityRecord;
use crate::domain::quality::{DefectCase, Inspection};
use crate::domain::types::{DefectSeverity, DefectState};
use crate::repository::error::{parse_enum, RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// InspectionRepository - 质检记录仓储
// ==========================================

pub struct InspectionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl InspectionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, inspection: &Inspection) -> RepositoryResult<String> {
        let defect_codes_json = serde_json::to_string(&inspection.defect_codes)
            .map_err(|e| RepositoryError::ValidationError(e.to_string()))?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO inspection (
                inspection_id, batch_number, inspection_type, inspector_id,
                passed, defect_codes_json, measurements_json, corrective_action, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                inspection.inspection_id,
                inspection.batch_number,
                inspection.inspection_type,
                inspection.inspector_id,
                inspection.passed,
                defect_codes_json,
                inspection.measurements.to_string(),
                inspection.corrective_action,
                inspection.created_at,
            ],
        )?;
        Ok(inspection.inspection_id.clone())
    }

    pub fn find(&self, inspection_id: &str) -> RepositoryResult<Option<Inspection>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT inspection_id, batch_number, inspection_type, inspector_id,
                       passed, defect_codes_json, measurements_json, corrective_action, created_at
                FROM inspection WHERE inspection_id = ?1
                "#,
                params![inspection_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, DateTime<Utc>>(8)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, batch, itype, inspector, passed, codes_raw, measurements_raw, action, created_at)) => {
                let defect_codes: Vec<String> = serde_json::from_str(&codes_raw).map_err(|e| {
                    RepositoryError::FieldValueError {
                        field: "defect_codes_json".to_string(),
                        message: e.to_string(),
                    }
                })?;
                let measurements = serde_json::from_str(&measurements_raw).map_err(|e| {
                    RepositoryError::FieldValueError {
                        field: "measurements_json".to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(Some(Inspection {
                    inspection_id: id,
                    batch_number: batch,
                    inspection_type: itype,
                    inspector_id: inspector,
                    passed,
                    defect_codes,
                    measurements,
                    corrective_action: action,
                    created_at,
                }))
            }
        }
    }
}

// ==========================================
// DefectCaseRepository - 缺陷工单仓储
// ==========================================

pub struct DefectCaseRepository {
    conn: Arc<Mutex<Connection>>,
}

type CaseRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    Option<DateTime<Utc>>,
    bool,
);

fn read_case_row(row: &Row<'_>) -> rusqlite::Result<CaseRow> {
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
    ))
}

fn to_case(row: CaseRow) -> RepositoryResult<DefectCase> {
    let (case_id, inspection_id, severity_raw, state_raw, opened_at, state_changed_at, assignee, resolution, closed_at, escalated) =
        row;
    Ok(DefectCase {
        case_id,
        inspection_id,
        severity: parse_enum("severity", &severity_raw, DefectSeverity::from_str)?,
        state: parse_enum("state", &state_raw, DefectState::from_str)?,
        opened_at,
        state_changed_at,
        assignee,
        resolution,
        closed_at,
        escalated,
    })
}

const CASE_COLUMNS: &str = r#"
    case_id, inspection_id, severity, state, opened_at, state_changed_at,
    assignee, resolution, closed_at, escalated
"#;

impl DefectCaseRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, case: &DefectCase) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO defect_case (
                case_id, inspection_id, severity, state, opened_at, state_changed_at,
                assignee, resolution, closed_at, escalated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                case.case_id,
                case.inspection_id,
                case.severity.as_str(),
                case.state.as_str(),
                case.opened_at,
                case.state_changed_at,
                case.assignee,
                case.resolution,
                case.closed_at,
                case.escalated,
            ],
        )?;
        Ok(case.case_id.clone())
    }

    pub fn find(&self, case_id: &str) -> RepositoryResult<Option<DefectCase>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM defect_case WHERE case_id = ?1"),
                params![case_id],
                read_case_row,
            )
            .optional()?;
        row.map(to_case).transpose()
    }

    /// 条件状态迁移 + 整改结论回写 + 审计追加,单事务
    ///
    /// 状态 CAS (expected_state 不匹配时零行更新)、质检记录的
    /// corrective_action 回写与审计记录要么同时生效要么整体回滚,
    /// 不会出现状态已迁移但审计缺失的半提交。
    ///
    /// # 返回
    /// - Ok(true): 迁移成功
    /// - Ok(false): 当前状态已不是 expected_state (整体回滚)
    #[allow(clippy::too_many_arguments)]
    pub fn transition_with_audit(
        &self,
        case_id: &str,
        expected_state: DefectState,
        new_state: DefectState,
        state_changed_at: DateTime<Utc>,
        resolution: Option<&str>,
        closed_at: Option<DateTime<Utc>>,
        escalated: Option<bool>,
        corrective_action: Option<(&str, &str)>,
        audit: &AgentActivityRecord,
    ) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let rows = tx.execute(
            r#"
            UPDATE defect_case SET
                state = ?3,
                state_changed_at = ?4,
                resolution = COALESCE(?5, resolution),
                closed_at = COALESCE(?6, closed_at),
                escalated = COALESCE(?7, escalated)
            WHERE case_id = ?1 AND state = ?2
            "#,
            params![
                case_id,
                expected_state.as_str(),
                new_state.as_str(),
                state_changed_at,
                resolution,
                closed_at,
                escalated,
            ],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        // 闭环时把整改结论追加回质检记录 (Inspection 唯一可更新字段)
        if let Some((inspection_id, action)) = corrective_action {
            let updated = tx.execute(
                "UPDATE inspection SET corrective_action = ?2 WHERE inspection_id = ?1",
                params![inspection_id, action],
            )?;
            if updated == 0 {
                return Err(RepositoryError::NotFound {
                    entity: "Inspection".to_string(),
                    id: inspection_id.to_string(),
                });
            }
        }

        tx.execute(
            r#"
            INSERT INTO activity_log (
                record_id, agent_type, work_order_id, input_json, output_json,
                status, duration_ms, error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                audit.record_id,
                audit.agent_type,
                audit.work_order_id,
                audit.input.as_ref().map(|v| v.to_string()),
                audit.output.as_ref().map(|v| v.to_string()),
                audit.status.as_str(),
                audit.duration_ms,
                audit.error,
                audit.created_at,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// 未闭环工单列表 (管理查询面)
    pub fn list_open(&self) -> RepositoryResult<Vec<DefectCase>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CASE_COLUMNS} FROM defect_case
            WHERE state != 'CLOSED'
            ORDER BY opened_at ASC
            "#
        ))?;
        let rows = stmt.query_map([], read_case_row)?;

        let mut cases = Vec::new();
        for row in rows {
            cases.push(to_case(row?)?);
        }
        Ok(cases)
    }

    /// SLA 升级候选: OPENED/INVESTIGATING 且尚未升级
    /// (各严重度的 SLA 截止判定在 engine 层,此处只做数据筛选)
    pub fn list_escalation_candidates(&self) -> RepositoryResult<Vec<DefectCase>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {CASE_COLUMNS} FROM defect_case
            WHERE state IN ('OPENED', 'INVESTIGATING')
              AND escalated = 0
            ORDER BY state_changed_at ASC
            "#
        ))?;
        let rows = stmt.query_map([], read_case_row)?;

        let mut cases = Vec::new();
        for row in rows {
            cases.push(to_case(row?)?);
        }
        Ok(cases)
    }
}
