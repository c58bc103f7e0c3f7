// ==========================================
// TelemetryRepository - 遥测读数仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 乱序容忍等准入策略在 engine/ingestion 层
// ==========================================

use crate::domain::telemetry::{Reading, RejectedReading};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct TelemetryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TelemetryRepository {
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

    /// 插入读数
    ///
    /// # 返回
    /// - `Err(UniqueConstraintViolation)`: 同 (设备, 传感器, 时间戳) 已存在
    pub fn insert(&self, reading: &Reading) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO telemetry_reading (equipment_id, sensor_type, value, unit, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                reading.equipment_id,
                reading.sensor_type,
                reading.value,
                reading.unit,
                reading.timestamp,
            ],
        )?;
        Ok(())
    }

    /// 批量插入读数 (单事务)
    pub fn batch_insert(&self, readings: &[Reading]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for reading in readings {
            tx.execute(
                r#"
                INSERT INTO telemetry_reading (equipment_id, sensor_type, value, unit, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    reading.equipment_id,
                    reading.sensor_type,
                    reading.value,
                    reading.unit,
                    reading.timestamp,
                ],
            )?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 落库被拒绝的乱序读数 (policy=REVIEW)
    pub fn insert_rejected(&self, rejected: &RejectedReading) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO rejected_reading
                (equipment_id, sensor_type, value, unit, timestamp, reason, rejected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                rejected.equipment_id,
                rejected.sensor_type,
                rejected.value,
                rejected.unit,
                rejected.timestamp,
                rejected.reason,
                rejected.rejected_at,
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询时间区间内的读数,按时间戳升序 (可从任意点续查)
    pub fn query_range(
        &self,
        equipment_id: &str,
        sensor_type: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Reading>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, sensor_type, value, unit, timestamp
            FROM telemetry_reading
            WHERE equipment_id = ?1 AND sensor_type = ?2
              AND timestamp >= ?3 AND timestamp < ?4
            ORDER BY timestamp ASC
            "#,
        )?;

        let rows = stmt.query_map(params![equipment_id, sensor_type, from, to], |row| {
            Ok(Reading {
                equipment_id: row.get(0)?,
                sensor_type: row.get(1)?,
                value: row.get(2)?,
                unit: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }

    /// 查询设备在时间区间内的全部读数 (不限传感器),按时间戳升序
    pub fn query_equipment_range(
        &self,
        equipment_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Reading>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, sensor_type, value, unit, timestamp
            FROM telemetry_reading
            WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            ORDER BY timestamp ASC
            "#,
        )?;

        let rows = stmt.query_map(params![equipment_id, from, to], |row| {
            Ok(Reading {
                equipment_id: row.get(0)?,
                sensor_type: row.get(1)?,
                value: row.get(2)?,
                unit: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }

    /// 该 (设备, 传感器) 已见的最大时间戳 (乱序判定基准)
    pub fn latest_timestamp(
        &self,
        equipment_id: &str,
        sensor_type: &str,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let ts = conn
            .query_row(
                r#"
                SELECT MAX(timestamp) FROM telemetry_reading
                WHERE equipment_id = ?1 AND sensor_type = ?2
                "#,
                params![equipment_id, sensor_type],
                |row| row.get::<_, Option<DateTime<Utc>>>(0),
            )
            .optional()?
            .flatten();
        Ok(ts)
    }

    /// rejected_reading 表行数 (复核队列长度)
    pub fn rejected_count(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count =
            conn.query_row("SELECT COUNT(*) FROM rejected_reading", [], |row| row.get(0))?;
        Ok(count)
    }
}
