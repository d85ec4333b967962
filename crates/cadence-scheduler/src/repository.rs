use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::db::init_db;
use crate::error::Result;
use crate::types::{ReportSchedule, ScheduleExecution};

/// Durable storage for schedule definitions and execution records.
///
/// The engine keeps all live state in memory; the repository only mirrors
/// it so schedules survive a restart.
pub trait ScheduleRepository: Send + Sync {
    /// Insert or replace a schedule.
    fn save_schedule(&self, schedule: &ReportSchedule) -> Result<()>;
    /// Remove a schedule and its execution records. Removing an unknown id is
    /// not an error.
    fn delete_schedule(&self, schedule_id: &str) -> Result<()>;
    /// Insert or replace an execution record.
    fn save_execution(&self, execution: &ScheduleExecution) -> Result<()>;
    fn load_schedules(&self) -> Result<Vec<ReportSchedule>>;
    fn load_execution(&self, execution_id: &str) -> Result<Option<ScheduleExecution>>;
    /// Most recent executions of a schedule, newest first.
    fn load_executions(&self, schedule_id: &str, limit: usize) -> Result<Vec<ScheduleExecution>>;
}

/// [`ScheduleRepository`] backed by a single SQLite connection.
pub struct SqliteRepository {
    db: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Poisoning is ignored: each statement is atomic on its own.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ScheduleRepository for SqliteRepository {
    fn save_schedule(&self, schedule: &ReportSchedule) -> Result<()> {
        let body = serde_json::to_string(schedule)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO schedules
             (id, tenant_id, schedule_type, is_active, next_execution, body, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                schedule_type = excluded.schedule_type,
                is_active = excluded.is_active,
                next_execution = excluded.next_execution,
                body = excluded.body,
                updated_at = excluded.updated_at",
            rusqlite::params![
                schedule.id,
                schedule.tenant_id,
                schedule.schedule_type.to_string(),
                schedule.is_active,
                schedule.next_execution.map(|t| t.to_rfc3339()),
                body,
                schedule.updated_at.to_rfc3339(),
            ],
        )?;
        debug!(schedule_id = %schedule.id, "schedule saved");
        Ok(())
    }

    fn delete_schedule(&self, schedule_id: &str) -> Result<()> {
        let db = self.conn();
        db.execute("DELETE FROM executions WHERE schedule_id = ?1", [schedule_id])?;
        db.execute("DELETE FROM schedules WHERE id = ?1", [schedule_id])?;
        debug!(schedule_id, "schedule deleted");
        Ok(())
    }

    fn save_execution(&self, execution: &ScheduleExecution) -> Result<()> {
        let body = serde_json::to_string(execution)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO executions (id, schedule_id, status, retry_attempt, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body",
            rusqlite::params![
                execution.id,
                execution.schedule_id,
                execution.status.to_string(),
                execution.retry_attempt,
                execution.created_at.to_rfc3339(),
                body,
            ],
        )?;
        Ok(())
    }

    fn load_schedules(&self) -> Result<Vec<ReportSchedule>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT id, body FROM schedules ORDER BY rowid")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let schedules = rows
            .into_iter()
            .filter_map(|(id, body)| match serde_json::from_str(&body) {
                Ok(schedule) => Some(schedule),
                Err(e) => {
                    warn!(schedule_id = %id, "skipping unreadable schedule row: {e}");
                    None
                }
            })
            .collect();
        Ok(schedules)
    }

    fn load_execution(&self, execution_id: &str) -> Result<Option<ScheduleExecution>> {
        let db = self.conn();
        let body: Option<String> = db
            .query_row(
                "SELECT body FROM executions WHERE id = ?1",
                [execution_id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    fn load_executions(&self, schedule_id: &str, limit: usize) -> Result<Vec<ScheduleExecution>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT body FROM executions WHERE schedule_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let bodies: Vec<String> = stmt
            .query_map(rusqlite::params![schedule_id, limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, ExecutionTrigger, NewSchedule};
    use chrono::Utc;

    fn schedule() -> ReportSchedule {
        ReportSchedule::from_definition(NewSchedule::interval("r1", "t1", 30), Utc::now())
    }

    #[test]
    fn save_is_an_upsert() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut s = schedule();
        repo.save_schedule(&s).unwrap();
        s.execution_count = 7;
        repo.save_schedule(&s).unwrap();

        let loaded = repo.load_schedules().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], s);
    }

    #[test]
    fn delete_removes_executions_too() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let s = schedule();
        repo.save_schedule(&s).unwrap();
        let e = ScheduleExecution::new(&s, 2, ExecutionTrigger::Manual, 0, Utc::now());
        repo.save_execution(&e).unwrap();

        repo.delete_schedule(&s.id).unwrap();
        repo.delete_schedule(&s.id).unwrap();
        assert!(repo.load_schedules().unwrap().is_empty());
        assert!(repo.load_executions(&s.id, 10).unwrap().is_empty());
    }

    #[test]
    fn execution_status_updates_in_place() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let s = schedule();
        let mut e = ScheduleExecution::new(&s, 2, ExecutionTrigger::Scheduled, 0, Utc::now());
        repo.save_execution(&e).unwrap();
        e.status = ExecutionStatus::Completed;
        e.record_count = Some(42);
        repo.save_execution(&e).unwrap();

        let loaded = repo.load_executions(&s.id, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, ExecutionStatus::Completed);
        assert_eq!(loaded[0].record_count, Some(42));

        let single = repo.load_execution(&e.id).unwrap().unwrap();
        assert_eq!(single.record_count, Some(42));
        assert!(repo.load_execution("missing").unwrap().is_none());
    }

    #[test]
    fn unreadable_rows_are_skipped() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.save_schedule(&schedule()).unwrap();
        repo.conn()
            .execute(
                "INSERT INTO schedules
                 (id, tenant_id, schedule_type, is_active, next_execution, body, updated_at)
                 VALUES ('bad', 't', 'cron', 1, NULL, '{not json', '')",
                [],
            )
            .unwrap();
        assert_eq!(repo.load_schedules().unwrap().len(), 1);
    }
}
